//! Leaderboard computation over the full persisted grade set.

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::db::prelude::*;

/// Builds the full leaderboard, ranked and numbered from 1.
///
/// `percentage` averages per-assignment percentages over every assignment in the catalog, so
/// unattempted assignments count as zero. Assignments without known points still count in the
/// denominator but contribute nothing.
pub fn build_leaderboard(
    students: &[Student],
    assignments: &[Assignment],
    grades: &[Grade],
) -> Vec<LeaderboardEntry> {
    let points: HashMap<&str, i32> = assignments
        .iter()
        .filter_map(|a| {
            a.points_available
                .filter(|p| *p > 0)
                .map(|p| (a.name.as_str(), p))
        })
        .collect();
    let denominator = assignments.len().max(1) as f64;

    let mut by_student: BTreeMap<&str, Vec<&Grade>> = BTreeMap::new();
    for grade in grades {
        by_student
            .entry(grade.github_username.as_str())
            .or_default()
            .push(grade);
    }

    let mut roster: BTreeMap<&str, Student> = students
        .iter()
        .map(|s| (s.github_username.as_str(), s.clone()))
        .collect();
    for login in by_student.keys() {
        roster
            .entry(*login)
            .or_insert_with(|| Student::without_fork(login));
    }

    let mut entries: Vec<LeaderboardEntry> = roster
        .into_values()
        .map(|student| {
            let graded = by_student
                .get(student.github_username.as_str())
                .map(Vec::as_slice)
                .unwrap_or_default();
            entry_for(student, graded, &points, denominator)
        })
        .collect();

    entries.sort_by(compare_rank);
    for (idx, entry) in entries.iter_mut().enumerate() {
        entry.ranking_position = idx as i32 + 1;
    }

    entries
}

fn entry_for(
    student: Student,
    grades: &[&Grade],
    points: &HashMap<&str, i32>,
    denominator: f64,
) -> LeaderboardEntry {
    let total_score = grades.iter().filter_map(|g| g.points_awarded).sum();
    let total_possible = grades
        .iter()
        .map(|g| points.get(g.assignment_name.as_str()).copied().unwrap_or(0))
        .sum();

    let percentage_sum: f64 = grades
        .iter()
        .filter_map(|g| {
            let awarded = g.points_awarded?;
            let available = *points.get(g.assignment_name.as_str())?;
            Some(f64::from(awarded) / f64::from(available) * 100.0)
        })
        .sum();

    let completed: BTreeSet<&str> = grades
        .iter()
        .filter(|g| g.points_awarded.is_some())
        .map(|g| g.assignment_name.as_str())
        .collect();

    LeaderboardEntry {
        resolution_time_hours: student
            .has_fork
            .then_some(student.resolution_time_hours)
            .flatten(),
        github_username: student.github_username,
        fork_created_at: student.fork_created_at,
        last_updated_at: student.last_updated_at,
        has_fork: student.has_fork,
        total_score,
        total_possible,
        percentage: (percentage_sum / denominator).round_ties_even() as i32,
        assignments_completed: completed.len() as i32,
        ranking_position: 0,
    }
}

/// Fastest resolution first (missing or zero last), then higher percentage, then username.
pub fn compare_rank(a: &LeaderboardEntry, b: &LeaderboardEntry) -> Ordering {
    rank_key(a).cmp(&rank_key(b))
}

fn rank_key(entry: &LeaderboardEntry) -> (bool, i32, Reverse<i32>, &str) {
    let resolution = entry.resolution_time_hours.filter(|h| *h != 0);
    (
        resolution.is_none(),
        resolution.unwrap_or(0),
        Reverse(entry.percentage),
        entry.github_username.as_str(),
    )
}
