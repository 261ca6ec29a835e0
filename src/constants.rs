pub const GITHUB_API_URL: &str = "https://api.github.com";
pub const GITHUB_WEB_URL: &str = "https://github.com/";
pub const GITHUB_API_VERSION: &str = "2022-11-28";
pub const USER_AGENT: &str = concat!("classroom-sync/", env!("CARGO_PKG_VERSION"));

pub const SERVICE_NAME: &str = "classroom-sync";
pub const TRACER_NAME: &str = "classroom-sync-tracer";

// GITHUB CLASSROOM CLI
pub const GH_BINARY: &str = "gh";
pub const CLI_HEADER_LINES: usize = 3;
pub const ASSIGNMENT_ROW_MIN_FIELDS: usize = 7;

// ENRICHMENT
pub const ENRICH_BATCH_SIZE: usize = 10;
pub const REQUEST_INTERVAL_MS: u64 = 100;
pub const WORKFLOW_RUNS_PER_PAGE: usize = 100;
pub const COMMITS_PER_PAGE: usize = 100;
pub const COMMIT_PAGE_LIMIT: usize = 50;

pub const RETRY_BASE_DELAY_MS: u64 = 500;
pub const RETRY_MAX_DELAY_MS: u64 = 30_000;

// MAPPING
pub const PART_TWO_PATTERN: &str = "part-2";
pub const PART_TWO_DEFAULT_POINTS: i32 = 100;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
pub const DEFAULT_LOG_LEVEL: &str = "info";

pub const DB_MAX_CONNECTIONS: u32 = 5;
