//! Environment-backed configuration source.
//!
//! Variables are read through a small serde [`Deserializer`](serde::Deserializer) over
//! `(name, value)` pairs, so the same code path serves both the process environment (plus an
//! optional `.env` file) and plain iterators in tests. Unknown variables are ignored; only the
//! fields declared on [`Env`] are recognized.

use std::path::Path;

use serde::Deserialize;
use serde::de::value::{MapDeserializer, SeqDeserializer};
use serde::de::{self, IntoDeserializer};
use thiserror::Error;

use crate::constants::{DEFAULT_LOG_LEVEL, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT_SECONDS};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Env {
    pub classroom_name: Option<String>,
    pub database_url: Option<String>,
    pub github_token: Option<String>,
    pub assignment_id: Option<String>,
    pub search_username: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    pub otel_exporter_otlp_endpoint: Option<String>,
}

impl Env {
    /// Loads variables from the process environment, reading `env_file` first when given (or
    /// a `.env` in the working directory otherwise). Values already present in the process
    /// environment take precedence over file values.
    pub fn load(env_file: Option<&Path>) -> EnvResult<Self> {
        match env_file {
            Some(path) => dotenvy::from_path(path)?,
            None => {
                dotenvy::dotenv().ok();
            }
        }

        Ok(from_env::<Env>()?)
    }
}

#[inline]
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

#[inline]
const fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

#[inline]
const fn default_timeout_seconds() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

pub fn from_env<T>() -> Result<T, EnvDeserializeError>
where
    T: serde::de::DeserializeOwned,
{
    from_iter(dotenvy::vars())
}

pub fn from_iter<Iter, T>(iter: Iter) -> Result<T, EnvDeserializeError>
where
    T: serde::de::DeserializeOwned,
    Iter: IntoIterator<Item = (String, String)>,
{
    let pairs = iter
        .into_iter()
        .map(|(name, value)| (name.clone(), EnvValue { name, value }));

    T::deserialize(EnvDeserializer {
        inner: MapDeserializer::new(pairs),
    })
}

// ---
//  Deserializer implementation
// ---

struct EnvDeserializer<'de, Iter>
where
    Iter: Iterator<Item = (String, EnvValue)>,
{
    inner: MapDeserializer<'de, Iter, EnvDeserializeError>,
}

/// A single variable's value, carrying its name for error messages.
struct EnvValue {
    name: String,
    value: String,
}

impl<'de> IntoDeserializer<'de, EnvDeserializeError> for EnvValue {
    type Deserializer = Self;
    fn into_deserializer(self) -> Self::Deserializer {
        self
    }
}

macro_rules! parse_scalar {
    ($($ty:ident => $method:ident,)*) => {
        $(
            fn $method<V>(self, visitor: V) -> Result<V::Value, EnvDeserializeError>
            where
                V: de::Visitor<'de>
            {
                let parsed = self.value.trim().parse::<$ty>().map_err(|e| {
                    EnvDeserializeError::Invalid {
                        name: self.name.clone(),
                        reason: e.to_string(),
                    }
                })?;
                parsed.into_deserializer().$method(visitor)
            }
        )*
    };
}

impl<'de> serde::de::Deserializer<'de> for EnvValue {
    type Error = EnvDeserializeError;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        self.value.into_deserializer().deserialize_any(visitor)
    }

    /// An empty variable (`ASSIGNMENT_ID=`) is treated the same as an unset one.
    fn deserialize_option<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        if self.value.trim().is_empty() {
            visitor.visit_none()
        } else {
            visitor.visit_some(self)
        }
    }

    fn deserialize_seq<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        let name = self.name;
        let items: Vec<EnvValue> = self
            .value
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(|item| EnvValue {
                name: name.clone(),
                value: item.to_owned(),
            })
            .collect();

        SeqDeserializer::new(items.into_iter()).deserialize_seq(visitor)
    }

    fn deserialize_newtype_struct<V>(
        self,
        _: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_enum<V>(
        self,
        _: &'static str,
        _: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_enum(self.value.into_deserializer())
    }

    parse_scalar! {
        bool => deserialize_bool,
        u8 => deserialize_u8,
        u16 => deserialize_u16,
        u32 => deserialize_u32,
        u64 => deserialize_u64,
        i8 => deserialize_i8,
        i16 => deserialize_i16,
        i32 => deserialize_i32,
        i64 => deserialize_i64,
        f32 => deserialize_f32,
        f64 => deserialize_f64,
    }

    serde::forward_to_deserialize_any! {
        char str string unit bytes byte_buf map
        unit_struct tuple_struct identifier tuple
        ignored_any struct
    }
}

impl<'de, Iter> serde::de::Deserializer<'de> for EnvDeserializer<'de, Iter>
where
    Iter: Iterator<Item = (String, EnvValue)>,
{
    type Error = EnvDeserializeError;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_map(self.inner)
    }

    serde::forward_to_deserialize_any! {
        char str string unit seq option bytes byte_buf map
        newtype_struct unit_struct tuple_struct identifier
        tuple ignored_any bool u8 u16 u32 u64 i8 i16 i32 i64
        f32 f64 enum struct
    }
}

impl serde::de::Error for EnvDeserializeError {
    fn custom<T>(msg: T) -> Self
    where
        T: std::fmt::Display,
    {
        EnvDeserializeError::Custom(msg.to_string())
    }

    fn missing_field(field: &'static str) -> Self {
        EnvDeserializeError::MissingValue(field.into())
    }
}

pub type EnvResult<T> = core::result::Result<T, EnvErr>;

#[derive(Debug, Error)]
pub enum EnvErr {
    #[error(transparent)]
    Dotenvy(#[from] dotenvy::Error),

    #[error(transparent)]
    Deserialize(#[from] EnvDeserializeError),
}

#[derive(Debug, Error)]
pub enum EnvDeserializeError {
    #[error("env deserialization error: {0}")]
    Custom(String),

    #[error("missing environment variable: {0}")]
    MissingValue(String),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: String, reason: String },
}

#[cfg(test)]
mod test {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_env_defaults_and_options() {
        let env: Env = from_iter(vars(&[
            ("CLASSROOM_NAME", "B4OS-Dev-2025"),
            ("GITHUB_TOKEN", "ghp_test"),
            ("ASSIGNMENT_ID", ""),
            ("PATH", "/usr/bin"),
        ]))
        .unwrap();

        assert_eq!(env.classroom_name.as_deref(), Some("B4OS-Dev-2025"));
        assert_eq!(env.github_token.as_deref(), Some("ghp_test"));
        assert!(env.assignment_id.is_none());
        assert!(env.database_url.is_none());
        assert_eq!(env.log_level, "info");
        assert_eq!(env.max_retries, 3);
        assert_eq!(env.timeout_seconds, 30);
    }

    #[test]
    fn test_env_parses_numbers() {
        let env: Env = from_iter(vars(&[("MAX_RETRIES", " 5 "), ("TIMEOUT_SECONDS", "12")])).unwrap();
        assert_eq!(env.max_retries, 5);
        assert_eq!(env.timeout_seconds, 12);
    }

    #[test]
    fn test_env_rejects_bad_number() {
        let err = from_iter::<_, Env>(vars(&[("MAX_RETRIES", "lots")])).unwrap_err();
        assert!(err.to_string().contains("MAX_RETRIES"));
    }
}
