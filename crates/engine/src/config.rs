//! Engine configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use crate::credentials::JwtConfig;
use crate::error::ConfigError;

/// Default engine inbound queue name.
const DEFAULT_QUEUE_NAME: &str = "rpaflow";
/// Default reconciliation period in seconds.
const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 30;
/// Default recurrence evaluation period in seconds.
const DEFAULT_TRIGGER_INTERVAL_SECS: u64 = 60;
/// Default number of correlation ids per worker-instance lookup.
const DEFAULT_INSTANCE_BATCH_SIZE: usize = 500;
/// Default run time limit for workflows without their own (1 hour).
const DEFAULT_EXPIRATION_MS: i64 = 3_600_000;
/// Default lifetime of impersonation tokens in minutes.
const DEFAULT_IMPERSONATION_EXPIRY_MINS: i64 = 5;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// WebSocket URL of the message broker.
    pub queue_url: String,
    /// Name of the engine's own inbound queue.
    pub queue_name: String,
    /// Service principal the engine signs in as.
    pub service_username: String,
    pub service_password: String,
    /// Username of the worker principal that receives invoke commands.
    pub robot_username: String,
    /// Signing configuration for impersonation tokens.
    pub jwt: JwtConfig,
    pub reconcile_interval: Duration,
    pub trigger_interval: Duration,
    pub instance_batch_size: usize,
    pub default_expiration_ms: i64,
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                     | Required | Default   |
    /// |-----------------------------|----------|-----------|
    /// | `QUEUE_URL`                 | **yes**  | --        |
    /// | `QUEUE_NAME`                | no       | `rpaflow` |
    /// | `SERVICE_USERNAME`          | **yes**  | --        |
    /// | `SERVICE_PASSWORD`          | **yes**  | --        |
    /// | `ROBOT_USERNAME`            | **yes**  | --        |
    /// | `JWT_SECRET`                | **yes**  | --        |
    /// | `IMPERSONATION_EXPIRY_MINS` | no       | `5`       |
    /// | `RECONCILE_INTERVAL_SECS`   | no       | `30`      |
    /// | `TRIGGER_INTERVAL_SECS`     | no       | `60`      |
    /// | `INSTANCE_BATCH_SIZE`       | no       | `500`     |
    /// | `DEFAULT_EXPIRATION_MS`     | no       | `3600000` |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let vars = Vars { lookup: &lookup };

        Ok(Self {
            queue_url: vars.required("QUEUE_URL")?,
            queue_name: vars
                .optional("QUEUE_NAME")
                .unwrap_or_else(|| DEFAULT_QUEUE_NAME.to_string()),
            service_username: vars.required("SERVICE_USERNAME")?,
            service_password: vars.required("SERVICE_PASSWORD")?,
            robot_username: vars.required("ROBOT_USERNAME")?,
            jwt: JwtConfig {
                secret: vars.required("JWT_SECRET")?,
                expiry_mins: vars
                    .parsed("IMPERSONATION_EXPIRY_MINS", DEFAULT_IMPERSONATION_EXPIRY_MINS)?,
            },
            reconcile_interval: Duration::from_secs(
                vars.positive("RECONCILE_INTERVAL_SECS", DEFAULT_RECONCILE_INTERVAL_SECS)?,
            ),
            trigger_interval: Duration::from_secs(
                vars.positive("TRIGGER_INTERVAL_SECS", DEFAULT_TRIGGER_INTERVAL_SECS)?,
            ),
            instance_batch_size: vars.positive("INSTANCE_BATCH_SIZE", DEFAULT_INSTANCE_BATCH_SIZE)?,
            default_expiration_ms: vars.parsed("DEFAULT_EXPIRATION_MS", DEFAULT_EXPIRATION_MS)?,
        })
    }
}

struct Vars<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Vars<'_> {
    /// Set and non-blank, trimmed.
    fn optional(&self, var: &'static str) -> Option<String> {
        (self.lookup)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, var: &'static str) -> Result<String, ConfigError> {
        self.optional(var).ok_or(ConfigError::Missing(var))
    }

    fn parsed<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(var) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            }),
        }
    }

    /// Like [`parsed`](Self::parsed), rejecting zero.
    fn positive<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + Default + PartialEq,
        T::Err: std::fmt::Display,
    {
        let value = self.parsed(var, default)?;
        if value == T::default() {
            return Err(ConfigError::Invalid {
                var,
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        Ok(value)
    }
}
