use crate::error::{Result, ThrottleError};
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::time::Duration;

use ::config::{Config as ConfigBuilder, Environment, File};

pub const DEFAULT_MAX_CALLS: u32 = 30;
pub const DEFAULT_WINDOW_SECS: f64 = 60.0;

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_calls: u32,
    pub window_secs: f64,
}

impl RateLimitConfig {
    pub fn new(max_calls: u32, window_secs: f64) -> Self {
        Self {
            max_calls,
            window_secs,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_calls == 0 {
            return Err(ThrottleError::invalid("max_calls must be > 0"));
        }
        if !self.window_secs.is_finite() || self.window_secs <= 0.0 {
            return Err(ThrottleError::invalid(format!(
                "window_secs must be a positive number of seconds, got {}",
                self.window_secs
            )));
        }
        Ok(())
    }

    pub fn window(&self) -> Result<Duration> {
        self.validate()?;
        let window = Duration::try_from_secs_f64(self.window_secs)
            .map_err(|e| ThrottleError::invalid(format!("window_secs: {e}")))?;
        if window.is_zero() {
            return Err(ThrottleError::invalid(format!(
                "window_secs {} is shorter than one nanosecond",
                self.window_secs
            )));
        }
        Ok(window)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_calls: DEFAULT_MAX_CALLS,
            window_secs: DEFAULT_WINDOW_SECS,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub urls: Vec<String>,
    pub rounds: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            urls: vec![
                "https://hacker-news.firebaseio.com/v0/topstories.json".to_string(),
                "https://blog.rust-lang.org/".to_string(),
            ],
            rounds: 3,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub rate_limit: RateLimitConfig,
    pub http: HttpConfig,
}

impl Settings {
    /// Reads `throttle.{toml,yaml,json}` when present, then `THROTTLE_` variables
    /// such as `THROTTLE_RATE_LIMIT__MAX_CALLS=10`.
    pub fn load() -> Result<Self> {
        let config = ConfigBuilder::builder()
            .add_source(File::with_name("throttle").required(false))
            .add_source(
                Environment::with_prefix("THROTTLE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ThrottleError::ConfigError(e.to_string()))?;

        let settings: Self = config
            .try_deserialize()
            .map_err(|e| ThrottleError::ConfigError(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        self.rate_limit.validate()?;
        if self.http.timeout_secs == 0 {
            return Err(ThrottleError::ConfigError(
                "http.timeout_secs must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }
}

pub static SETTINGS: Lazy<Settings> = Lazy::new(|| {
    Settings::load().unwrap_or_else(|e| {
        eprintln!("Failed to load settings ({e}), using defaults");
        Settings::default()
    })
});
