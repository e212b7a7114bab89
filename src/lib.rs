//! Token-bucket throttling for calls to rate-limited external APIs.

pub mod bucket;
pub mod clock;
pub mod config;
pub mod error;
pub mod limited;
pub mod metrics;

pub use crate::bucket::{TokenBucket, WAIT_MESSAGE};
pub use crate::clock::{Clock, ManualClock, SleepFuture, SystemClock};
pub use crate::config::{RateLimitConfig, Settings};
pub use crate::error::{Result, ThrottleError};
pub use crate::limited::{RateLimited, WaitHook, rate_limit};
pub use crate::metrics::{Metrics, MetricsSnapshot};
