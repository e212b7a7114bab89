use crate::bucket::{TokenBucket, WAIT_MESSAGE};
use crate::config::RateLimitConfig;
use crate::error::Result;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub type WaitHook = Arc<dyn Fn(&'static str) + Send + Sync>;

pub struct RateLimited<F> {
    func: F,
    bucket: Arc<TokenBucket>,
    on_wait: Option<WaitHook>,
}

/// Wraps `func` with a private bucket of 30 calls per minute.
pub fn rate_limit<F>(func: F) -> RateLimited<F> {
    RateLimited::shared(func, Arc::new(TokenBucket::default()))
}

impl<F> RateLimited<F> {
    pub fn new(func: F, config: &RateLimitConfig) -> Result<Self> {
        let bucket = TokenBucket::from_config(config)?;
        Ok(Self::shared(func, Arc::new(bucket)))
    }

    /// Every wrapper holding the same bucket spends one common quota.
    pub fn shared(func: F, bucket: Arc<TokenBucket>) -> Self {
        Self {
            func,
            bucket,
            on_wait: None,
        }
    }

    pub fn on_wait(mut self, hook: impl Fn(&'static str) + Send + Sync + 'static) -> Self {
        self.on_wait = Some(Arc::new(hook));
        self
    }

    pub fn name(&self) -> &'static str {
        std::any::type_name::<F>()
    }

    pub fn bucket(&self) -> &Arc<TokenBucket> {
        &self.bucket
    }

    pub fn get_ref(&self) -> &F {
        &self.func
    }

    pub fn into_inner(self) -> F {
        self.func
    }

    pub fn call<A, R>(&self, args: A) -> R
    where
        F: Fn(A) -> R,
    {
        self.bucket.acquire_with(|wait| self.report_wait(wait));
        (self.func)(args)
    }

    pub async fn call_async<A, Fut>(&self, args: A) -> Fut::Output
    where
        F: Fn(A) -> Fut,
        Fut: Future,
    {
        self.bucket
            .acquire_async_with(|wait| self.report_wait(wait))
            .await;
        (self.func)(args).await
    }

    fn report_wait(&self, wait: Duration) {
        debug!(
            function = self.name(),
            wait_ms = wait.as_millis() as u64,
            "{}",
            WAIT_MESSAGE
        );
        if let Some(hook) = &self.on_wait {
            hook(WAIT_MESSAGE);
        }
    }
}

impl<F: Clone> Clone for RateLimited<F> {
    fn clone(&self) -> Self {
        Self {
            func: self.func.clone(),
            bucket: Arc::clone(&self.bucket),
            on_wait: self.on_wait.clone(),
        }
    }
}

impl<F> fmt::Debug for RateLimited<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimited")
            .field("function", &self.name())
            .field("bucket", &self.bucket)
            .field("on_wait", &self.on_wait.is_some())
            .finish()
    }
}
