use api_throttle::config::SETTINGS;
use api_throttle::{RateLimited, Result, ThrottleError, TokenBucket};
use reqwest::Client;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .json()
        .init();

    info!(
        max_calls = SETTINGS.rate_limit.max_calls,
        window_secs = SETTINGS.rate_limit.window_secs,
        timeout_secs = SETTINGS.http.timeout_secs,
        rounds = SETTINGS.http.rounds,
        "Configuration loaded"
    );

    let client = Client::builder()
        .timeout(SETTINGS.http_timeout())
        .user_agent("api-throttle/0.1.0")
        .build()
        .map_err(|e| ThrottleError::http_error("client", e))?;

    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();

    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received, stopping after current calls");
                shutdown_token.cancel();
            }
            Err(err) => {
                error!(error = %err, "Failed to listen for shutdown signal");
            }
        }
    });

    // Both call sites draw on the same quota.
    let bucket = Arc::new(TokenBucket::from_config(&SETTINGS.rate_limit)?);

    let status_client = client.clone();
    let fetch_status = RateLimited::shared(
        move |url: String| {
            let client = status_client.clone();
            async move {
                let response = client
                    .head(&url)
                    .send()
                    .await
                    .map_err(|e| ThrottleError::http_error(&url, e))?;
                Ok::<_, ThrottleError>((url, response.status().as_u16()))
            }
        },
        Arc::clone(&bucket),
    );

    let fetch_body = RateLimited::shared(
        move |url: String| {
            let client = client.clone();
            async move {
                let body = client
                    .get(&url)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| ThrottleError::http_error(&url, e))?
                    .text()
                    .await
                    .map_err(|e| ThrottleError::http_error(&url, e))?;
                Ok::<_, ThrottleError>((url, body.len()))
            }
        },
        Arc::clone(&bucket),
    );

    'rounds: for round in 1..=SETTINGS.http.rounds {
        for url in &SETTINGS.http.urls {
            if cancel_token.is_cancelled() {
                info!("Shutdown requested, skipping remaining calls");
                break 'rounds;
            }

            let (status, body) = tokio::join!(
                fetch_status.call_async(url.clone()),
                fetch_body.call_async(url.clone())
            );

            match status {
                Ok((url, code)) => info!(round, url = %url, status = code, "HEAD completed"),
                Err(e) => warn!(round, error = %e, "HEAD failed"),
            }
            match body {
                Ok((url, bytes)) => info!(round, url = %url, bytes, "GET completed"),
                Err(e) => warn!(round, error = %e, "GET failed"),
            }
        }
    }

    bucket.metrics().log_summary();
    info!("Done");
    Ok(())
}
