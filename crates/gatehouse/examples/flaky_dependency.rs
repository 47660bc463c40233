//! Drives a gate against a dependency that fails in bursts.
//!
//! Settings come from `FLAKY_*` environment variables (for example
//! `FLAKY_ERROR_THRESHOLD=0.3 FLAKY_REOPEN_TIMES=1,2,4`), falling back to a
//! short demo schedule.
//!
//! Run with: `RUST_LOG=gatehouse=debug cargo run -p gatehouse --example flaky_dependency`

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gatehouse::{config, Gate, GateEvent, GateSettings};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, thiserror::Error)]
#[error("upstream returned 503 on request {0}")]
struct Unavailable(u32);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flaky_dependency=info,gatehouse=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = if std::env::var("FLAKY_ERROR_THRESHOLD").is_ok() {
        config::load_from_env("FLAKY")?
    } else {
        GateSettings::builder()
            .requests_before_tracking(5)
            .error_threshold_percentage(0.3)
            .retry_count(1)
            .re_open_times_in_seconds([1, 2, 4])
            .build()?
    };

    let gate = Gate::builder("upstream")
        .settings(settings)
        .listener(|_gate: &Gate, event: &GateEvent| {
            tracing::warn!(%event, "Upstream gate closed");
        })
        .build()?;

    let requests = Arc::new(AtomicU32::new(0));
    for _ in 0..60 {
        let counter = Arc::clone(&requests);
        let result = gate
            .execute(|| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    // Fails for 10 out of every 25 requests
                    if n % 25 < 10 {
                        Err(Unavailable(n))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        match result {
            Ok(n) => tracing::info!(request = n, "Served"),
            Err(err) if err.is_rejected() => tracing::info!(%err, "Shed"),
            Err(err) => tracing::warn!(%err, "Failed"),
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let status = gate.metrics();
    tracing::info!(
        processed = status.processed_total,
        failed = status.error_total,
        backoff_position = status.backoff_position,
        "Done"
    );
    println!("{}", serde_json::to_string_pretty(&gate.states())?);
    Ok(())
}
