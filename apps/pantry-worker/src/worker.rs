//! Periodic embedding-freshness loop.

use std::time::Duration;

use color_eyre::Result;

use pantry_service::{PantryService, freshness::RefreshOptions};

pub async fn run_worker(service: PantryService) -> Result<()> {
	let poll_interval = Duration::from_secs(service.cfg.freshness.poll_interval_secs);

	tracing::info!(poll_interval_secs = poll_interval.as_secs(), "Freshness worker started.");

	loop {
		let sleep = match service.refresh_embeddings(&RefreshOptions::default()).await {
			Ok(report) if report.rate_limited => {
				// Honor the provider's hint over the regular cadence.
				let wait = report
					.retry_after_secs
					.map(Duration::from_secs)
					.unwrap_or(poll_interval)
					.max(poll_interval);

				tracing::warn!(
					retry_after_secs = report.retry_after_secs,
					"Provider rate limit hit; backing off."
				);

				wait
			},
			Ok(_) => poll_interval,
			Err(err) => {
				tracing::error!(error = %err, "Embedding refresh run failed.");

				poll_interval
			},
		};

		tokio::time::sleep(sleep).await;
	}
}
