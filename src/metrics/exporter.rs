//! Prometheus metrics exporter
//!
//! HTTP endpoint for Prometheus scraping.

use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::counters::CounterSnapshot;
use crate::allocator::PoolRegistry;
use crate::config::MetricsConfig;

/// Initialize the Prometheus metrics exporter
pub fn init_metrics(config: &MetricsConfig, registry: Arc<PoolRegistry>) -> Result<()> {
    // Register metric descriptions
    describe_gauge!("reservepool_enabled", "Whether the fast path is enabled");
    describe_gauge!("reservepool_bucket_count", "Blocks cached in the bucket");
    describe_gauge!("reservepool_bucket_low", "Low watermark of the bucket");
    describe_gauge!("reservepool_bucket_high", "High watermark of the bucket");
    describe_counter!("reservepool_fast_hits", "Allocations served from the reserve");
    describe_counter!("reservepool_slow_misses", "Allocations left to the backing allocator");
    describe_counter!("reservepool_gate_denials", "Allocations refused by the priority gate");
    describe_counter!("reservepool_retries", "Retry sleeps consumed by allocations");
    describe_counter!("reservepool_retry_depth", "Allocations that retried, by number of sleeps");
    describe_counter!("reservepool_returns", "Blocks taken back by the reserve");
    describe_counter!("reservepool_returns_rejected", "Blocks refused by a full reserve");
    describe_counter!("reservepool_refill_passes", "Buckets topped up by the refill worker");
    describe_counter!("reservepool_refill_failures", "Backing failures during refill");

    // Build and install the Prometheus exporter
    PrometheusBuilder::new()
        .with_http_listener(config.bind_addr)
        .install()?;

    // Start background task to sync bucket state to metrics crate
    tokio::spawn(sync_metrics_task(registry));

    Ok(())
}

/// Background task that periodically syncs bucket state to the metrics crate
async fn sync_metrics_task(registry: Arc<PoolRegistry>) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    let mut last: HashMap<(u32, u8), CounterSnapshot> = HashMap::new();

    loop {
        interval.tick().await;

        let dump = registry.dump();
        gauge!("reservepool_enabled").set(if dump.enabled { 1.0 } else { 0.0 });

        for bucket in &dump.buckets {
            let order = bucket.order.to_string();
            let class = bucket.class.to_string();

            gauge!("reservepool_bucket_count", "order" => order.clone(), "class" => class.clone())
                .set(bucket.stats.count as f64);
            gauge!("reservepool_bucket_low", "order" => order.clone(), "class" => class.clone())
                .set(bucket.stats.low as f64);
            gauge!("reservepool_bucket_high", "order" => order.clone(), "class" => class.clone())
                .set(bucket.stats.high as f64);

            let Some(snapshot) = bucket.counters else {
                continue;
            };
            let prev = last
                .insert((bucket.order, bucket.class.0), snapshot)
                .unwrap_or_default();

            // Update counters with deltas
            let deltas = [
                ("reservepool_fast_hits", snapshot.fast_hits, prev.fast_hits),
                ("reservepool_slow_misses", snapshot.slow_misses, prev.slow_misses),
                ("reservepool_gate_denials", snapshot.gate_denials, prev.gate_denials),
                ("reservepool_retries", snapshot.retries, prev.retries),
                ("reservepool_returns", snapshot.returns, prev.returns),
                ("reservepool_returns_rejected", snapshot.returns_rejected, prev.returns_rejected),
                ("reservepool_refill_passes", snapshot.refill_passes, prev.refill_passes),
                ("reservepool_refill_failures", snapshot.refill_failures, prev.refill_failures),
            ];
            for (name, now, before) in deltas {
                let delta = now.saturating_sub(before);
                if delta > 0 {
                    counter!(name, "order" => order.clone(), "class" => class.clone())
                        .increment(delta);
                }
            }

            for (k, (now, before)) in snapshot
                .retry_depths
                .iter()
                .zip(prev.retry_depths)
                .enumerate()
            {
                let delta = now.saturating_sub(before);
                if delta > 0 {
                    counter!(
                        "reservepool_retry_depth",
                        "order" => order.clone(),
                        "class" => class.clone(),
                        "depth" => (k + 1).to_string()
                    )
                    .increment(delta);
                }
            }
        }
    }
}
