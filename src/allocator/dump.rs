//! Read-only pool report

use serde::Serialize;
use std::fmt;

use crate::metrics::CounterSnapshot;
use crate::pool::{AllocClass, BucketStats};

/// State of one (order, class) bucket
#[derive(Debug, Clone, Serialize)]
pub struct BucketReport {
    pub order: u32,
    pub block_size: usize,
    pub class: AllocClass,
    #[serde(flatten)]
    pub stats: BucketStats,
    /// Present when a counting metrics sink is installed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counters: Option<CounterSnapshot>,
}

/// Every bucket of every pool
#[derive(Debug, Clone, Serialize)]
pub struct PoolDump {
    pub enabled: bool,
    pub worker_running: bool,
    pub buckets: Vec<BucketReport>,
}

impl PoolDump {
    pub fn bucket(&self, order: u32, class: AllocClass) -> Option<&BucketReport> {
        self.buckets
            .iter()
            .find(|b| b.order == order && b.class == class)
    }
}

impl fmt::Display for PoolDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.buckets {
            writeln!(
                f,
                "order:{} class:{} low:{} high:{} count:{}",
                b.order, b.class, b.stats.low, b.stats.high, b.stats.count
            )?;
        }
        for b in &self.buckets {
            if let Some(c) = &b.counters {
                writeln!(
                    f,
                    "order:{} class:{} fast:{} slow:{} denied:{} retries:{} returns:{} rejected:{} refills:{} refill_failures:{}",
                    b.order,
                    b.class,
                    c.fast_hits,
                    c.slow_misses,
                    c.gate_denials,
                    c.retries,
                    c.returns,
                    c.returns_rejected,
                    c.refill_passes,
                    c.refill_failures
                )?;
                for (k, n) in c.retry_depths.iter().enumerate() {
                    writeln!(f, "order:{} class:{} retry_depth[{}]:{}", b.order, b.class, k, n)?;
                }
            }
        }
        Ok(())
    }
}
