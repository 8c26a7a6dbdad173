use dashmap::DashMap;
use log::{debug, error, info, trace};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::stats::parser::parse_filter_stats;
use crate::utils::command;
use crate::utils::error::{AppError, AppResult};

/// Read side of the traffic counters, as consumed by the switch engine
pub trait CounterSource: Send + Sync {
    /// Most recent cumulative byte counter for `address`, or `NotFound`
    fn bytes_by_address(&self, address: Ipv4Addr) -> AppResult<u64>;

    /// Drop the cached counter so the next sample starts a fresh baseline
    fn forget(&self, address: Ipv4Addr);
}

/// Polls tc ingress filter statistics and caches the latest counter per
/// destination address
pub struct StatisticsCollector {
    /// Interface whose ingress filters are reported
    interface: String,

    /// Last sampled counter per address, last write wins
    cache: DashMap<Ipv4Addr, u64>,
}

impl StatisticsCollector {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            cache: DashMap::new(),
        }
    }

    /// Most recent counter for `address`
    pub fn get_bytes_by_address(&self, address: Ipv4Addr) -> AppResult<u64> {
        self.cache
            .get(&address)
            .map(|entry| *entry.value())
            .ok_or(AppError::NotFound(address))
    }

    /// Evict a cached counter
    pub fn forget(&self, address: Ipv4Addr) {
        if self.cache.remove(&address).is_some() {
            debug!("Forgot cached counter for {}", address);
        }
    }

    /// Replace cached counters with a fresh set of samples
    pub fn ingest(&self, samples: impl IntoIterator<Item = (Ipv4Addr, u64)>) -> usize {
        let mut count = 0;
        for (address, bytes) in samples {
            self.cache.insert(address, bytes);
            count += 1;
        }
        count
    }

    /// Run the tc statistics command once and ingest its output.
    ///
    /// Blocks for the duration of the command.
    pub fn sample_once(&self) -> AppResult<usize> {
        let output = command::run(
            "tc",
            &["-s", "-pretty", "filter", "show", "ingress", "dev", &self.interface],
        )?;
        Ok(self.ingest(parse_filter_stats(&output)))
    }

    /// Start the background poll loop.
    ///
    /// The first sample is taken one period from now; callers are expected to
    /// have taken a synchronous sample at startup. A failing sample ends the
    /// loop, leaving the cache with its last values.
    pub fn spawn(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let collector = Arc::clone(self);
        tokio::spawn(async move {
            info!(
                "Statistics collector polling {} every {}ms",
                collector.interface,
                period.as_millis()
            );
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let sampler = Arc::clone(&collector);
                match tokio::task::spawn_blocking(move || sampler.sample_once()).await {
                    Ok(Ok(count)) => trace!("Sampled {} counters", count),
                    Ok(Err(e)) => {
                        error!("Traffic statistics unavailable, collector stopping: {}", e);
                        break;
                    }
                    Err(e) => {
                        error!("Statistics sampling task failed, collector stopping: {}", e);
                        break;
                    }
                }
            }
        })
    }
}

impl CounterSource for StatisticsCollector {
    fn bytes_by_address(&self, address: Ipv4Addr) -> AppResult<u64> {
        self.get_bytes_by_address(address)
    }

    fn forget(&self, address: Ipv4Addr) {
        StatisticsCollector::forget(self, address)
    }
}
