use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{interval, MissedTickBehavior};

use crate::igmp::message::IgmpMessage;
use crate::igmp::socket::{IgmpConnector, IgmpSocket};
use crate::models::filter::{Filter, FilterId, FilterTable};
use crate::utils::error::{AppError, AppResult};

/// Requested membership state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipDirection {
    Join,
    Leave,
}

impl FromStr for MembershipDirection {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "on" | "join" => Ok(MembershipDirection::Join),
            "off" | "leave" => Ok(MembershipDirection::Leave),
            other => Err(AppError::InvalidParameter(format!(
                "direction must be on or off, got '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for MembershipDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MembershipDirection::Join => f.write_str("join"),
            MembershipDirection::Leave => f.write_str("leave"),
        }
    }
}

struct PoolEntry {
    socket: Arc<dyn IgmpSocket>,
    stop: oneshot::Sender<()>,
}

/// Keeps IGMP membership of each filter's master and slave groups alive,
/// independent of which side is active.
///
/// The pool holds at most one open connection per filter. Its lock is only
/// taken for single map operations, never while sending.
pub struct MembershipManager {
    filters: Arc<FilterTable>,
    connector: Arc<dyn IgmpConnector>,
    report_interval: Duration,
    pool: Mutex<HashMap<FilterId, PoolEntry>>,
}

impl MembershipManager {
    pub fn new(filters: Arc<FilterTable>, connector: Arc<dyn IgmpConnector>, report_interval: Duration) -> Self {
        Self {
            filters,
            connector,
            report_interval,
            pool: Mutex::new(HashMap::new()),
        }
    }

    /// Start a worker for every filter not already in the requested state.
    /// Returns the number of workers started.
    pub fn toggle_all(self: &Arc<Self>, direction: MembershipDirection) -> usize {
        let mut started = 0;
        for filter in self.filters.iter() {
            let joined = filter.is_multicast_joined();
            let needed = match direction {
                MembershipDirection::Join => !joined,
                MembershipDirection::Leave => joined,
            };
            if needed {
                self.spawn_worker(Arc::clone(filter), direction);
                started += 1;
            }
        }
        info!("IGMP {} requested for all filters, {} worker(s) started", direction, started);
        started
    }

    pub fn toggle_by_id(self: &Arc<Self>, id: FilterId, direction: MembershipDirection) -> AppResult<()> {
        let filter = self.filters.get(id)?;
        if direction == MembershipDirection::Join && filter.is_multicast_joined() {
            return Err(AppError::AlreadyInState(format!(
                "filter {} has already joined its groups",
                id
            )));
        }

        info!("IGMP {} requested for filter {}", direction, id);
        self.spawn_worker(filter, direction);
        Ok(())
    }

    /// Leave every joined filter's groups inline
    pub fn leave_all(&self) -> usize {
        let ids: Vec<FilterId> = self.pool.lock().keys().copied().collect();
        let mut left = 0;
        for id in ids {
            if let Ok(filter) = self.filters.get(id) {
                if self.leave(&filter) {
                    left += 1;
                }
            }
        }
        info!("Left multicast groups of {} filter(s)", left);
        left
    }

    pub fn is_connected(&self, id: FilterId) -> bool {
        self.pool.lock().contains_key(&id)
    }

    fn spawn_worker(self: &Arc<Self>, filter: Arc<Filter>, direction: MembershipDirection) {
        let manager = Arc::clone(self);
        match direction {
            MembershipDirection::Join => {
                tokio::spawn(async move { manager.run_join(filter).await });
            }
            MembershipDirection::Leave => {
                tokio::spawn(async move {
                    manager.leave(&filter);
                });
            }
        }
    }

    /// Announce both groups now and then every report interval, until the
    /// leave worker stops this connection. Stopping does not touch the
    /// joined flag.
    async fn run_join(&self, filter: Arc<Filter>) {
        let groups = multicast_groups(&filter);
        if groups.is_empty() {
            warn!("Filter {}: no multicast address to join", filter.id);
            return;
        }

        let socket = match self.connector.open(&filter) {
            Ok(socket) => socket,
            Err(e) => {
                error!("Filter {}: cannot open IGMP connection: {}", filter.id, e);
                return;
            }
        };

        let (stop_tx, mut stop_rx) = oneshot::channel();
        {
            let mut pool = self.pool.lock();
            if pool.contains_key(&filter.id) {
                debug!("Filter {}: join worker already running", filter.id);
                return;
            }
            pool.insert(
                filter.id,
                PoolEntry {
                    socket: Arc::clone(&socket),
                    stop: stop_tx,
                },
            );
        }

        filter.set_multicast_joined(true);
        info!("Filter {}: joined {:?}", filter.id, groups);

        let reports: Vec<(Ipv4Addr, IgmpMessage)> =
            groups.iter().map(|&group| (group, IgmpMessage::join(group))).collect();
        let mut ticker = interval(self.report_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut stop_rx => {
                    debug!("Filter {}: membership reports stopped", filter.id);
                    break;
                }
                _ = ticker.tick() => {
                    for (group, report) in &reports {
                        if let Err(e) = socket.send(report, *group) {
                            warn!("Filter {}: membership report for {} failed: {}", filter.id, group, e);
                        }
                    }
                }
            }
        }
    }

    /// Stop the filter's reports and send leave messages for both groups.
    /// Returns `false` when the filter had no open connection.
    fn leave(&self, filter: &Filter) -> bool {
        let Some(entry) = self.pool.lock().remove(&filter.id) else {
            debug!("Filter {}: no IGMP connection to leave", filter.id);
            return false;
        };

        // the join worker may already be gone
        let _ = entry.stop.send(());

        for group in multicast_groups(filter) {
            if let Err(e) = entry.socket.send(&IgmpMessage::leave(group), group) {
                warn!("Filter {}: leave for {} failed: {}", filter.id, group, e);
            }
        }
        drop(entry.socket);

        filter.set_multicast_joined(false);
        info!("Filter {}: left multicast groups", filter.id);
        true
    }
}

/// The filter's master and slave addresses that are multicast groups
fn multicast_groups(filter: &Filter) -> Vec<Ipv4Addr> {
    [filter.master, filter.slave]
        .into_iter()
        .filter(|address| {
            if address.is_multicast() {
                true
            } else {
                warn!("Filter {}: {} is not a multicast address, skipping", filter.id, address);
                false
            }
        })
        .collect()
}
