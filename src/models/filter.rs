use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::models::config::{AppConfig, FilterConfig};
use crate::switch::installer::RedirectRule;
use crate::utils::error::{AppError, AppResult};

/// Stable filter identity, assigned in config order starting at 1
pub type FilterId = u32;

/// One half of a master/slave pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Master,
    Slave,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::Master => Side::Slave,
            Side::Slave => Side::Master,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Master => f.write_str("master"),
            Side::Slave => f.write_str("slave"),
        }
    }
}

impl FromStr for Side {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "master" => Ok(Side::Master),
            "slave" => Ok(Side::Slave),
            other => Err(AppError::InvalidParameter(format!(
                "side must be master or slave, got '{}'",
                other
            ))),
        }
    }
}

/// Where a filter is in its monitoring lifecycle.
///
/// `Idle -> Monitoring -> SwitchPending -> Monitoring` (other side), or back to
/// `Idle` when automatic switching is stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MonitorPhase {
    Idle,
    Monitoring,
    SwitchPending,
}

/// Static switching parameters of a filter
#[derive(Debug, Clone)]
pub struct SwitchSettings {
    pub failover_threshold: u32,
    pub poll_interval: Duration,
    pub master_priority: u16,
    pub slave_priority: u16,
    pub return_to_master: bool,
}

#[derive(Debug, Default)]
struct ObservedBytes {
    master: Option<u64>,
    slave: Option<u64>,
}

/// A monitored master/slave route pair.
///
/// Identity and settings are fixed at load time. The mutable fields are split
/// by owner: the active side and byte counters belong to the filter's current
/// monitor, the membership flag to the membership manager, and the fail-back
/// flag to whoever arms the listener.
#[derive(Debug)]
pub struct Filter {
    pub id: FilterId,
    pub interface: String,
    pub master: Ipv4Addr,
    pub slave: Ipv4Addr,
    pub route: Ipv4Addr,
    pub settings: SwitchSettings,

    is_master_active: AtomicBool,
    auto_switch: AtomicBool,
    multicast_joined: AtomicBool,
    failback_armed: AtomicBool,
    observed: Mutex<ObservedBytes>,
    phase: Mutex<MonitorPhase>,
}

impl Filter {
    pub fn new(
        id: FilterId,
        interface: impl Into<String>,
        master: Ipv4Addr,
        slave: Ipv4Addr,
        route: Ipv4Addr,
        settings: SwitchSettings,
        auto_switch: bool,
    ) -> Self {
        Self {
            id,
            interface: interface.into(),
            master,
            slave,
            route,
            settings,
            is_master_active: AtomicBool::new(true),
            auto_switch: AtomicBool::new(auto_switch),
            multicast_joined: AtomicBool::new(false),
            failback_armed: AtomicBool::new(false),
            observed: Mutex::new(ObservedBytes::default()),
            phase: Mutex::new(MonitorPhase::Idle),
        }
    }

    /// Build a filter from its config entry
    pub fn from_config(id: FilterId, app: &AppConfig, config: &FilterConfig) -> Self {
        let settings = SwitchSettings {
            failover_threshold: config.switch_tries,
            poll_interval: Duration::from_millis(
                config.poll_interval_ms.unwrap_or(app.stats_frequency_ms),
            ),
            master_priority: config.master.priority,
            slave_priority: config.slave.priority,
            return_to_master: app.return_to_master,
        };
        Self::new(
            id,
            app.interface.clone(),
            config.master.ip,
            config.slave.ip,
            config.route,
            settings,
            config.auto_switch,
        )
    }

    pub fn active_side(&self) -> Side {
        if self.is_master_active.load(Ordering::SeqCst) {
            Side::Master
        } else {
            Side::Slave
        }
    }

    pub fn set_active_side(&self, side: Side) {
        self.is_master_active.store(side == Side::Master, Ordering::SeqCst);
    }

    pub fn active_address(&self) -> Ipv4Addr {
        self.address_of(self.active_side())
    }

    pub fn address_of(&self, side: Side) -> Ipv4Addr {
        match side {
            Side::Master => self.master,
            Side::Slave => self.slave,
        }
    }

    pub fn priority_of(&self, side: Side) -> u16 {
        match side {
            Side::Master => self.settings.master_priority,
            Side::Slave => self.settings.slave_priority,
        }
    }

    /// The redirect rule that makes `side` the live source for this route
    pub fn rule_for(&self, side: Side) -> RedirectRule {
        RedirectRule {
            interface: self.interface.clone(),
            priority: self.priority_of(side),
            source: self.address_of(side),
            route: self.route,
        }
    }

    pub fn observed_bytes(&self, side: Side) -> Option<u64> {
        let observed = self.observed.lock();
        match side {
            Side::Master => observed.master,
            Side::Slave => observed.slave,
        }
    }

    pub fn store_observed_bytes(&self, side: Side, bytes: Option<u64>) {
        let mut observed = self.observed.lock();
        match side {
            Side::Master => observed.master = bytes,
            Side::Slave => observed.slave = bytes,
        }
    }

    pub fn auto_switch_enabled(&self) -> bool {
        self.auto_switch.load(Ordering::SeqCst)
    }

    pub fn set_auto_switch(&self, enabled: bool) {
        self.auto_switch.store(enabled, Ordering::SeqCst);
    }

    pub fn is_multicast_joined(&self) -> bool {
        self.multicast_joined.load(Ordering::SeqCst)
    }

    pub fn set_multicast_joined(&self, joined: bool) {
        self.multicast_joined.store(joined, Ordering::SeqCst);
    }

    pub fn is_failback_armed(&self) -> bool {
        self.failback_armed.load(Ordering::SeqCst)
    }

    pub fn set_failback_armed(&self, armed: bool) {
        self.failback_armed.store(armed, Ordering::SeqCst);
    }

    pub fn phase(&self) -> MonitorPhase {
        *self.phase.lock()
    }

    pub fn set_phase(&self, phase: MonitorPhase) {
        *self.phase.lock() = phase;
    }

    /// Enter `SwitchPending`. Returns the previous phase, or `None` if a
    /// switch is already in progress.
    pub fn begin_switch(&self) -> Option<MonitorPhase> {
        let mut phase = self.phase.lock();
        if *phase == MonitorPhase::SwitchPending {
            return None;
        }
        let previous = *phase;
        *phase = MonitorPhase::SwitchPending;
        Some(previous)
    }

    /// Leave `Monitoring` for `Idle`; any other phase is left alone
    pub fn end_monitoring(&self) {
        let mut phase = self.phase.lock();
        if *phase == MonitorPhase::Monitoring {
            *phase = MonitorPhase::Idle;
        }
    }

    /// Serializable point-in-time view
    pub fn snapshot(&self) -> FilterView {
        let observed = self.observed.lock();
        FilterView {
            id: self.id,
            interface_name: self.interface.clone(),
            master_address: self.master,
            slave_address: self.slave,
            destination_route: self.route,
            is_master_active: self.active_side() == Side::Master,
            master_observed_bytes: observed.master,
            slave_observed_bytes: observed.slave,
            is_multicast_joined: self.is_multicast_joined(),
            is_return_to_master_armed: self.is_failback_armed(),
            phase: self.phase(),
            config: FilterSettingsView {
                failover_threshold: self.settings.failover_threshold,
                poll_interval_ms: self.settings.poll_interval.as_millis() as u64,
                master_rule_priority: self.settings.master_priority,
                slave_rule_priority: self.settings.slave_priority,
                auto_switch_enabled: self.auto_switch_enabled(),
            },
        }
    }
}

/// JSON view of a filter for the control plane
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterView {
    pub id: FilterId,
    pub interface_name: String,
    pub master_address: Ipv4Addr,
    pub slave_address: Ipv4Addr,
    pub destination_route: Ipv4Addr,
    pub is_master_active: bool,
    pub master_observed_bytes: Option<u64>,
    pub slave_observed_bytes: Option<u64>,
    pub is_multicast_joined: bool,
    pub is_return_to_master_armed: bool,
    pub phase: MonitorPhase,
    pub config: FilterSettingsView,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSettingsView {
    pub failover_threshold: u32,
    pub poll_interval_ms: u64,
    pub master_rule_priority: u16,
    pub slave_rule_priority: u16,
    pub auto_switch_enabled: bool,
}

/// All filters of the process, fixed after startup
#[derive(Debug, Default)]
pub struct FilterTable {
    filters: BTreeMap<FilterId, Arc<Filter>>,
}

impl FilterTable {
    pub fn from_config(config: &AppConfig) -> Self {
        let filters = config
            .filters
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let id = index as FilterId + 1;
                (id, Arc::new(Filter::from_config(id, config, entry)))
            })
            .collect();
        Self { filters }
    }

    pub fn from_filters(filters: impl IntoIterator<Item = Filter>) -> Self {
        Self {
            filters: filters.into_iter().map(|f| (f.id, Arc::new(f))).collect(),
        }
    }

    pub fn get(&self, id: FilterId) -> AppResult<Arc<Filter>> {
        self.filters.get(&id).cloned().ok_or(AppError::UnknownId(id))
    }

    /// Filters in id order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Filter>> {
        self.filters.values()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn snapshot(&self) -> Vec<FilterView> {
        self.iter().map(|f| f.snapshot()).collect()
    }
}
