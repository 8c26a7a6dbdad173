use log::{debug, error, info, trace, warn};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::capture::listener::ReturnToMasterListener;
use crate::models::event::{SwitchEvent, SwitchReason};
use crate::models::filter::{Filter, MonitorPhase, Side};
use crate::stats::collector::CounterSource;
use crate::switch::installer::RuleInstaller;
use crate::switch::registry::{WorkerRegistry, WorkerTicket};
use crate::switch::stall::{StallDetector, Verdict};
use crate::utils::error::{AppError, AppResult};

/// Buffered switch events per subscriber before the slowest one lags
const EVENT_CAPACITY: usize = 64;

/// Why a monitor loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MonitorExit {
    /// Slot cancelled through the registry
    Stopped,
    /// Automatic switching was turned off for the filter
    Disabled,
    /// The filter must move to its other side
    Switch(SwitchReason),
}

/// Failover decisions for every filter.
///
/// One monitor task runs per active address, tracked by the worker registry.
/// A monitor owns its filter's active side and byte counters until it hands
/// over: the rule swap completes before the successor is spawned.
pub struct SwitchEngine {
    counters: Arc<dyn CounterSource>,
    installer: Arc<dyn RuleInstaller>,
    listener: Option<Arc<ReturnToMasterListener>>,
    workers: WorkerRegistry,
    events: broadcast::Sender<SwitchEvent>,
}

impl SwitchEngine {
    pub fn new(
        counters: Arc<dyn CounterSource>,
        installer: Arc<dyn RuleInstaller>,
        listener: Option<Arc<ReturnToMasterListener>>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            counters,
            installer,
            listener,
            workers: WorkerRegistry::new(),
            events,
        }
    }

    /// Receive every completed switch from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SwitchEvent> {
        self.events.subscribe()
    }

    pub fn is_monitoring(&self, address: Ipv4Addr) -> bool {
        self.workers.is_running(address)
    }

    /// Decide each filter's initial side from the counters already present.
    ///
    /// A side with a counter already has a rule installed. With no rule at all
    /// the master rule is installed; with both, the slave rule is removed.
    pub fn install_default_rules<'a>(&self, filters: impl IntoIterator<Item = &'a Arc<Filter>>) {
        for filter in filters {
            let master_seen = self.counters.bytes_by_address(filter.master).is_ok();
            let slave_seen = self.counters.bytes_by_address(filter.slave).is_ok();

            let side = match (master_seen, slave_seen) {
                (true, true) => {
                    warn!(
                        "Filter {}: rules for both {} and {} present, removing slave rule",
                        filter.id, filter.master, filter.slave
                    );
                    let rule = filter.rule_for(Side::Slave);
                    if let Err(e) = self.installer.delete(&rule) {
                        warn!("Filter {}: failed to delete rule {}: {}", filter.id, rule, e);
                    }
                    self.counters.forget(filter.slave);
                    Side::Master
                }
                (false, true) => Side::Slave,
                (true, false) => Side::Master,
                (false, false) => {
                    let rule = filter.rule_for(Side::Master);
                    if let Err(e) = self.installer.add(&rule) {
                        warn!("Filter {}: failed to install rule {}: {}", filter.id, rule, e);
                    }
                    Side::Master
                }
            };

            filter.set_active_side(side);
            info!(
                "Filter {}: {} ({}) is active for {}",
                filter.id,
                side,
                filter.address_of(side),
                filter.route
            );
        }
    }

    /// Start monitoring the filter's active address.
    ///
    /// Returns `false` when a monitor for that address already runs or a
    /// switch is in progress (the switch starts its own successor).
    pub fn start_auto_switch(self: &Arc<Self>, filter: &Arc<Filter>) -> bool {
        if filter.phase() == MonitorPhase::SwitchPending {
            debug!("Filter {}: switch in progress, not starting a monitor", filter.id);
            return false;
        }

        let side = filter.active_side();
        let address = filter.address_of(side);
        let Some(ticket) = self.workers.try_claim(address, filter.id) else {
            debug!("Filter {}: monitor for {} already running", filter.id, address);
            return false;
        };

        let failback = match side {
            Side::Slave => self.arm_failback(filter),
            Side::Master => None,
        };

        filter.set_phase(MonitorPhase::Monitoring);
        let engine = Arc::clone(self);
        tokio::spawn(engine.run_monitor(Arc::clone(filter), side, ticket, failback));
        true
    }

    /// Stop the monitor for the filter's active address, if one runs
    pub fn stop_auto_switch(&self, filter: &Filter) -> bool {
        let address = filter.active_address();
        let stopped = self.workers.cancel(address);
        if stopped {
            info!("Filter {}: stopping monitor for {}", filter.id, address);
        } else {
            debug!("Filter {}: no monitor running for {}", filter.id, address);
        }
        stopped
    }

    /// Store the auto-switch flag, then start or stop the monitor
    pub fn set_auto_switch(self: &Arc<Self>, filter: &Arc<Filter>, enabled: bool) {
        filter.set_auto_switch(enabled);
        info!(
            "Filter {}: automatic switching {}",
            filter.id,
            if enabled { "enabled" } else { "disabled" }
        );
        if enabled {
            self.start_auto_switch(filter);
        } else {
            self.stop_auto_switch(filter);
        }
    }

    /// Move the filter to `target` on request. Only allowed while automatic
    /// switching is off; a rejected request touches no rules.
    pub async fn manual_switch(self: &Arc<Self>, filter: &Arc<Filter>, target: Side) -> AppResult<SwitchEvent> {
        if filter.auto_switch_enabled() {
            return Err(AppError::InvalidState(format!(
                "filter {} has automatic switching enabled, disable it first",
                filter.id
            )));
        }
        if filter.active_side() == target {
            return Err(AppError::InvalidState(format!(
                "filter {} is already on {}",
                filter.id, target
            )));
        }
        let Some(previous) = filter.begin_switch() else {
            return Err(AppError::InvalidState(format!(
                "filter {} is already switching",
                filter.id
            )));
        };

        let from = filter.active_side();
        let event = match self.switch_on_blocking_pool(filter, SwitchReason::Manual).await {
            Ok(event) => event,
            Err(e) => {
                filter.set_phase(previous);
                return Err(e);
            }
        };

        if previous == MonitorPhase::Monitoring {
            filter.set_phase(MonitorPhase::Monitoring);
        } else {
            filter.set_phase(MonitorPhase::Idle);
        }

        // automatic switching was enabled while the rules were being swapped
        if filter.auto_switch_enabled() {
            self.workers.cancel(filter.address_of(from));
            self.start_auto_switch(filter);
        }
        Ok(event)
    }

    /// Swap the live rule to the other side: delete first, then add, then flip
    /// the active side. Installer failures are logged and the flip still
    /// happens.
    pub fn change_filter(&self, filter: &Filter) -> Side {
        let from = filter.active_side();
        let to = from.other();

        let old_rule = filter.rule_for(from);
        if let Err(e) = self.installer.delete(&old_rule) {
            warn!("Filter {}: failed to delete rule {}: {}", filter.id, old_rule, e);
        }
        let new_rule = filter.rule_for(to);
        if let Err(e) = self.installer.add(&new_rule) {
            warn!("Filter {}: failed to install rule {}: {}", filter.id, new_rule, e);
        }

        filter.set_active_side(to);
        to
    }

    /// Stop every monitor
    pub fn shutdown(&self) {
        let stopped = self.workers.cancel_all();
        info!("Switch engine stopped {} monitor(s)", stopped);
    }

    /// Rule swap plus the bookkeeping every switch shares: the side left
    /// behind loses its counters so a later return starts from a baseline.
    fn perform_switch(&self, filter: &Filter, reason: SwitchReason) -> SwitchEvent {
        let from = filter.active_side();
        let to = self.change_filter(filter);

        filter.store_observed_bytes(from, None);
        self.counters.forget(filter.address_of(from));

        info!(
            "Filter {}: switched {} ({}) -> {} ({}), reason {:?}",
            filter.id,
            from,
            filter.address_of(from),
            to,
            filter.address_of(to),
            reason
        );

        let event = SwitchEvent::new(filter.id, from, to, reason);
        if self.events.send(event.clone()).is_err() {
            trace!("No subscribers for switch events");
        }
        event
    }

    /// `perform_switch` on the blocking pool. Installer calls run host
    /// commands synchronously and must not hold up other filters' monitors.
    async fn switch_on_blocking_pool(
        self: &Arc<Self>,
        filter: &Arc<Filter>,
        reason: SwitchReason,
    ) -> AppResult<SwitchEvent> {
        let engine = Arc::clone(self);
        let filter = Arc::clone(filter);
        tokio::task::spawn_blocking(move || engine.perform_switch(&filter, reason))
            .await
            .map_err(|e| AppError::CommandError(format!("rule swap task failed: {}", e)))
    }

    fn arm_failback(&self, filter: &Filter) -> Option<oneshot::Receiver<Ipv4Addr>> {
        if !filter.settings.return_to_master {
            return None;
        }
        let listener = self.listener.as_ref()?;

        let (notify, receiver) = oneshot::channel();
        listener.arm(filter.master, notify);
        filter.set_failback_armed(true);
        Some(receiver)
    }

    /// Drop this generation's fail-back receiver and its registration, if a
    /// newer generation has not replaced it
    fn release_failback(&self, filter: &Filter, failback: Option<oneshot::Receiver<Ipv4Addr>>) {
        let Some(receiver) = failback else {
            return;
        };
        drop(receiver);

        if let Some(listener) = &self.listener {
            listener.prune(filter.master);
            filter.set_failback_armed(listener.is_armed(filter.master));
        }
    }

    async fn run_monitor(
        self: Arc<Self>,
        filter: Arc<Filter>,
        side: Side,
        mut ticket: WorkerTicket,
        mut failback: Option<oneshot::Receiver<Ipv4Addr>>,
    ) {
        let period = filter.settings.poll_interval;
        let mut detector = StallDetector::new(filter.settings.failover_threshold);
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Filter {}: monitoring {} ({}) every {}ms, generation {}",
            ticket.filter_id,
            side,
            ticket.address,
            period.as_millis(),
            ticket.generation
        );

        let exit = loop {
            tokio::select! {
                _ = &mut ticket.stop => break MonitorExit::Stopped,
                notified = wait_failback(&mut failback) => match notified {
                    Some(address) => {
                        info!("Filter {}: traffic back on master {}", filter.id, address);
                        break MonitorExit::Switch(SwitchReason::Failback);
                    }
                    None => {
                        // registration replaced or consumed elsewhere
                        failback = None;
                    }
                },
                _ = ticker.tick() => {
                    if !filter.auto_switch_enabled() {
                        break MonitorExit::Disabled;
                    }
                    if self.sample(&filter, side, ticket.address, &mut detector) {
                        break MonitorExit::Switch(SwitchReason::Stall);
                    }
                }
            }
        };

        self.release_failback(&filter, failback);
        self.finish_monitor(&filter, side, ticket, exit).await;
    }

    /// One poll of the active counter. Returns `true` when the filter must
    /// fail over.
    fn sample(&self, filter: &Filter, side: Side, address: Ipv4Addr, detector: &mut StallDetector) -> bool {
        let current = match self.counters.bytes_by_address(address) {
            Ok(bytes) => bytes,
            Err(AppError::NotFound(_)) => {
                debug!("Filter {}: no counter for {} yet", filter.id, address);
                return false;
            }
            Err(e) => {
                error!("Filter {}: failed to read counter for {}: {}", filter.id, address, e);
                return false;
            }
        };

        match detector.observe(filter.observed_bytes(side), current) {
            Verdict::Baseline => {
                debug!("Filter {}: baseline for {} is {} bytes", filter.id, address, current);
                filter.store_observed_bytes(side, Some(current));
                false
            }
            Verdict::Growing => {
                trace!("Filter {}: {} at {} bytes", filter.id, address, current);
                filter.store_observed_bytes(side, Some(current));
                false
            }
            Verdict::Stalled(stalls) => {
                debug!(
                    "Filter {}: {} stalled at {} bytes ({}/{})",
                    filter.id, address, current, stalls, filter.settings.failover_threshold
                );
                false
            }
            Verdict::Failover => {
                warn!(
                    "Filter {}: no traffic growth on {} for {} polls, failing over",
                    filter.id, address, filter.settings.failover_threshold
                );
                true
            }
        }
    }

    async fn finish_monitor(self: &Arc<Self>, filter: &Arc<Filter>, side: Side, ticket: WorkerTicket, exit: MonitorExit) {
        let reason = match exit {
            MonitorExit::Stopped | MonitorExit::Disabled => {
                self.workers.release(ticket.address, ticket.generation);
                // a newer generation may already watch the same address
                if !self.workers.is_running(ticket.address) {
                    filter.end_monitoring();
                }
                info!(
                    "Filter {}: monitor for {} ended ({:?})",
                    filter.id, ticket.address, exit
                );
                return;
            }
            MonitorExit::Switch(reason) => reason,
        };

        let Some(previous) = filter.begin_switch() else {
            self.workers.release(ticket.address, ticket.generation);
            info!("Filter {}: switch already in progress, monitor exiting", filter.id);
            return;
        };
        // cancelled while deciding, or a manual switch already moved the filter
        if !self.workers.owns(ticket.address, ticket.generation) || filter.active_side() != side {
            self.workers.release(ticket.address, ticket.generation);
            filter.set_phase(previous);
            if !self.workers.is_running(filter.active_address()) {
                filter.end_monitoring();
            }
            info!(
                "Filter {}: monitor for {} no longer current, not switching",
                filter.id, ticket.address
            );
            return;
        }

        if let Err(e) = self.switch_on_blocking_pool(filter, reason).await {
            error!("Filter {}: {}", filter.id, e);
            self.workers.release(ticket.address, ticket.generation);
            filter.set_phase(MonitorPhase::Idle);
            return;
        }

        let owned = self.workers.release(ticket.address, ticket.generation);
        filter.set_phase(MonitorPhase::Idle);
        if owned && filter.auto_switch_enabled() {
            self.start_auto_switch(filter);
        } else if !owned {
            info!(
                "Filter {}: monitor for {} was cancelled during the switch, not restarting",
                filter.id, ticket.address
            );
        }
    }
}

/// Resolves with the notified address, `None` once the sender is gone, or
/// never when nothing is armed
async fn wait_failback(failback: &mut Option<oneshot::Receiver<Ipv4Addr>>) -> Option<Ipv4Addr> {
    match failback {
        Some(receiver) => receiver.await.ok(),
        None => std::future::pending().await,
    }
}
