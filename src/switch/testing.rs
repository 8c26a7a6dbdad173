//! Test doubles for the switch engine's collaborators

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::stats::collector::CounterSource;
use crate::switch::installer::{RedirectRule, RuleInstaller};
use crate::utils::error::{AppError, AppResult};

/// Counter source that replays a scripted sequence per address. Each read
/// consumes one value; the last value repeats once the script runs out.
#[derive(Default)]
pub struct ScriptedCounters {
    scripts: Mutex<HashMap<Ipv4Addr, VecDeque<u64>>>,
    reads: Mutex<HashMap<Ipv4Addr, usize>>,
    forgotten: Mutex<Vec<Ipv4Addr>>,
}

impl ScriptedCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, address: Ipv4Addr, values: &[u64]) {
        self.scripts
            .lock()
            .insert(address, values.iter().copied().collect());
    }

    pub fn reads(&self, address: Ipv4Addr) -> usize {
        self.reads.lock().get(&address).copied().unwrap_or(0)
    }

    pub fn forgotten(&self) -> Vec<Ipv4Addr> {
        self.forgotten.lock().clone()
    }
}

impl CounterSource for ScriptedCounters {
    fn bytes_by_address(&self, address: Ipv4Addr) -> AppResult<u64> {
        *self.reads.lock().entry(address).or_insert(0) += 1;

        let mut scripts = self.scripts.lock();
        let script = scripts
            .get_mut(&address)
            .filter(|values| !values.is_empty())
            .ok_or(AppError::NotFound(address))?;
        if script.len() > 1 {
            Ok(script.pop_front().unwrap_or_default())
        } else {
            Ok(script[0])
        }
    }

    fn forget(&self, address: Ipv4Addr) {
        self.scripts.lock().remove(&address);
        self.forgotten.lock().push(address);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOp {
    Add(Ipv4Addr),
    Delete(Ipv4Addr),
}

/// Rule installer that records every call and tracks which sources are
/// installed per route. With a delay each call blocks its thread, like a
/// slow `tc` invocation.
#[derive(Default)]
pub struct RecordingInstaller {
    ops: Mutex<Vec<RuleOp>>,
    installed: Mutex<HashMap<Ipv4Addr, BTreeSet<Ipv4Addr>>>,
    overlap: AtomicBool,
    delay: Option<Duration>,
    spans: Mutex<Vec<(Instant, Instant)>>,
}

impl RecordingInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Delayed calls that have started, finished or not
    pub fn calls_started(&self) -> usize {
        self.spans.lock().len()
    }

    /// From the start of the first call to the end of the last finished one
    pub fn busy_window(&self) -> Option<(Instant, Instant)> {
        let spans = self.spans.lock();
        let first = spans.first()?.0;
        let last = spans.iter().map(|(_, end)| *end).max()?;
        Some((first, last))
    }

    fn block(&self) {
        let Some(delay) = self.delay else {
            return;
        };
        let started = Instant::now();
        let index = {
            let mut spans = self.spans.lock();
            spans.push((started, started));
            spans.len() - 1
        };
        std::thread::sleep(delay);
        self.spans.lock()[index].1 = Instant::now();
    }

    /// Mark a rule as present without recording an operation
    pub fn preinstall(&self, rule: &RedirectRule) {
        self.installed
            .lock()
            .entry(rule.route)
            .or_default()
            .insert(rule.source);
    }

    pub fn ops(&self) -> Vec<RuleOp> {
        self.ops.lock().clone()
    }

    pub fn installed_for(&self, route: Ipv4Addr) -> Vec<Ipv4Addr> {
        self.installed
            .lock()
            .get(&route)
            .map(|sources| sources.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Whether two rules for one route were ever installed at the same time
    pub fn saw_overlap(&self) -> bool {
        self.overlap.load(Ordering::SeqCst)
    }
}

impl RuleInstaller for RecordingInstaller {
    fn add(&self, rule: &RedirectRule) -> AppResult<()> {
        self.block();
        self.ops.lock().push(RuleOp::Add(rule.source));
        let mut installed = self.installed.lock();
        let sources = installed.entry(rule.route).or_default();
        sources.insert(rule.source);
        if sources.len() > 1 {
            self.overlap.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    fn delete(&self, rule: &RedirectRule) -> AppResult<()> {
        self.block();
        self.ops.lock().push(RuleOp::Delete(rule.source));
        let removed = self
            .installed
            .lock()
            .get_mut(&rule.route)
            .map(|sources| sources.remove(&rule.source))
            .unwrap_or(false);
        if removed {
            Ok(())
        } else {
            Err(AppError::CommandError(format!("no rule for {}", rule.source)))
        }
    }
}
