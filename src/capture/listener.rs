use dashmap::DashMap;
use log::{debug, error, info, trace, warn};
use pcap::{Active, Capture};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::capture::parser::{FrameParser, Framing};
use crate::utils::error::{AppError, AppResult};

/// Consecutive read errors tolerated before the capture is abandoned
const MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// Read timeout; lets the blocking reader notice a stop request
const READ_TIMEOUT_MS: i32 = 1000;

const SNAPLEN: i32 = 65536;

/// Passively watches inbound traffic and fires a one-shot notification the
/// first time a packet for an armed destination address is seen.
pub struct ReturnToMasterListener {
    /// Armed addresses and the channel to notify, one entry per address
    registrations: DashMap<Ipv4Addr, oneshot::Sender<Ipv4Addr>>,

    /// Cleared to make the reader thread exit
    running: AtomicBool,
}

impl ReturnToMasterListener {
    pub fn new() -> Self {
        Self {
            registrations: DashMap::new(),
            running: AtomicBool::new(false),
        }
    }

    /// Register interest in `address`, replacing any earlier registration
    pub fn arm(&self, address: Ipv4Addr, notify: oneshot::Sender<Ipv4Addr>) {
        if self.registrations.insert(address, notify).is_some() {
            debug!("Replaced existing fail-back registration for {}", address);
        }
        info!("Listening for traffic to {}", address);
    }

    /// Remove the registration for `address`, if any
    pub fn disarm(&self, address: Ipv4Addr) -> bool {
        let removed = self.registrations.remove(&address).is_some();
        if removed {
            info!("Stopped listening for traffic to {}", address);
        }
        removed
    }

    /// Remove the registration for `address` only if its receiver has been
    /// dropped. A registration re-armed by a newer owner is left in place.
    pub fn prune(&self, address: Ipv4Addr) -> bool {
        let removed = self
            .registrations
            .remove_if(&address, |_, notify| notify.is_closed())
            .is_some();
        if removed {
            debug!("Pruned abandoned fail-back registration for {}", address);
        }
        removed
    }

    pub fn is_armed(&self, address: Ipv4Addr) -> bool {
        self.registrations.contains_key(&address)
    }

    /// Handle one observed destination address. Returns `true` when it
    /// consumed a registration.
    pub fn observe(&self, destination: Ipv4Addr) -> bool {
        if !self.registrations.contains_key(&destination) {
            return false;
        }

        // remove before sending so a second packet cannot notify again
        let Some((address, notify)) = self.registrations.remove(&destination) else {
            return false;
        };

        info!("Traffic to {} observed, notifying", address);
        if notify.send(address).is_err() {
            debug!("Fail-back receiver for {} already gone", address);
        }
        true
    }

    /// Open the capture handle the reader consumes
    pub fn open_capture(interface: &str) -> AppResult<Capture<Active>> {
        info!("Opening capture on {}", interface);
        let mut capture = Capture::from_device(interface)?
            .promisc(true)
            .snaplen(SNAPLEN)
            .timeout(READ_TIMEOUT_MS)
            .open()
            .map_err(|e| AppError::CaptureError(format!("cannot open {}: {}", interface, e)))?;

        capture.filter("ip", true)?;
        Ok(capture)
    }

    /// Start the reader on the blocking pool
    pub fn spawn(self: &Arc<Self>, capture: Capture<Active>) -> JoinHandle<()> {
        let listener = Arc::clone(self);
        self.running.store(true, Ordering::SeqCst);
        tokio::task::spawn_blocking(move || listener.run(capture))
    }

    /// Ask the reader to exit after its current read
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Reader loop. Reads block for at most `READ_TIMEOUT_MS`; a timeout is
    /// not an error and only gives the loop a chance to see `stop`. Packets
    /// are handled as they arrive, the timeout does not batch them.
    fn run(&self, mut capture: Capture<Active>) {
        let parser = FrameParser::new(Framing::from(capture.get_datalink()));
        if let Framing::Unsupported(linktype) = parser.framing() {
            warn!("Unsupported capture link type {}, no packet will match", linktype);
        }
        info!("Return-to-master listener started ({:?} framing)", parser.framing());

        let mut consecutive_errors = 0;
        while self.running.load(Ordering::SeqCst) {
            match capture.next_packet() {
                Ok(packet) => {
                    consecutive_errors = 0;
                    if let Some(destination) = parser.destination(packet.data) {
                        self.observe(destination);
                    }
                }
                Err(pcap::Error::TimeoutExpired) => {
                    trace!("Capture read timed out, continuing");
                }
                Err(e) => {
                    consecutive_errors += 1;
                    error!("Error reading captured packet: {}", e);
                    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        error!(
                            "Too many consecutive capture errors ({}), listener stopping",
                            consecutive_errors
                        );
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("Return-to-master listener stopped");
    }
}

impl Default for ReturnToMasterListener {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::parser::tests::ethernet_frame;

    const MASTER: Ipv4Addr = Ipv4Addr::new(239, 1, 1, 1);
    const OTHER: Ipv4Addr = Ipv4Addr::new(239, 1, 1, 9);

    #[test]
    fn notifies_once_then_disarms() {
        let listener = ReturnToMasterListener::new();
        let (tx, mut rx) = oneshot::channel();
        listener.arm(MASTER, tx);

        assert!(listener.observe(MASTER));
        assert_eq!(rx.try_recv().unwrap(), MASTER);
        assert!(!listener.is_armed(MASTER));

        // second packet before re-arming produces nothing
        assert!(!listener.observe(MASTER));
    }

    #[test]
    fn unrelated_traffic_is_ignored() {
        let listener = ReturnToMasterListener::new();
        let (tx, mut rx) = oneshot::channel();
        listener.arm(MASTER, tx);

        assert!(!listener.observe(OTHER));
        assert!(rx.try_recv().is_err());
        assert!(listener.is_armed(MASTER));
    }

    #[test]
    fn arm_overwrites_previous_registration() {
        let listener = ReturnToMasterListener::new();
        let (first_tx, mut first_rx) = oneshot::channel();
        let (second_tx, mut second_rx) = oneshot::channel();
        listener.arm(MASTER, first_tx);
        listener.arm(MASTER, second_tx);

        assert!(listener.observe(MASTER));
        assert!(first_rx.try_recv().is_err());
        assert_eq!(second_rx.try_recv().unwrap(), MASTER);
    }

    #[test]
    fn disarm_is_safe_without_registration() {
        let listener = ReturnToMasterListener::new();
        assert!(!listener.disarm(MASTER));

        let (tx, _rx) = oneshot::channel();
        listener.arm(MASTER, tx);
        assert!(listener.disarm(MASTER));
        assert!(!listener.observe(MASTER));
    }

    #[test]
    fn prune_only_removes_abandoned_registrations() {
        let listener = ReturnToMasterListener::new();
        let (old_tx, old_rx) = oneshot::channel();
        listener.arm(MASTER, old_tx);
        drop(old_rx);
        assert!(listener.prune(MASTER));

        let (live_tx, _live_rx) = oneshot::channel();
        listener.arm(MASTER, live_tx);
        assert!(!listener.prune(MASTER));
        assert!(listener.is_armed(MASTER));
    }

    #[test]
    fn dropped_receiver_still_consumes_registration() {
        let listener = ReturnToMasterListener::new();
        let (tx, rx) = oneshot::channel();
        listener.arm(MASTER, tx);
        drop(rx);

        assert!(listener.observe(MASTER));
        assert!(!listener.is_armed(MASTER));
    }

    #[test]
    fn parsed_frame_reaches_registration() {
        let listener = ReturnToMasterListener::new();
        let parser = FrameParser::new(Framing::Ethernet);
        let (tx, mut rx) = oneshot::channel();
        listener.arm(MASTER, tx);

        let destination = parser.destination(&ethernet_frame(MASTER)).unwrap();
        assert!(listener.observe(destination));
        assert_eq!(rx.try_recv().unwrap(), MASTER);
    }
}
