use log::debug;
use parking_lot::Mutex;
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::transport::{transport_channel, TransportChannelType, TransportProtocol, TransportSender};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use crate::igmp::message::IgmpMessage;
use crate::models::filter::Filter;
use crate::utils::error::{AppError, AppResult};

const SEND_BUFFER_SIZE: usize = 4096;

/// An open connection that IGMP messages are sent through
pub trait IgmpSocket: Send + Sync {
    fn send(&self, message: &IgmpMessage, destination: Ipv4Addr) -> AppResult<()>;
}

/// Opens one connection per joined filter
pub trait IgmpConnector: Send + Sync {
    fn open(&self, filter: &Filter) -> AppResult<Arc<dyn IgmpSocket>>;
}

/// Raw IPv4 socket for protocol 2; the kernel builds the IP header
pub struct RawIgmpSocket {
    sender: Mutex<TransportSender>,
}

impl RawIgmpSocket {
    pub fn open() -> AppResult<Self> {
        let channel = TransportChannelType::Layer4(TransportProtocol::Ipv4(IpNextHeaderProtocols::Igmp));
        let (sender, _) = transport_channel(SEND_BUFFER_SIZE, channel)
            .map_err(|e| AppError::IoError(std::io::Error::new(e.kind(), format!("raw IGMP socket: {}", e))))?;
        Ok(Self {
            sender: Mutex::new(sender),
        })
    }
}

impl IgmpSocket for RawIgmpSocket {
    fn send(&self, message: &IgmpMessage, destination: Ipv4Addr) -> AppResult<()> {
        let sent = self.sender.lock().send_to(*message, IpAddr::V4(destination))?;
        debug!(
            "Sent IGMP type {:#04x} for {} ({} bytes)",
            message.kind(),
            destination,
            sent
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RawIgmpConnector;

impl IgmpConnector for RawIgmpConnector {
    fn open(&self, filter: &Filter) -> AppResult<Arc<dyn IgmpSocket>> {
        debug!("Opening IGMP socket for filter {}", filter.id);
        Ok(Arc::new(RawIgmpSocket::open()?))
    }
}
