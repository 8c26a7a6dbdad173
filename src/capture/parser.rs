use log::{log_enabled, trace, Level};
use pcap::Linktype;
use pnet::packet::{
    ethernet::{EtherTypes, EthernetPacket},
    ipv4::Ipv4Packet,
    Packet as PnetPacket,
};
use std::net::Ipv4Addr;

/// Linux cooked capture header length (pcap `LINUX_SLL`)
const SLL_HEADER_LEN: usize = 16;
const SLL_PROTOCOL_OFFSET: usize = 14;

/// Link layer framing of captured packets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Ethernet,
    LinuxCooked,
    RawIp,
    Unsupported(i32),
}

impl From<Linktype> for Framing {
    fn from(linktype: Linktype) -> Self {
        match linktype {
            Linktype::ETHERNET => Framing::Ethernet,
            Linktype::LINUX_SLL => Framing::LinuxCooked,
            // 228 is LINKTYPE_IPV4
            Linktype::RAW | Linktype(228) => Framing::RawIp,
            Linktype(other) => Framing::Unsupported(other),
        }
    }
}

/// Pulls the IPv4 destination out of captured frames
#[derive(Debug, Clone, Copy)]
pub struct FrameParser {
    framing: Framing,
}

impl FrameParser {
    pub fn new(framing: Framing) -> Self {
        Self { framing }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Destination address of an IPv4 frame, `None` for anything else
    pub fn destination(&self, frame: &[u8]) -> Option<Ipv4Addr> {
        let destination = match self.framing {
            Framing::Ethernet => {
                let eth = EthernetPacket::new(frame)?;
                if eth.get_ethertype() != EtherTypes::Ipv4 {
                    return None;
                }
                Self::ipv4_destination(eth.payload())
            }
            Framing::LinuxCooked => {
                if frame.len() < SLL_HEADER_LEN {
                    return None;
                }
                let protocol = u16::from_be_bytes([
                    frame[SLL_PROTOCOL_OFFSET],
                    frame[SLL_PROTOCOL_OFFSET + 1],
                ]);
                if protocol != EtherTypes::Ipv4.0 {
                    return None;
                }
                Self::ipv4_destination(&frame[SLL_HEADER_LEN..])
            }
            Framing::RawIp => Self::ipv4_destination(frame),
            Framing::Unsupported(_) => None,
        };

        if log_enabled!(Level::Trace) {
            trace!("Frame of {} bytes -> destination {:?}", frame.len(), destination);
        }

        destination
    }

    fn ipv4_destination(data: &[u8]) -> Option<Ipv4Addr> {
        let ipv4 = Ipv4Packet::new(data)?;
        if ipv4.get_version() != 4 {
            return None;
        }
        Some(ipv4.get_destination())
    }
}
