use pnet::packet::Packet;
use std::net::Ipv4Addr;

/// IGMPv2 membership report
pub const MEMBERSHIP_REPORT: u8 = 0x16;
/// IGMPv2 leave group
pub const LEAVE_GROUP: u8 = 0x17;

pub const MESSAGE_LEN: usize = 8;

/// An 8-byte IGMPv2 message: type, max response time (always 0), checksum,
/// group address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IgmpMessage {
    bytes: [u8; MESSAGE_LEN],
}

impl IgmpMessage {
    pub fn join(group: Ipv4Addr) -> Self {
        Self::build(MEMBERSHIP_REPORT, group)
    }

    pub fn leave(group: Ipv4Addr) -> Self {
        Self::build(LEAVE_GROUP, group)
    }

    fn build(kind: u8, group: Ipv4Addr) -> Self {
        let mut bytes = [0u8; MESSAGE_LEN];
        bytes[0] = kind;
        bytes[4..8].copy_from_slice(&group.octets());
        let sum = checksum(&bytes);
        bytes[2..4].copy_from_slice(&sum.to_be_bytes());
        Self { bytes }
    }

    pub fn kind(&self) -> u8 {
        self.bytes[0]
    }

    pub fn group(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.bytes[4], self.bytes[5], self.bytes[6], self.bytes[7])
    }

    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes([self.bytes[2], self.bytes[3]])
    }
}

impl Packet for IgmpMessage {
    fn packet(&self) -> &[u8] {
        &self.bytes
    }

    fn payload(&self) -> &[u8] {
        &[]
    }
}

/// Internet checksum: one's complement of the one's complement sum of
/// big-endian 16-bit words, an odd trailing byte padded with zero
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|word| match word {
            [hi, lo] => u32::from(*hi) << 8 | u32::from(*lo),
            [hi] => u32::from(*hi) << 8,
            _ => 0,
        })
        .sum();

    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_report_layout() {
        let message = IgmpMessage::join(Ipv4Addr::new(239, 1, 1, 1));
        assert_eq!(message.packet(), &[0x16, 0x00, 0xf9, 0xfc, 239, 1, 1, 1]);
        assert!(message.payload().is_empty());
    }

    #[test]
    fn leave_group_layout() {
        let message = IgmpMessage::leave(Ipv4Addr::new(239, 1, 1, 1));
        assert_eq!(message.kind(), LEAVE_GROUP);
        assert_eq!(message.group(), Ipv4Addr::new(239, 1, 1, 1));
        assert_eq!(message.checksum(), 0xf8fc);
    }

    #[test]
    fn checksum_verifies_to_zero() {
        let message = IgmpMessage::join(Ipv4Addr::new(224, 0, 1, 129));
        assert_eq!(checksum(message.packet()), 0);
    }

    #[test]
    fn odd_length_is_padded() {
        assert_eq!(checksum(&[0x01]), !0x0100);
        assert_eq!(checksum(&[]), 0xffff);
    }
}
