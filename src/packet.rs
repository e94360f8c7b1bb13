//! Owned, mutable wire packets and the ordered lists of them that
//! transformations operate on. See the teacher's `util/buffer.rs` for the
//! precedent of a small single-purpose owned-buffer wrapper; `Packet` plays
//! the same role one layer up, owning the whole L3 frame rather than a
//! reassembly window.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use pnet::packet::ip::IpNextHeaderProtocol;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::Packet as PnetPacket;

use crate::errors::PacketError;

/// Below this, a delay is treated as zero to avoid gratuitous scheduling
/// jitter (see `send_all`).
const MIN_SLEEP: Duration = Duration::from_millis(10);

/// The L3 protocol family of a packet's outermost header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L3Protocol {
    Ipv4,
    Ipv6,
    Other,
}

/// An owned, mutable wire packet plus a pre-send delay.
///
/// The raw bytes are the source of truth; `l3` only classifies the
/// outermost header so operators can dispatch without re-parsing on every
/// access. Operators that change the protocol family (e.g. none do today,
/// but a future one might) must call [`Packet::reclassify`].
#[derive(Debug, Clone)]
pub struct Packet {
    bytes: Vec<u8>,
    l3: L3Protocol,
    delay: f64,
}

impl Packet {
    /// Wraps raw L3 bytes dequeued from the kernel, classifying the
    /// outermost header by inspecting the IP version nibble.
    pub fn from_raw(bytes: Vec<u8>) -> Packet {
        let l3 = classify(&bytes);
        Packet { bytes, l3, delay: 0.0 }
    }

    /// Builds a `Packet` from already-classified bytes, skipping the version
    /// sniff. Used by operators that synthesize new packets (fragmentation,
    /// segmentation) and already know the family.
    pub fn new(bytes: Vec<u8>, l3: L3Protocol) -> Packet {
        Packet { bytes, l3, delay: 0.0 }
    }

    pub fn l3_protocol(&self) -> L3Protocol {
        self.l3
    }

    pub fn reclassify(&mut self) {
        self.l3 = classify(&self.bytes);
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut Vec<u8> {
        &mut self.bytes
    }

    pub fn set_bytes(&mut self, bytes: Vec<u8>) {
        self.bytes = bytes;
        self.reclassify();
    }

    pub fn delay(&self) -> f64 {
        self.delay
    }

    /// Sets this packet's pre-send delay. Rejects negative or non-finite
    /// values, matching the Packet invariant `delay >= 0`.
    pub fn set_delay(&mut self, delay: f64) -> Result<(), PacketError> {
        if !delay.is_finite() || delay < 0.0 {
            return Err(PacketError::InvalidDelay(delay));
        }
        self.delay = delay;
        Ok(())
    }

    pub fn as_ipv4(&self) -> Option<Ipv4Packet> {
        if self.l3 == L3Protocol::Ipv4 {
            Ipv4Packet::new(&self.bytes)
        } else {
            None
        }
    }

    pub fn as_ipv6(&self) -> Option<Ipv6Packet> {
        if self.l3 == L3Protocol::Ipv6 {
            Ipv6Packet::new(&self.bytes)
        } else {
            None
        }
    }

    /// The next-header / protocol value carried by the outermost IP header,
    /// if any. For IPv6 this is the header chain's *first* next-header
    /// field, not necessarily the upper-layer protocol (see [`crate::ipv6hdr`]
    /// for walking past extension headers).
    pub fn ip_next_header(&self) -> Option<IpNextHeaderProtocol> {
        match self.l3 {
            L3Protocol::Ipv4 => self.as_ipv4().map(|p| p.get_next_level_protocol()),
            L3Protocol::Ipv6 => self.as_ipv6().map(|p| p.get_next_header()),
            L3Protocol::Other => None,
        }
    }
}

fn classify(bytes: &[u8]) -> L3Protocol {
    match bytes.first().map(|b| b >> 4) {
        Some(4) => L3Protocol::Ipv4,
        Some(6) => L3Protocol::Ipv6,
        _ => L3Protocol::Other,
    }
}

/// An ordered, index-addressable, mutable sequence of [`Packet`].
///
/// Created per intercepted wire packet (the common case, a singleton list)
/// or synthesized by a fragmenting/segmenting operator; consumed by the
/// engine's forward step.
#[derive(Debug, Clone, Default)]
pub struct PacketList {
    packets: Vec<Packet>,
}

impl PacketList {
    pub fn new() -> PacketList {
        PacketList { packets: Vec::new() }
    }

    pub fn singleton(pkt: Packet) -> PacketList {
        PacketList { packets: vec![pkt] }
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<&Packet> {
        self.packets.get(i)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Packet> {
        self.packets.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Packet> {
        self.packets.iter_mut()
    }

    pub fn as_slice(&self) -> &[Packet] {
        &self.packets
    }

    /// Appends `pkt` to the end of the list with the given pre-send delay.
    pub fn add(&mut self, pkt: Packet, delay: f64) -> Result<(), PacketError> {
        let mut pkt = pkt;
        pkt.set_delay(delay)?;
        self.packets.push(pkt);
        Ok(())
    }

    /// Inserts `pkt` at index `i`, shifting subsequent packets right.
    pub fn insert(&mut self, i: usize, pkt: Packet, delay: f64) -> Result<(), PacketError> {
        if i > self.packets.len() {
            return Err(PacketError::IndexOutOfRange { index: i, len: self.packets.len() });
        }
        let mut pkt = pkt;
        pkt.set_delay(delay)?;
        self.packets.insert(i, pkt);
        Ok(())
    }

    /// Removes and returns the packet at index `i`.
    pub fn remove(&mut self, i: usize) -> Result<Packet, PacketError> {
        if i >= self.packets.len() {
            return Err(PacketError::IndexOutOfRange { index: i, len: self.packets.len() });
        }
        Ok(self.packets.remove(i))
    }

    /// Replaces the packet at index `i`, preserving its delay.
    pub fn replace(&mut self, i: usize, pkt: Packet) -> Result<(), PacketError> {
        let delay = self
            .packets
            .get(i)
            .ok_or(PacketError::IndexOutOfRange { index: i, len: self.packets.len() })?
            .delay();
        let mut pkt = pkt;
        pkt.set_delay(delay)?;
        self.packets[i] = pkt;
        Ok(())
    }

    pub fn set_delay(&mut self, i: usize, delay: f64) -> Result<(), PacketError> {
        let len = self.packets.len();
        self.packets
            .get_mut(i)
            .ok_or(PacketError::IndexOutOfRange { index: i, len })?
            .set_delay(delay)
    }

    /// Resolves a `target` keyword (`first`/`last`/`random`/an explicit
    /// index) to a concrete index, shared by `Drop-one`, `Duplicate` and
    /// `Delay`. Returns `None` when the list is empty or the explicit index
    /// is out of range, in which case the caller must treat it as a no-op
    /// per the catalog's boundary-behavior invariant.
    pub fn resolve_target(&self, target: super::transform::Target) -> Option<usize> {
        use super::transform::Target;
        if self.packets.is_empty() {
            return None;
        }
        match target {
            Target::First => Some(0),
            Target::Last => Some(self.packets.len() - 1),
            Target::Random => {
                use rand::Rng;
                Some(rand::thread_rng().gen_range(0..self.packets.len()))
            }
            Target::Index(i) => {
                if i < self.packets.len() {
                    Some(i)
                } else {
                    None
                }
            }
        }
    }
}

impl FromIterator<Packet> for PacketList {
    fn from_iter<T: IntoIterator<Item = Packet>>(iter: T) -> Self {
        PacketList { packets: iter.into_iter().collect() }
    }
}

impl IntoIterator for PacketList {
    type Item = Packet;
    type IntoIter = std::vec::IntoIter<Packet>;

    fn into_iter(self) -> Self::IntoIter {
        self.packets.into_iter()
    }
}

impl<'a> IntoIterator for &'a PacketList {
    type Item = &'a Packet;
    type IntoIter = std::slice::Iter<'a, Packet>;

    fn into_iter(self) -> Self::IntoIter {
        self.packets.iter()
    }
}

/// Sleeps for `delay` seconds unless it rounds down to less than
/// [`MIN_SLEEP`].
fn sleep_for_delay(delay: f64) {
    let dur = Duration::from_secs_f64(delay.max(0.0));
    if dur >= MIN_SLEEP {
        std::thread::sleep(dur);
    }
}

/// Destination for [`PacketList::send_all`]/[`PacketList::send_all_link`]:
/// something that can transmit one already-serialized frame.
pub trait FrameSink {
    fn send_v4(&mut self, dst: Ipv4Addr, bytes: &[u8]) -> Result<(), PacketError>;
    fn send_v6(&mut self, dst: Ipv6Addr, bytes: &[u8]) -> Result<(), PacketError>;
    fn send_link(&mut self, bytes: &[u8]) -> Result<(), PacketError>;
}

impl PacketList {
    /// Sends every packet via `sink` at the L3 layer, honoring each
    /// packet's delay by sleeping before its send.
    pub fn send_all(&self, sink: &mut dyn FrameSink) -> Result<(), PacketError> {
        for pkt in &self.packets {
            sleep_for_delay(pkt.delay());
            match pkt.l3_protocol() {
                L3Protocol::Ipv4 => {
                    let dst = pkt
                        .as_ipv4()
                        .map(|p| p.get_destination())
                        .ok_or_else(|| PacketError::Malformed("truncated IPv4 header".into()))?;
                    sink.send_v4(dst, pkt.bytes())?;
                }
                L3Protocol::Ipv6 => {
                    let dst = pkt
                        .as_ipv6()
                        .map(|p| p.get_destination())
                        .ok_or_else(|| PacketError::Malformed("truncated IPv6 header".into()))?;
                    sink.send_v6(dst, pkt.bytes())?;
                }
                L3Protocol::Other => {
                    sink.send_link(pkt.bytes())?;
                }
            }
        }
        Ok(())
    }

    /// Sends every packet at the link (L2) layer, for deployments that raw-
    /// send at the Ethernet level instead of via an L3 socket.
    pub fn send_all_link(&self, sink: &mut dyn FrameSink) -> Result<(), PacketError> {
        for pkt in &self.packets {
            sleep_for_delay(pkt.delay());
            sink.send_link(pkt.bytes())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ipv4_bytes(len: u8) -> Vec<u8> {
        let mut b = vec![0u8; 20];
        b[0] = 0x45;
        b[2] = 0;
        b[3] = len;
        b
    }

    #[test]
    fn classify_by_version_nibble() {
        let p = Packet::from_raw(ipv4_bytes(20));
        assert_eq!(p.l3_protocol(), L3Protocol::Ipv4);

        let mut v6 = vec![0u8; 40];
        v6[0] = 0x60;
        let p = Packet::from_raw(v6);
        assert_eq!(p.l3_protocol(), L3Protocol::Ipv6);

        let p = Packet::from_raw(vec![0xFF, 0, 0, 0]);
        assert_eq!(p.l3_protocol(), L3Protocol::Other);
    }

    #[test]
    fn set_delay_rejects_negative_and_nan() {
        let mut p = Packet::from_raw(ipv4_bytes(20));
        assert!(p.set_delay(-1.0).is_err());
        assert!(p.set_delay(f64::NAN).is_err());
        assert!(p.set_delay(0.5).is_ok());
        assert_eq!(p.delay(), 0.5);
    }

    #[test]
    fn insert_remove_replace_roundtrip() {
        let mut pl = PacketList::new();
        pl.add(Packet::from_raw(ipv4_bytes(20)), 0.0).unwrap();
        pl.add(Packet::from_raw(ipv4_bytes(20)), 0.0).unwrap();
        assert_eq!(pl.len(), 2);

        let clone = pl.get(0).unwrap().clone();
        pl.insert(1, clone, 0.1).unwrap();
        assert_eq!(pl.len(), 3);
        assert_eq!(pl.get(1).unwrap().delay(), 0.1);

        pl.remove(0).unwrap();
        assert_eq!(pl.len(), 2);

        assert!(pl.remove(99).is_err());
    }

    #[test]
    fn resolve_target_out_of_range_is_none() {
        let mut pl = PacketList::new();
        pl.add(Packet::from_raw(ipv4_bytes(20)), 0.0).unwrap();
        assert_eq!(pl.resolve_target(crate::transform::Target::Index(5)), None);
        assert_eq!(pl.resolve_target(crate::transform::Target::First), Some(0));

        let empty = PacketList::new();
        assert_eq!(empty.resolve_target(crate::transform::Target::First), None);
    }
}
