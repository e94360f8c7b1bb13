use rand::Rng;

use crate::domain::Scalar;
use crate::errors::TransformError;
use crate::ipv6hdr::Ipv6Chain;
use crate::packet::{L3Protocol, Packet, PacketList};

use super::{arg_int, require_arity, Described, Transformation};

/// Fragments each IPv6 packet using a Fragment Extension Header inserted
/// right after the Per-Fragment Headers prefix (base header plus any
/// leading Hop-By-Hop/Routing run), per RFC 8200. Fragment sizes are
/// 8-octet aligned; all fragments but the last set M=1 and share one
/// random Identification. Non-IPv6 packets pass through unchanged.
pub struct FragV6 {
    size: usize,
}

impl FragV6 {
    pub fn build(args: &[Scalar]) -> Result<Box<dyn Transformation>, TransformError> {
        require_arity("ipv6_fragment", 1, args)?;
        let size = arg_int(args, 0, "ipv6_fragment")?;
        if size < 0 {
            return Err(TransformError::BadArgument {
                mod_name: "ipv6_fragment",
                index: 0,
                message: "size must be non-negative".to_string(),
            });
        }
        Ok(Box::new(FragV6 { size: size as usize }))
    }
}

impl Transformation for FragV6 {
    fn name(&self) -> &'static str {
        "ipv6_fragment"
    }

    fn arity() -> isize {
        1
    }

    fn usage(&self) -> String {
        "ipv6_fragment <size>\nSplits each IPv6 packet using a Fragment extension header, at most size bytes per fragment.".to_string()
    }

    fn is_deterministic(&self) -> bool {
        false
    }

    fn apply(&self, pl: PacketList) -> PacketList {
        let mut out = PacketList::new();
        for pkt in pl {
            let delay = pkt.delay();
            match fragment(&pkt, self.size) {
                Some(fragments) if !fragments.is_empty() => {
                    for (i, bytes) in fragments.into_iter().enumerate() {
                        let d = if i == 0 { delay } else { 0.0 };
                        let _ = out.add(Packet::new(bytes, L3Protocol::Ipv6), d);
                    }
                }
                _ => {
                    let _ = out.add(pkt, delay);
                }
            }
        }
        out
    }

    fn describe(&self) -> Described {
        vec![("size", self.size.to_string())]
    }
}

fn fragment(pkt: &Packet, size: usize) -> Option<Vec<Vec<u8>>> {
    if pkt.l3_protocol() != L3Protocol::Ipv6 {
        return None;
    }
    let chain = Ipv6Chain::parse(pkt.bytes()).ok()?;
    let prefix = chain.per_fragment_prefix_pointing_to_fragment();
    let fragmentable = chain.fragmentable_bytes();

    let min_size = prefix.len() + 8 + 8;
    if size < min_size || prefix.len() + 8 + fragmentable.len() <= size {
        return None;
    }

    let max_chunk = ((size - prefix.len() - 8) / 8) * 8;
    if max_chunk == 0 {
        return None;
    }

    let identification: u32 = rand::thread_rng().gen();
    let chunks: Vec<&[u8]> = fragmentable.chunks(max_chunk).collect();
    let mut frags = Vec::with_capacity(chunks.len());
    let mut offset_units = 0u16;
    for (i, chunk) in chunks.iter().enumerate() {
        let more = i + 1 < chunks.len();
        let mut bytes = prefix.clone();
        bytes.extend_from_slice(&chain.fragment_header_bytes(identification, offset_units, more));
        bytes.extend_from_slice(chunk);
        let payload_len = (bytes.len() - crate::ipv6hdr::BASE_HEADER_LEN) as u16;
        bytes[4..6].copy_from_slice(&payload_len.to_be_bytes());
        frags.push(bytes);
        offset_units += (chunk.len() / 8) as u16;
    }
    Some(frags)
}

/// Same effect as [`FragV6`], except a packet that already fits within
/// `size` is not passed through unchanged: it instead gets a single
/// Fragment extension header inserted (offset 0, M=0), i.e. an atomic
/// fragment per RFC 8200 §4.5.
pub struct FragV6Atomic {
    size: usize,
}

impl FragV6Atomic {
    pub fn build(args: &[Scalar]) -> Result<Box<dyn Transformation>, TransformError> {
        require_arity("ipv6_atomic_fragment", 1, args)?;
        let size = arg_int(args, 0, "ipv6_atomic_fragment")?;
        if size < 0 {
            return Err(TransformError::BadArgument {
                mod_name: "ipv6_atomic_fragment",
                index: 0,
                message: "size must be non-negative".to_string(),
            });
        }
        Ok(Box::new(FragV6Atomic { size: size as usize }))
    }
}

impl Transformation for FragV6Atomic {
    fn name(&self) -> &'static str {
        "ipv6_atomic_fragment"
    }

    fn arity() -> isize {
        1
    }

    fn usage(&self) -> String {
        "ipv6_atomic_fragment <size>\nLike ipv6_fragment, but a packet that already fits gets a single atomic Fragment header instead of passing through unchanged.".to_string()
    }

    fn is_deterministic(&self) -> bool {
        false
    }

    fn apply(&self, pl: PacketList) -> PacketList {
        let mut out = PacketList::new();
        for pkt in pl {
            let delay = pkt.delay();
            match fragment_atomic(&pkt, self.size) {
                Some(fragments) if !fragments.is_empty() => {
                    for (i, bytes) in fragments.into_iter().enumerate() {
                        let d = if i == 0 { delay } else { 0.0 };
                        let _ = out.add(Packet::new(bytes, L3Protocol::Ipv6), d);
                    }
                }
                _ => {
                    let _ = out.add(pkt, delay);
                }
            }
        }
        out
    }

    fn describe(&self) -> Described {
        vec![("size", self.size.to_string())]
    }
}

/// Like [`fragment`], but a packet that already fits within `size` still
/// gets one Fragment header (offset 0, M=0) instead of passing through.
fn fragment_atomic(pkt: &Packet, size: usize) -> Option<Vec<Vec<u8>>> {
    if pkt.l3_protocol() != L3Protocol::Ipv6 {
        return None;
    }
    let chain = Ipv6Chain::parse(pkt.bytes()).ok()?;
    let prefix = chain.per_fragment_prefix_pointing_to_fragment();
    let fragmentable = chain.fragmentable_bytes();
    let min_size = prefix.len() + 8 + 8;

    if prefix.len() + 8 + fragmentable.len() <= size {
        if size < min_size {
            return None;
        }
        let identification: u32 = rand::thread_rng().gen();
        let mut bytes = prefix;
        bytes.extend_from_slice(&chain.fragment_header_bytes(identification, 0, false));
        bytes.extend_from_slice(&fragmentable);
        let payload_len = (bytes.len() - crate::ipv6hdr::BASE_HEADER_LEN) as u16;
        bytes[4..6].copy_from_slice(&payload_len.to_be_bytes());
        return Some(vec![bytes]);
    }

    fragment(pkt, size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ipv6_tcp(payload_len: usize) -> Vec<u8> {
        let mut b = vec![0u8; 40];
        b[0] = 0x60;
        b[6] = 6; // TCP
        b[7] = 64;
        let plen = payload_len as u16;
        b[4..6].copy_from_slice(&plen.to_be_bytes());
        b.extend(vec![0xABu8; payload_len]);
        b
    }

    #[test]
    fn fits_within_size_passes_through() {
        let op = FragV6::build(&[Scalar::Int(1500)]).unwrap();
        let mut pl = PacketList::new();
        pl.add(Packet::from_raw(ipv6_tcp(64)), 0.0).unwrap();
        assert_eq!(op.apply(pl).len(), 1);
    }

    #[test]
    fn large_payload_splits_with_shared_identification() {
        let op = FragV6::build(&[Scalar::Int(64)]).unwrap();
        let mut pl = PacketList::new();
        pl.add(Packet::from_raw(ipv6_tcp(200)), 0.3).unwrap();
        let out = op.apply(pl);
        assert!(out.len() > 1);
        assert_eq!(out.get(0).unwrap().delay(), 0.3);
        assert_eq!(out.get(1).unwrap().delay(), 0.0);

        let first = Ipv6Chain::parse(out.get(0).unwrap().bytes()).unwrap();
        let id0 = first.nodes.iter().find(|n| n.kind == crate::ipv6hdr::ExtHeaderKind::Fragment).unwrap().identification();
        let second = Ipv6Chain::parse(out.get(1).unwrap().bytes()).unwrap();
        let id1 = second.nodes.iter().find(|n| n.kind == crate::ipv6hdr::ExtHeaderKind::Fragment).unwrap().identification();
        assert_eq!(id0, id1);
    }

    #[test]
    fn atomic_variant_inserts_a_fragment_header_even_when_the_packet_fits() {
        let op = FragV6Atomic::build(&[Scalar::Int(1500)]).unwrap();
        let mut pl = PacketList::new();
        pl.add(Packet::from_raw(ipv6_tcp(64)), 0.0).unwrap();
        let out = op.apply(pl);
        assert_eq!(out.len(), 1);

        let chain = Ipv6Chain::parse(out.get(0).unwrap().bytes()).unwrap();
        let frag = chain.nodes.iter().find(|n| n.kind == crate::ipv6hdr::ExtHeaderKind::Fragment).unwrap();
        assert_eq!(frag.next_header(), 6);
    }

    #[test]
    fn atomic_variant_still_splits_oversized_payloads() {
        let op = FragV6Atomic::build(&[Scalar::Int(64)]).unwrap();
        let mut pl = PacketList::new();
        pl.add(Packet::from_raw(ipv6_tcp(200)), 0.0).unwrap();
        let out = op.apply(pl);
        assert!(out.len() > 1);
    }
}
