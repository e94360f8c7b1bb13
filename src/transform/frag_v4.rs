use pnet::packet::ipv4::{self, Ipv4Packet, MutableIpv4Packet};
use pnet::packet::Packet as PnetPacket;

use crate::domain::Scalar;
use crate::errors::TransformError;
use crate::packet::{L3Protocol, Packet, PacketList};

use super::{arg_int, require_arity, Described, Transformation};

/// Fragments each IPv4 packet into IP fragments whose total length does
/// not exceed `size`. Non-IPv4 packets pass through unchanged. The
/// original's delay is attached only to the first resulting fragment.
pub struct FragV4 {
    size: usize,
}

impl FragV4 {
    pub fn build(args: &[Scalar]) -> Result<Box<dyn Transformation>, TransformError> {
        require_arity("ipv4_fragment", 1, args)?;
        let size = arg_int(args, 0, "ipv4_fragment")?;
        if size < 28 {
            return Err(TransformError::BadArgument {
                mod_name: "ipv4_fragment",
                index: 0,
                message: "size must be at least 28 bytes (20-byte header + one 8-byte block)".to_string(),
            });
        }
        Ok(Box::new(FragV4 { size: size as usize }))
    }
}

impl Transformation for FragV4 {
    fn name(&self) -> &'static str {
        "ipv4_fragment"
    }

    fn arity() -> isize {
        1
    }

    fn usage(&self) -> String {
        "ipv4_fragment <size>\nSplits each IPv4 packet into fragments of at most size bytes.".to_string()
    }

    fn apply(&self, pl: PacketList) -> PacketList {
        let mut out = PacketList::new();
        for pkt in pl {
            let delay = pkt.delay();
            match fragment(&pkt, self.size) {
                Some(fragments) if !fragments.is_empty() => {
                    for (i, bytes) in fragments.into_iter().enumerate() {
                        let d = if i == 0 { delay } else { 0.0 };
                        let _ = out.add(Packet::new(bytes, L3Protocol::Ipv4), d);
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
    let ip = pkt.as_ipv4()?;
    let header_len = ip.get_header_length() as usize * 4;
    if header_len < 20 || size <= header_len {
        return None;
    }
    let payload = ip.payload();
    if header_len + payload.len() <= size {
        return None;
    }
    let max_chunk = ((size - header_len) / 8) * 8;
    if max_chunk == 0 {
        return None;
    }

    let header_bytes = pkt.bytes()[..header_len].to_vec();
    let chunks: Vec<&[u8]> = payload.chunks(max_chunk).collect();
    let mut frags = Vec::with_capacity(chunks.len());
    let mut offset_bytes = 0usize;
    for (i, chunk) in chunks.iter().enumerate() {
        let mut bytes = header_bytes.clone();
        bytes.extend_from_slice(chunk);
        {
            let mut frag = MutableIpv4Packet::new(&mut bytes).unwrap();
            frag.set_total_length((header_len + chunk.len()) as u16);
            frag.set_fragment_offset((offset_bytes / 8) as u16);
            let more_fragments = i + 1 < chunks.len();
            frag.set_flags(if more_fragments { ipv4::Ipv4Flags::MoreFragments } else { 0 });
            frag.set_checksum(0);
        }
        let checksum = ipv4::checksum(&Ipv4Packet::new(&bytes).unwrap());
        MutableIpv4Packet::new(&mut bytes).unwrap().set_checksum(checksum);
        frags.push(bytes);
        offset_bytes += chunk.len();
    }
    Some(frags)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ipv4_udp(payload_len: usize) -> Vec<u8> {
        let mut b = vec![0u8; 20 + payload_len];
        b[0] = 0x45;
        let total = (20 + payload_len) as u16;
        b[2] = (total >> 8) as u8;
        b[3] = total as u8;
        b[9] = 17;
        for (i, byte) in b[20..].iter_mut().enumerate() {
            *byte = i as u8;
        }
        b
    }

    #[test]
    fn small_packet_passes_through_unfragmented() {
        let op = FragV4::build(&[Scalar::Int(1500)]).unwrap();
        let mut pl = PacketList::new();
        pl.add(Packet::from_raw(ipv4_udp(100)), 0.0).unwrap();
        let out = op.apply(pl);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn large_packet_splits_into_multiple_fragments() {
        let op = FragV4::build(&[Scalar::Int(48)]).unwrap();
        let mut pl = PacketList::new();
        pl.add(Packet::from_raw(ipv4_udp(100)), 0.5).unwrap();
        let out = op.apply(pl);
        assert!(out.len() > 1);
        assert_eq!(out.get(0).unwrap().delay(), 0.5);
        assert_eq!(out.get(1).unwrap().delay(), 0.0);
    }

    #[test]
    fn non_ipv4_packet_passes_through() {
        let op = FragV4::build(&[Scalar::Int(48)]).unwrap();
        let mut pl = PacketList::new();
        pl.add(Packet::new(vec![0u8; 10], L3Protocol::Other), 0.0).unwrap();
        let out = op.apply(pl);
        assert_eq!(out.len(), 1);
    }
}
