use pnet::packet::ipv4::{self, Ipv4Packet, MutableIpv4Packet};
use pnet::packet::ipv6::{Ipv6Packet, MutableIpv6Packet};
use pnet::packet::tcp::{self, MutableTcpPacket, TcpPacket};
use pnet::packet::Packet as PnetPacket;

use crate::domain::Scalar;
use crate::errors::TransformError;
use crate::packet::{L3Protocol, Packet, PacketList};

use super::{arg_int, require_arity, Described, Transformation};

/// Rewrites a TCP packet's payload into multiple packets, each copying the
/// IP header(s), with payload chunks of `size` bytes, successive sequence
/// numbers, and recomputed checksums and lengths. Non-TCP packets pass
/// through unchanged.
pub struct TcpSegment {
    size: usize,
}

impl TcpSegment {
    pub fn build(args: &[Scalar]) -> Result<Box<dyn Transformation>, TransformError> {
        require_arity("tcp_segment", 1, args)?;
        let size = arg_int(args, 0, "tcp_segment")?;
        if size < 1 {
            return Err(TransformError::BadArgument {
                mod_name: "tcp_segment",
                index: 0,
                message: "size must be at least 1".to_string(),
            });
        }
        Ok(Box::new(TcpSegment { size: size as usize }))
    }
}

impl Transformation for TcpSegment {
    fn name(&self) -> &'static str {
        "tcp_segment"
    }

    fn arity() -> isize {
        1
    }

    fn usage(&self) -> String {
        "tcp_segment <size>\nSplits a TCP packet's payload into segments of at most size bytes.".to_string()
    }

    fn apply(&self, pl: PacketList) -> PacketList {
        let mut out = PacketList::new();
        for pkt in pl {
            let delay = pkt.delay();
            match segment(&pkt, self.size) {
                Some(segments) if !segments.is_empty() => {
                    let l3 = pkt.l3_protocol();
                    for (i, bytes) in segments.into_iter().enumerate() {
                        let d = if i == 0 { delay } else { 0.0 };
                        let _ = out.add(Packet::new(bytes, l3), d);
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

fn segment(pkt: &Packet, size: usize) -> Option<Vec<Vec<u8>>> {
    match pkt.l3_protocol() {
        L3Protocol::Ipv4 => segment_v4(pkt, size),
        L3Protocol::Ipv6 => segment_v6(pkt, size),
        L3Protocol::Other => None,
    }
}

fn segment_v4(pkt: &Packet, size: usize) -> Option<Vec<Vec<u8>>> {
    let ip = pkt.as_ipv4()?;
    if ip.get_next_level_protocol() != pnet::packet::ip::IpNextHeaderProtocols::Tcp {
        return None;
    }
    let ip_header_len = ip.get_header_length() as usize * 4;
    let tcp_bytes = ip.payload();
    let tcp = TcpPacket::new(tcp_bytes)?;
    let tcp_header_len = tcp.get_data_offset() as usize * 4;
    let base_seq = tcp.get_sequence();
    let payload = &tcp_bytes[tcp_header_len..];
    if payload.len() <= size {
        return None;
    }
    let ip_header = pkt.bytes()[..ip_header_len].to_vec();
    let tcp_header = tcp_bytes[..tcp_header_len].to_vec();
    let src = ip.get_source();
    let dst = ip.get_destination();

    let mut out = Vec::new();
    for chunk in payload.chunks(size.max(1)) {
        let mut bytes = ip_header.clone();
        bytes.extend_from_slice(&tcp_header);
        bytes.extend_from_slice(chunk);
        {
            let mut seg = MutableIpv4Packet::new(&mut bytes[..ip_header_len + tcp_header_len + chunk.len()]).unwrap();
            seg.set_total_length((ip_header_len + tcp_header_len + chunk.len()) as u16);
            seg.set_checksum(0);
        }
        let checksum = ipv4::checksum(&Ipv4Packet::new(&bytes).unwrap());
        MutableIpv4Packet::new(&mut bytes).unwrap().set_checksum(checksum);

        let seq_offset = (chunk.as_ptr() as usize) - (payload.as_ptr() as usize);
        {
            let mut seg_tcp = MutableTcpPacket::new(&mut bytes[ip_header_len..]).unwrap();
            seg_tcp.set_sequence(base_seq.wrapping_add(seq_offset as u32));
            seg_tcp.set_checksum(0);
        }
        let tcp_checksum = tcp::ipv4_checksum(&TcpPacket::new(&bytes[ip_header_len..]).unwrap(), &src, &dst);
        MutableTcpPacket::new(&mut bytes[ip_header_len..]).unwrap().set_checksum(tcp_checksum);

        out.push(bytes);
    }
    Some(out)
}

fn segment_v6(pkt: &Packet, size: usize) -> Option<Vec<Vec<u8>>> {
    let ip = pkt.as_ipv6()?;
    if ip.get_next_header() != pnet::packet::ip::IpNextHeaderProtocols::Tcp {
        return None;
    }
    const IP6_HEADER_LEN: usize = 40;
    let tcp_bytes = ip.payload();
    let tcp = TcpPacket::new(tcp_bytes)?;
    let tcp_header_len = tcp.get_data_offset() as usize * 4;
    let base_seq = tcp.get_sequence();
    let payload = &tcp_bytes[tcp_header_len..];
    if payload.len() <= size {
        return None;
    }
    let ip_header = pkt.bytes()[..IP6_HEADER_LEN].to_vec();
    let tcp_header = tcp_bytes[..tcp_header_len].to_vec();
    let src = ip.get_source();
    let dst = ip.get_destination();

    let mut out = Vec::new();
    for chunk in payload.chunks(size.max(1)) {
        let mut bytes = ip_header.clone();
        bytes.extend_from_slice(&tcp_header);
        bytes.extend_from_slice(chunk);
        let payload_len = (tcp_header_len + chunk.len()) as u16;
        {
            let mut seg = MutableIpv6Packet::new(&mut bytes[..IP6_HEADER_LEN + tcp_header_len + chunk.len()]).unwrap();
            seg.set_payload_length(payload_len);
        }

        let seq_offset = (chunk.as_ptr() as usize) - (payload.as_ptr() as usize);
        {
            let mut seg_tcp = MutableTcpPacket::new(&mut bytes[IP6_HEADER_LEN..]).unwrap();
            seg_tcp.set_sequence(base_seq.wrapping_add(seq_offset as u32));
            seg_tcp.set_checksum(0);
        }
        let tcp_checksum = tcp::ipv6_checksum(&TcpPacket::new(&bytes[IP6_HEADER_LEN..]).unwrap(), &src, &dst);
        MutableTcpPacket::new(&mut bytes[IP6_HEADER_LEN..]).unwrap().set_checksum(tcp_checksum);

        out.push(bytes);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ipv4_tcp(payload_len: usize) -> Vec<u8> {
        let mut b = vec![0u8; 20 + 20 + payload_len];
        b[0] = 0x45;
        let total = b.len() as u16;
        b[2..4].copy_from_slice(&total.to_be_bytes());
        b[9] = 6;
        b[20 + 12] = 5 << 4; // data offset = 5 words
        for (i, byte) in b[40..].iter_mut().enumerate() {
            *byte = i as u8;
        }
        b
    }

    #[test]
    fn splits_large_payload_with_increasing_sequence_numbers() {
        let op = TcpSegment::build(&[Scalar::Int(10)]).unwrap();
        let mut pl = PacketList::new();
        pl.add(Packet::from_raw(ipv4_tcp(25)), 0.0).unwrap();
        let out = op.apply(pl);
        assert!(out.len() >= 2);
        let seq0 = TcpPacket::new(&out.get(0).unwrap().bytes()[20..]).unwrap().get_sequence();
        let seq1 = TcpPacket::new(&out.get(1).unwrap().bytes()[20..]).unwrap().get_sequence();
        assert_eq!(seq1, seq0.wrapping_add(10));
    }

    #[test]
    fn non_tcp_passes_through() {
        let op = TcpSegment::build(&[Scalar::Int(10)]).unwrap();
        let mut bytes = vec![0u8; 20];
        bytes[0] = 0x45;
        bytes[9] = 17; // UDP
        let mut pl = PacketList::new();
        pl.add(Packet::from_raw(bytes), 0.0).unwrap();
        assert_eq!(op.apply(pl).len(), 1);
    }
}
