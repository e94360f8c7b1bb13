use rand::Rng;

use pnet::packet::ipv4::{self, Ipv4Packet, MutableIpv4Packet};
use pnet::packet::tcp::{self, MutableTcpPacket, TcpPacket};
use pnet::packet::Packet as PnetPacket;

use crate::domain::Scalar;
use crate::errors::TransformError;
use crate::packet::{L3Protocol, Packet, PacketList};

use super::{arg_int, arg_str, require_arity, Described, Transformation};

fn random_bytes(n: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..n).map(|_| rng.gen()).collect()
}

/// Performs the normal IPv4 fragmentation split, then appends `overlap`
/// random bytes to each fragment's payload so adjacent fragments overlap
/// on reassembly.
pub struct Ipv4Overlap {
    fragsize: usize,
    overlap: usize,
}

impl Ipv4Overlap {
    pub fn build(args: &[Scalar]) -> Result<Box<dyn Transformation>, TransformError> {
        require_arity("ipv4_overlap", 2, args)?;
        let fragsize = arg_int(args, 0, "ipv4_overlap")?;
        let overlap = arg_int(args, 1, "ipv4_overlap")?;
        if fragsize < 28 {
            return Err(TransformError::BadArgument {
                mod_name: "ipv4_overlap",
                index: 0,
                message: "fragsize must be at least 28 bytes".to_string(),
            });
        }
        if overlap < 0 {
            return Err(TransformError::BadArgument {
                mod_name: "ipv4_overlap",
                index: 1,
                message: "overlap must be non-negative".to_string(),
            });
        }
        Ok(Box::new(Ipv4Overlap { fragsize: fragsize as usize, overlap: overlap as usize }))
    }
}

impl Transformation for Ipv4Overlap {
    fn name(&self) -> &'static str {
        "ipv4_overlap"
    }

    fn arity() -> isize {
        2
    }

    fn usage(&self) -> String {
        "ipv4_overlap <fragsize> <overlap>\nFragments an IPv4 packet, appending overlap random bytes to each fragment.".to_string()
    }

    fn is_deterministic(&self) -> bool {
        self.overlap == 0
    }

    fn apply(&self, pl: PacketList) -> PacketList {
        let mut out = PacketList::new();
        for pkt in pl {
            let delay = pkt.delay();
            match fragment_with_overlap(&pkt, self.fragsize, self.overlap) {
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
        vec![("fragsize", self.fragsize.to_string()), ("overlap", self.overlap.to_string())]
    }
}

fn fragment_with_overlap(pkt: &Packet, fragsize: usize, overlap: usize) -> Option<Vec<Vec<u8>>> {
    let ip = pkt.as_ipv4()?;
    let header_len = ip.get_header_length() as usize * 4;
    if header_len < 20 || fragsize <= header_len {
        return None;
    }
    let payload = ip.payload();
    if header_len + payload.len() <= fragsize {
        return None;
    }
    let max_chunk = ((fragsize - header_len) / 8) * 8;
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
        bytes.extend_from_slice(&random_bytes(overlap));
        let total_len = bytes.len();
        {
            let mut frag = MutableIpv4Packet::new(&mut bytes).unwrap();
            frag.set_total_length(total_len as u16);
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    Before,
    After,
}

/// Performs the normal TCP segmentation split, then appends or prepends
/// `overlap` random bytes to each segment's payload (without advancing the
/// sequence number for the overlapping bytes), so adjacent segments
/// overlap on reassembly.
pub struct TcpOverlap {
    segsize: usize,
    overlap: usize,
    position: Position,
}

impl TcpOverlap {
    pub fn build(args: &[Scalar]) -> Result<Box<dyn Transformation>, TransformError> {
        require_arity("tcp_overlap", 3, args)?;
        let segsize = arg_int(args, 0, "tcp_overlap")?;
        let overlap = arg_int(args, 1, "tcp_overlap")?;
        let position = match arg_str(args, 2, "tcp_overlap")? {
            "before" => Position::Before,
            "after" => Position::After,
            other => {
                return Err(TransformError::BadArgument {
                    mod_name: "tcp_overlap",
                    index: 2,
                    message: format!("'{}' is not before or after", other),
                })
            }
        };
        if segsize < 1 {
            return Err(TransformError::BadArgument {
                mod_name: "tcp_overlap",
                index: 0,
                message: "segsize must be at least 1".to_string(),
            });
        }
        Ok(Box::new(TcpOverlap { segsize: segsize as usize, overlap: overlap.max(0) as usize, position }))
    }
}

impl Transformation for TcpOverlap {
    fn name(&self) -> &'static str {
        "tcp_overlap"
    }

    fn arity() -> isize {
        3
    }

    fn usage(&self) -> String {
        "tcp_overlap <segsize> <overlap> <before|after>\nSegments a TCP packet, adding overlap random bytes to each segment.".to_string()
    }

    fn is_deterministic(&self) -> bool {
        self.overlap == 0
    }

    fn apply(&self, pl: PacketList) -> PacketList {
        let mut out = PacketList::new();
        for pkt in pl {
            let delay = pkt.delay();
            match segment_with_overlap(&pkt, self.segsize, self.overlap, self.position) {
                Some(segments) if !segments.is_empty() => {
                    for (i, bytes) in segments.into_iter().enumerate() {
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
        vec![
            ("segsize", self.segsize.to_string()),
            ("overlap", self.overlap.to_string()),
            ("position", format!("{:?}", self.position)),
        ]
    }
}

fn segment_with_overlap(pkt: &Packet, segsize: usize, overlap: usize, position: Position) -> Option<Vec<Vec<u8>>> {
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
    if payload.len() <= segsize {
        return None;
    }
    let ip_header = pkt.bytes()[..ip_header_len].to_vec();
    let tcp_header = tcp_bytes[..tcp_header_len].to_vec();
    let src = ip.get_source();
    let dst = ip.get_destination();

    let mut out = Vec::new();
    for chunk in payload.chunks(segsize.max(1)) {
        let seq_offset = (chunk.as_ptr() as usize) - (payload.as_ptr() as usize);
        let extra = random_bytes(overlap);

        let mut bytes = ip_header.clone();
        bytes.extend_from_slice(&tcp_header);
        let mut seq = base_seq.wrapping_add(seq_offset as u32);
        match position {
            Position::After => {
                bytes.extend_from_slice(chunk);
                bytes.extend_from_slice(&extra);
            }
            Position::Before => {
                bytes.extend_from_slice(&extra);
                bytes.extend_from_slice(chunk);
                seq = seq.wrapping_sub(overlap as u32);
            }
        }

        let total_len = bytes.len();
        {
            let mut seg = MutableIpv4Packet::new(&mut bytes).unwrap();
            seg.set_total_length(total_len as u16);
            seg.set_checksum(0);
        }
        let checksum = ipv4::checksum(&Ipv4Packet::new(&bytes).unwrap());
        MutableIpv4Packet::new(&mut bytes).unwrap().set_checksum(checksum);

        {
            let mut seg_tcp = MutableTcpPacket::new(&mut bytes[ip_header_len..]).unwrap();
            seg_tcp.set_sequence(seq);
            seg_tcp.set_checksum(0);
        }
        let tcp_checksum = tcp::ipv4_checksum(&TcpPacket::new(&bytes[ip_header_len..]).unwrap(), &src, &dst);
        MutableTcpPacket::new(&mut bytes[ip_header_len..]).unwrap().set_checksum(tcp_checksum);

        out.push(bytes);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ipv4_udp(payload_len: usize) -> Vec<u8> {
        let mut b = vec![0u8; 20 + payload_len];
        b[0] = 0x45;
        let total = (20 + payload_len) as u16;
        b[2..4].copy_from_slice(&total.to_be_bytes());
        b[9] = 17;
        b
    }

    #[test]
    fn overlap_zero_is_deterministic_and_grows_nothing_extra() {
        let op = Ipv4Overlap::build(&[Scalar::Int(48), Scalar::Int(0)]).unwrap();
        assert!(op.is_deterministic());
        let mut pl = PacketList::new();
        pl.add(Packet::from_raw(ipv4_udp(100)), 0.0).unwrap();
        let out = op.apply(pl);
        assert!(out.len() > 1);
    }
}
