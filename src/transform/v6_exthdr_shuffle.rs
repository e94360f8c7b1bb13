use rand::seq::SliceRandom;

use crate::domain::Scalar;
use crate::errors::TransformError;
use crate::ipv6hdr::Ipv6Chain;
use crate::packet::{L3Protocol, Packet, PacketList};

use super::{require_arity, Described, Transformation};

/// Uniformly permutes the chain of IPv6 extension headers on each IPv6
/// packet, re-threading next-header pointers so the chain stays well
/// formed and still terminates at the original upper-layer protocol.
/// Non-IPv6 packets, and IPv6 packets with fewer than two extension
/// headers, pass through unchanged.
pub struct V6ExthdrShuffle;

impl V6ExthdrShuffle {
    pub fn build(args: &[Scalar]) -> Result<Box<dyn Transformation>, TransformError> {
        require_arity("ipv6_exthdr_shuffle", 0, args)?;
        Ok(Box::new(V6ExthdrShuffle))
    }
}

impl Transformation for V6ExthdrShuffle {
    fn name(&self) -> &'static str {
        "ipv6_exthdr_shuffle"
    }

    fn arity() -> isize {
        0
    }

    fn usage(&self) -> String {
        "ipv6_exthdr_shuffle\nRandomly permutes the IPv6 extension header chain of each packet.".to_string()
    }

    fn is_deterministic(&self) -> bool {
        false
    }

    fn apply(&self, pl: PacketList) -> PacketList {
        pl.into_iter()
            .map(|pkt| {
                if pkt.l3_protocol() != L3Protocol::Ipv6 {
                    return pkt;
                }
                let delay = pkt.delay();
                match Ipv6Chain::parse(pkt.bytes()) {
                    Ok(mut chain) if chain.nodes.len() > 1 => {
                        chain.nodes.shuffle(&mut rand::thread_rng());
                        chain.relink();
                        let mut shuffled = Packet::new(chain.into_bytes(), L3Protocol::Ipv6);
                        let _ = shuffled.set_delay(delay);
                        shuffled
                    }
                    _ => pkt,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipv6hdr::{AH, ROUTING};

    fn ipv6_two_ext_headers() -> Vec<u8> {
        let mut b = vec![0u8; 40];
        b[0] = 0x60;
        b[6] = ROUTING;
        b[7] = 64;
        b.extend_from_slice(&[AH, 0, 0, 0, 0, 0, 0, 0]); // Routing -> AH
        b.extend_from_slice(&[6, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]); // AH -> TCP
        b.extend_from_slice(b"PAYLOAD");
        b
    }

    #[test]
    fn preserves_total_length_and_upper_protocol() {
        let op = V6ExthdrShuffle::build(&[]).unwrap();
        let mut pl = PacketList::new();
        pl.add(Packet::from_raw(ipv6_two_ext_headers()), 0.0).unwrap();
        let input_len = pl.get(0).unwrap().bytes().len();
        let out = op.apply(pl);
        let chain = Ipv6Chain::parse(out.get(0).unwrap().bytes()).unwrap();
        assert_eq!(out.get(0).unwrap().bytes().len(), input_len);
        assert_eq!(chain.upper_layer_protocol(), 6);
        assert_eq!(chain.after(), b"PAYLOAD");
    }

    #[test]
    fn single_ext_header_is_left_alone() {
        let op = V6ExthdrShuffle::build(&[]).unwrap();
        let mut bytes = vec![0u8; 40];
        bytes[0] = 0x60;
        bytes[6] = 6;
        let mut pl = PacketList::new();
        pl.add(Packet::from_raw(bytes.clone()), 0.0).unwrap();
        let out = op.apply(pl);
        assert_eq!(out.get(0).unwrap().bytes(), bytes.as_slice());
    }
}
