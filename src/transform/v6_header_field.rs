use pnet::packet::ipv6::MutableIpv6Packet;
use rand::Rng;

use crate::domain::Scalar;
use crate::errors::TransformError;
use crate::packet::{L3Protocol, PacketList};

use super::{require_arity, Described, Transformation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Which {
    HopLimit,
    PayloadLength,
    NextHeader,
}

impl Which {
    fn name(self) -> &'static str {
        match self {
            Which::HopLimit => "ipv6_hop",
            Which::PayloadLength => "ipv6_plen",
            Which::NextHeader => "ipv6_nh",
        }
    }

    fn max(self) -> u64 {
        match self {
            Which::HopLimit => 0xff,
            Which::PayloadLength => 0xffff,
            Which::NextHeader => 0xff,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Value {
    Fixed(u64),
    Random,
}

/// Overwrites Hop-Limit, Payload Length, or Next-Header on every IPv6
/// packet in the list. Non-IPv6 packets pass through unchanged.
pub struct Ipv6HeaderField {
    which: Which,
    value: Value,
}

impl Ipv6HeaderField {
    fn build_for(which: Which, args: &[Scalar]) -> Result<Box<dyn Transformation>, TransformError> {
        require_arity(which.name(), 1, args)?;
        let value = match &args[0] {
            Scalar::Str(s) if s == "random" => Value::Random,
            Scalar::Int(i) if *i >= 0 => {
                if (*i as u64) > which.max() {
                    return Err(TransformError::BadArgument {
                        mod_name: which.name(),
                        index: 0,
                        message: format!("{} exceeds the field's range (max {})", i, which.max()),
                    });
                }
                Value::Fixed(*i as u64)
            }
            other => {
                return Err(TransformError::BadArgument {
                    mod_name: which.name(),
                    index: 0,
                    message: format!("'{}' is not a value or 'random'", other),
                })
            }
        };
        Ok(Box::new(Ipv6HeaderField { which, value }))
    }

    pub fn build_hop(args: &[Scalar]) -> Result<Box<dyn Transformation>, TransformError> {
        Self::build_for(Which::HopLimit, args)
    }

    pub fn build_plen(args: &[Scalar]) -> Result<Box<dyn Transformation>, TransformError> {
        Self::build_for(Which::PayloadLength, args)
    }

    pub fn build_nh(args: &[Scalar]) -> Result<Box<dyn Transformation>, TransformError> {
        Self::build_for(Which::NextHeader, args)
    }

    fn resolve(&self) -> u64 {
        match self.value {
            Value::Fixed(v) => v,
            Value::Random => rand::thread_rng().gen_range(0..=self.which.max()),
        }
    }
}

impl Transformation for Ipv6HeaderField {
    fn name(&self) -> &'static str {
        self.which.name()
    }

    fn arity() -> isize {
        1
    }

    fn usage(&self) -> String {
        format!("{} <value|random>\nOverwrites the field on every IPv6 packet.", self.which.name())
    }

    fn is_deterministic(&self) -> bool {
        !matches!(self.value, Value::Random)
    }

    fn apply(&self, mut pl: PacketList) -> PacketList {
        for pkt in pl.iter_mut() {
            if pkt.l3_protocol() != L3Protocol::Ipv6 {
                continue;
            }
            let v = self.resolve();
            if let Some(mut p) = MutableIpv6Packet::new(pkt.bytes_mut()) {
                match self.which {
                    Which::HopLimit => p.set_hop_limit(v as u8),
                    Which::PayloadLength => p.set_payload_length(v as u16),
                    Which::NextHeader => p.set_next_header(pnet::packet::ip::IpNextHeaderProtocol::new(v as u8)),
                }
            }
        }
        pl
    }

    fn describe(&self) -> Described {
        vec![(self.which.name(), format!("{:?}", self.value))]
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Fixed(v) => write!(f, "{}", v),
            Value::Random => write!(f, "random"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Packet;

    fn ipv6_bytes() -> Vec<u8> {
        let mut b = vec![0u8; 40];
        b[0] = 0x60;
        b
    }

    #[test]
    fn sets_hop_limit() {
        let op = Ipv6HeaderField::build_hop(&[Scalar::Int(5)]).unwrap();
        let mut pl = PacketList::new();
        pl.add(Packet::from_raw(ipv6_bytes()), 0.0).unwrap();
        let out = op.apply(pl);
        assert_eq!(out.get(0).unwrap().bytes()[7], 5);
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(Ipv6HeaderField::build_nh(&[Scalar::Int(1000)]).is_err());
    }
}
