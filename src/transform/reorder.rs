use rand::seq::SliceRandom;

use crate::domain::Scalar;
use crate::errors::TransformError;
use crate::packet::PacketList;

use super::{arg_str, require_arity, Described, Transformation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Reverse,
    Random,
}

/// Produces a new PacketList with the same elements reversed or uniformly
/// shuffled; delays travel with their packet.
pub struct Reorder {
    method: Method,
}

impl Reorder {
    pub fn build(args: &[Scalar]) -> Result<Box<dyn Transformation>, TransformError> {
        require_arity("reorder", 1, args)?;
        let method = match arg_str(args, 0, "reorder")? {
            "reverse" => Method::Reverse,
            "random" => Method::Random,
            other => {
                return Err(TransformError::BadArgument {
                    mod_name: "reorder",
                    index: 0,
                    message: format!("'{}' is not reverse or random", other),
                })
            }
        };
        Ok(Box::new(Reorder { method }))
    }
}

impl Transformation for Reorder {
    fn name(&self) -> &'static str {
        "reorder"
    }

    fn arity() -> isize {
        1
    }

    fn usage(&self) -> String {
        "reorder <reverse|random>\nReorders the packet list.".to_string()
    }

    fn is_deterministic(&self) -> bool {
        self.method == Method::Reverse
    }

    fn apply(&self, pl: PacketList) -> PacketList {
        let mut packets: Vec<_> = pl.into_iter().collect();
        match self.method {
            Method::Reverse => packets.reverse(),
            Method::Random => packets.shuffle(&mut rand::thread_rng()),
        }
        packets.into_iter().collect()
    }

    fn describe(&self) -> Described {
        vec![("method", format!("{:?}", self.method))]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{L3Protocol, Packet};

    #[test]
    fn reverse_preserves_delay_with_element() {
        let op = Reorder::build(&[Scalar::Str("reverse".into())]).unwrap();
        let mut pl = PacketList::new();
        pl.add(Packet::new(vec![1], L3Protocol::Other), 0.1).unwrap();
        pl.add(Packet::new(vec![2], L3Protocol::Other), 0.2).unwrap();
        let out = op.apply(pl);
        assert_eq!(out.get(0).unwrap().bytes(), &[2]);
        assert_eq!(out.get(0).unwrap().delay(), 0.2);
        assert_eq!(out.get(1).unwrap().bytes(), &[1]);
    }
}
