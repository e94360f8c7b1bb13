use crate::domain::Scalar;
use crate::errors::TransformError;
use crate::packet::{L3Protocol, PacketList};

use super::{require_arity, Described, Transformation};

/// Prints the list's length and a per-protocol packet count. Observational
/// only.
pub struct Summary;

impl Summary {
    pub fn build(args: &[Scalar]) -> Result<Box<dyn Transformation>, TransformError> {
        require_arity("summary", 0, args)?;
        Ok(Box::new(Summary))
    }
}

impl Transformation for Summary {
    fn name(&self) -> &'static str {
        "summary"
    }

    fn arity() -> isize {
        0
    }

    fn usage(&self) -> String {
        "summary\nPrints the packet count by L3 protocol.".to_string()
    }

    fn apply(&self, pl: PacketList) -> PacketList {
        let (mut v4, mut v6, mut other) = (0, 0, 0);
        for pkt in pl.iter() {
            match pkt.l3_protocol() {
                L3Protocol::Ipv4 => v4 += 1,
                L3Protocol::Ipv6 => v6 += 1,
                L3Protocol::Other => other += 1,
            }
        }
        println!(
            "{} packets (ipv4={}, ipv6={}, other={})",
            pl.len(),
            v4,
            v6,
            other
        );
        pl
    }

    fn describe(&self) -> Described {
        Vec::new()
    }
}
