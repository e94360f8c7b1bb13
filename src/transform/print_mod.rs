use crate::domain::Scalar;
use crate::errors::TransformError;
use crate::packet::PacketList;

use super::{require_arity, Described, Transformation};

/// Prints a one-line hex dump of every packet's bytes. Observational only.
pub struct Print;

impl Print {
    pub fn build(args: &[Scalar]) -> Result<Box<dyn Transformation>, TransformError> {
        require_arity("print", 0, args)?;
        Ok(Box::new(Print))
    }
}

impl Transformation for Print {
    fn name(&self) -> &'static str {
        "print"
    }

    fn arity() -> isize {
        0
    }

    fn usage(&self) -> String {
        "print\nPrints a hex dump of every packet in the list.".to_string()
    }

    fn apply(&self, pl: PacketList) -> PacketList {
        for (i, pkt) in pl.iter().enumerate() {
            let hex: String = pkt.bytes().iter().map(|b| format!("{:02x}", b)).collect();
            println!("[{}] {}", i, hex);
        }
        pl
    }

    fn describe(&self) -> Described {
        Vec::new()
    }
}
