use crate::domain::Scalar;
use crate::errors::TransformError;
use crate::packet::PacketList;

use super::{require_arity, Described, Transformation};

/// Writes a fixed string to standard output. Observational only.
pub struct Echo {
    message: String,
}

impl Echo {
    pub fn build(args: &[Scalar]) -> Result<Box<dyn Transformation>, TransformError> {
        require_arity("echo", 1, args)?;
        let message = args[0].to_string();
        Ok(Box::new(Echo { message }))
    }
}

impl Transformation for Echo {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn arity() -> isize {
        1
    }

    fn usage(&self) -> String {
        "echo <message>\nPrints message to standard output, unchanged.".to_string()
    }

    fn apply(&self, pl: PacketList) -> PacketList {
        println!("{}", self.message);
        pl
    }

    fn describe(&self) -> Described {
        vec![("message", self.message.clone())]
    }
}
