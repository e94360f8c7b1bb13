use crate::domain::Scalar;
use crate::errors::TransformError;
use crate::packet::PacketList;

use super::{require_arity, Described, Target, Transformation};

/// Inserts a deep copy of the selected packet immediately after it,
/// preserving its delay on the clone.
pub struct Duplicate {
    target: Target,
}

impl Duplicate {
    pub fn build(args: &[Scalar]) -> Result<Box<dyn Transformation>, TransformError> {
        require_arity("duplicate", 1, args)?;
        let target = Target::parse(&args[0], "duplicate", 0)?;
        Ok(Box::new(Duplicate { target }))
    }
}

impl Transformation for Duplicate {
    fn name(&self) -> &'static str {
        "duplicate"
    }

    fn arity() -> isize {
        1
    }

    fn usage(&self) -> String {
        "duplicate <first|last|random|N>\nInserts a copy of the packet right after it.".to_string()
    }

    fn is_deterministic(&self) -> bool {
        self.target.is_deterministic()
    }

    fn apply(&self, mut pl: PacketList) -> PacketList {
        if let Some(i) = pl.resolve_target(self.target) {
            let clone = pl.get(i).unwrap().clone();
            let delay = clone.delay();
            let _ = pl.insert(i + 1, clone, delay);
        }
        pl
    }

    fn describe(&self) -> Described {
        vec![("target", format!("{:?}", self.target))]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{L3Protocol, Packet};

    #[test]
    fn duplicates_last_preserving_delay() {
        let op = Duplicate::build(&[Scalar::Str("last".into())]).unwrap();
        let mut pl = PacketList::new();
        pl.add(Packet::new(vec![1], L3Protocol::Other), 0.0).unwrap();
        pl.add(Packet::new(vec![2], L3Protocol::Other), 0.25).unwrap();
        let out = op.apply(pl);
        assert_eq!(out.len(), 3);
        assert_eq!(out.get(1).unwrap().delay(), 0.25);
        assert_eq!(out.get(2).unwrap().delay(), 0.25);
    }
}
