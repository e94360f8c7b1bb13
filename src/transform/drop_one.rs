use crate::domain::Scalar;
use crate::errors::TransformError;
use crate::packet::PacketList;

use super::{require_arity, Described, Target, Transformation};

/// Removes one packet at the resolved target index. Out-of-range or an
/// empty list is a no-op, matching the catalog's boundary invariant.
pub struct DropOne {
    target: Target,
}

impl DropOne {
    pub fn build(args: &[Scalar]) -> Result<Box<dyn Transformation>, TransformError> {
        require_arity("drop", 1, args)?;
        let target = Target::parse(&args[0], "drop", 0)?;
        Ok(Box::new(DropOne { target }))
    }
}

impl Transformation for DropOne {
    fn name(&self) -> &'static str {
        "drop"
    }

    fn arity() -> isize {
        1
    }

    fn usage(&self) -> String {
        "drop <first|last|random|N>\nRemoves one packet at the given position.".to_string()
    }

    fn is_deterministic(&self) -> bool {
        self.target.is_deterministic()
    }

    fn apply(&self, mut pl: PacketList) -> PacketList {
        if let Some(i) = pl.resolve_target(self.target) {
            let _ = pl.remove(i);
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

    fn pl_of(n: usize) -> PacketList {
        let mut pl = PacketList::new();
        for _ in 0..n {
            pl.add(Packet::new(vec![0u8; 20], L3Protocol::Other), 0.0).unwrap();
        }
        pl
    }

    #[test]
    fn drops_first() {
        let op = DropOne::build(&[Scalar::Str("first".into())]).unwrap();
        let out = op.apply(pl_of(3));
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn out_of_range_index_is_noop() {
        let op = DropOne::build(&[Scalar::Int(99)]).unwrap();
        let out = op.apply(pl_of(2));
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn empty_list_is_noop() {
        let op = DropOne::build(&[Scalar::Str("first".into())]).unwrap();
        let out = op.apply(pl_of(0));
        assert_eq!(out.len(), 0);
    }
}
