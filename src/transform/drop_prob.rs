use rand::Rng;

use crate::domain::Scalar;
use crate::errors::TransformError;
use crate::packet::PacketList;

use super::{arg_float, require_arity, Described, Transformation};

/// Independently drops each packet with probability `p`.
pub struct DropProb {
    p: f64,
}

impl DropProb {
    pub fn build(args: &[Scalar]) -> Result<Box<dyn Transformation>, TransformError> {
        require_arity("drop_prob", 1, args)?;
        let p = arg_float(args, 0, "drop_prob")?;
        if !(0.0..=1.0).contains(&p) {
            return Err(TransformError::BadArgument {
                mod_name: "drop_prob",
                index: 0,
                message: format!("probability must be within [0, 1], got {}", p),
            });
        }
        Ok(Box::new(DropProb { p }))
    }
}

impl Transformation for DropProb {
    fn name(&self) -> &'static str {
        "drop_prob"
    }

    fn arity() -> isize {
        1
    }

    fn usage(&self) -> String {
        "drop_prob <p>\nDrops each packet independently with probability p.".to_string()
    }

    fn is_deterministic(&self) -> bool {
        self.p == 0.0 || self.p == 1.0
    }

    fn apply(&self, pl: PacketList) -> PacketList {
        if self.p == 0.0 {
            return pl;
        }
        if self.p == 1.0 {
            return PacketList::new();
        }
        let mut rng = rand::thread_rng();
        pl.into_iter().filter(|_| rng.gen::<f64>() >= self.p).collect()
    }

    fn describe(&self) -> Described {
        vec![("p", self.p.to_string())]
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
    fn zero_probability_passes_everything_through() {
        let op = DropProb::build(&[Scalar::Float(0.0)]).unwrap();
        assert_eq!(op.apply(pl_of(5)).len(), 5);
    }

    #[test]
    fn one_probability_drops_everything() {
        let op = DropProb::build(&[Scalar::Float(1.0)]).unwrap();
        assert_eq!(op.apply(pl_of(5)).len(), 0);
    }

    #[test]
    fn rejects_out_of_range_probability() {
        assert!(DropProb::build(&[Scalar::Float(1.5)]).is_err());
        assert!(DropProb::build(&[Scalar::Float(-0.1)]).is_err());
    }
}
