use crate::domain::Scalar;
use crate::errors::TransformError;
use crate::packet::PacketList;

use super::{arg_float, require_arity, Described, Target, Transformation};

enum DelayTarget {
    One(Target),
    All,
}

/// Sets (does not accumulate) the per-packet delay of the target(s) to
/// `seconds`.
pub struct Delay {
    target: DelayTarget,
    seconds: f64,
}

impl Delay {
    pub fn build(args: &[Scalar]) -> Result<Box<dyn Transformation>, TransformError> {
        require_arity("delay", 2, args)?;
        let target = match &args[0] {
            Scalar::Str(s) if s == "all" => DelayTarget::All,
            other => DelayTarget::One(Target::parse(other, "delay", 0)?),
        };
        let seconds = arg_float(args, 1, "delay")?;
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(TransformError::BadArgument {
                mod_name: "delay",
                index: 1,
                message: format!("delay must be finite and non-negative, got {}", seconds),
            });
        }
        Ok(Box::new(Delay { target, seconds }))
    }
}

impl Transformation for Delay {
    fn name(&self) -> &'static str {
        "delay"
    }

    fn arity() -> isize {
        2
    }

    fn usage(&self) -> String {
        "delay <first|last|random|N|all> <seconds>\nSets the pre-send delay of the target packet(s).".to_string()
    }

    fn is_deterministic(&self) -> bool {
        match self.target {
            DelayTarget::All => true,
            DelayTarget::One(t) => t.is_deterministic(),
        }
    }

    fn apply(&self, mut pl: PacketList) -> PacketList {
        match self.target {
            DelayTarget::All => {
                for i in 0..pl.len() {
                    let _ = pl.set_delay(i, self.seconds);
                }
            }
            DelayTarget::One(t) => {
                if let Some(i) = pl.resolve_target(t) {
                    let _ = pl.set_delay(i, self.seconds);
                }
            }
        }
        pl
    }

    fn describe(&self) -> Described {
        vec![("seconds", self.seconds.to_string())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{L3Protocol, Packet};

    #[test]
    fn all_sets_every_packet() {
        let op = Delay::build(&[Scalar::Str("all".into()), Scalar::Float(0.5)]).unwrap();
        let mut pl = PacketList::new();
        pl.add(Packet::new(vec![0], L3Protocol::Other), 0.0).unwrap();
        pl.add(Packet::new(vec![1], L3Protocol::Other), 0.0).unwrap();
        let out = op.apply(pl);
        assert_eq!(out.get(0).unwrap().delay(), 0.5);
        assert_eq!(out.get(1).unwrap().delay(), 0.5);
    }

    #[test]
    fn rejects_negative_seconds() {
        assert!(Delay::build(&[Scalar::Str("first".into()), Scalar::Float(-1.0)]).is_err());
    }
}
