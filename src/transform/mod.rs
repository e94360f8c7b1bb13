//! The operator catalog: a stateless [`Transformation`] per named mangling
//! effect, plus the [`Target`] selector shared by the single-packet
//! operators and the static name [`registry`].
//!
//! Grounded in `original_source/fragscapy/modifications/mod.py`'s `Mod`
//! base class (arity-checked constructor, `is_deterministic`, `apply`,
//! `get_description`), reworked as a trait object instead of duck typing.

use crate::domain::Scalar;
use crate::errors::TransformError;
use crate::packet::PacketList;

pub mod delay;
pub mod drop_one;
pub mod drop_prob;
pub mod duplicate;
pub mod echo;
pub mod field;
pub mod frag_v4;
pub mod frag_v6;
pub mod overlap;
pub mod print_mod;
pub mod registry;
pub mod reorder;
pub mod select;
pub mod summary;
pub mod tcp_segment;
pub mod v6_exthdr_shuffle;
pub mod v6_header_field;

/// Which packet in a list a single-packet operator acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    First,
    Last,
    Random,
    Index(usize),
}

impl Target {
    /// Parses the `target` argument shared by Drop-one/Duplicate/Delay:
    /// `"first"`, `"last"`, `"random"`, or a bare non-negative integer.
    pub fn parse(s: &Scalar, mod_name: &'static str, index: usize) -> Result<Target, TransformError> {
        match s {
            Scalar::Str(s) => match s.as_str() {
                "first" => Ok(Target::First),
                "last" => Ok(Target::Last),
                "random" => Ok(Target::Random),
                other => other
                    .parse::<usize>()
                    .map(Target::Index)
                    .map_err(|_| TransformError::BadArgument {
                        mod_name,
                        index,
                        message: format!("'{}' is not a target (first/last/random/integer)", other),
                    }),
            },
            Scalar::Int(i) if *i >= 0 => Ok(Target::Index(*i as usize)),
            other => Err(TransformError::BadArgument {
                mod_name,
                index,
                message: format!("'{}' is not a target (first/last/random/integer)", other),
            }),
        }
    }

    pub fn is_deterministic(self) -> bool {
        !matches!(self, Target::Random)
    }
}

/// One named, ordered (option-name, rendered-value) pair, used both for
/// `usage()` formatting and for the modification-log record of an
/// installed recipe.
pub type Described = Vec<(&'static str, String)>;

/// A stateless mangling/observation step. Every operator in the catalog
/// implements this once, built from its already-validated constructor
/// arguments; [`apply`](Transformation::apply) itself never fails.
pub trait Transformation: Send + Sync {
    /// The name this operator is registered under.
    fn name(&self) -> &'static str;

    /// Number of required constructor arguments, or `-1` for variadic.
    fn arity() -> isize
    where
        Self: Sized;

    /// Two-line usage text: name, then a short description of the
    /// arguments this operator takes.
    fn usage(&self) -> String;

    /// Whether repeated `apply` calls with equal input and equal RNG state
    /// produce equal output. Most operators are deterministic; anything
    /// that consults `rand` is not.
    fn is_deterministic(&self) -> bool {
        true
    }

    /// Applies this operator to `pl`, returning the transformed list. May
    /// return the same `pl` unchanged, or a new one.
    fn apply(&self, pl: PacketList) -> PacketList;

    /// Resolved argument values for logging and the modification file.
    fn describe(&self) -> Described {
        Vec::new()
    }
}

fn arg_count_error(mod_name: &'static str, expected: isize, got: usize) -> TransformError {
    TransformError::Arity {
        mod_name,
        expected,
        got,
    }
}

pub(crate) fn require_arity(mod_name: &'static str, expected: isize, args: &[Scalar]) -> Result<(), TransformError> {
    if expected >= 0 && args.len() != expected as usize {
        return Err(arg_count_error(mod_name, expected, args.len()));
    }
    Ok(())
}

pub(crate) fn arg_str<'a>(args: &'a [Scalar], index: usize, mod_name: &'static str) -> Result<&'a str, TransformError> {
    args.get(index)
        .and_then(Scalar::as_str)
        .ok_or_else(|| TransformError::BadArgument {
            mod_name,
            index,
            message: "expected a string argument".to_string(),
        })
}

pub(crate) fn arg_int(args: &[Scalar], index: usize, mod_name: &'static str) -> Result<i64, TransformError> {
    args.get(index)
        .and_then(Scalar::as_int)
        .ok_or_else(|| TransformError::BadArgument {
            mod_name,
            index,
            message: "expected an integer argument".to_string(),
        })
}

pub(crate) fn arg_float(args: &[Scalar], index: usize, mod_name: &'static str) -> Result<f64, TransformError> {
    args.get(index)
        .and_then(Scalar::as_float)
        .ok_or_else(|| TransformError::BadArgument {
            mod_name,
            index,
            message: "expected a numeric argument".to_string(),
        })
}
