//! Finite, indexable, restartable value domains for operator parameters,
//! and the grammar that parses them out of a single configuration string.
//!
//! Grounded in the generator contract of `original_source/fragscapy/
//! modgenerator.py`'s `ModOption` hierarchy (range/sequence/singleton
//! options, each indexable and `len()`-able), reworked as small owned enums
//! instead of an `ABC` class hierarchy.

use crate::errors::DomainError;

/// A single scalar value produced by an [`OptionDomain`].
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Str(String),
    Int(i64),
    Float(f64),
    None,
}

impl Scalar {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Scalar::Int(i) => Some(*i),
            Scalar::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Scalar::Float(f) => Some(*f),
            Scalar::Int(i) => Some(*i as f64),
            _ => None,
        }
    }
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Str(s) => write!(f, "{}", s),
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::Float(x) => write!(f, "{}", x),
            Scalar::None => write!(f, "none"),
        }
    }
}

/// A finite, indexable, restartable sequence of [`Scalar`] values.
#[derive(Debug, Clone)]
pub enum OptionDomain {
    /// Inclusive integer range `start..=stop` stepped by `step` (which may
    /// be negative).
    IntRange { start: i64, stop: i64, step: i64 },
    Seq(Vec<Scalar>),
    Singleton(Scalar),
}

impl OptionDomain {
    /// Number of distinct values this domain enumerates. Always `>= 1`.
    pub fn len(&self) -> usize {
        match self {
            OptionDomain::IntRange { start, stop, step } => {
                (((stop - start) / step) + 1).max(1) as usize
            }
            OptionDomain::Seq(v) => v.len().max(1),
            OptionDomain::Singleton(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Returns the `i`-th value. Deterministic and constant for a given `i`.
    pub fn get(&self, i: usize) -> Result<Scalar, DomainError> {
        let len = self.len();
        if i >= len {
            return Err(DomainError::IndexOutOfRange { index: i, len });
        }
        Ok(match self {
            OptionDomain::IntRange { start, step, .. } => Scalar::Int(start + (i as i64) * step),
            OptionDomain::Seq(v) => v[i].clone(),
            OptionDomain::Singleton(s) => s.clone(),
        })
    }

    /// Parses one option-domain expression per the grammar in SPEC_FULL.md
    /// §4.4: `"range N"`, `"range A B"`, `"range A B S"`, `"seq_str W…"`,
    /// `"seq_int N…"`, `"seq_float F…"`, `"str S"`, `"int N"`, `"float F"`,
    /// `"none"`, or a bare literal (an `int` if it parses as one, else a
    /// `str`).
    pub fn parse(expr: &str) -> Result<OptionDomain, DomainError> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Err(DomainError::Empty);
        }
        let tokens: Vec<&str> = expr.split_whitespace().collect();
        match tokens[0] {
            "range" => parse_range(&tokens[1..]),
            "seq_str" => Ok(OptionDomain::Seq(tokens[1..].iter().map(|s| Scalar::Str(s.to_string())).collect())),
            "seq_int" => {
                let mut out = Vec::with_capacity(tokens.len() - 1);
                for t in &tokens[1..] {
                    out.push(Scalar::Int(parse_int(t)?));
                }
                Ok(OptionDomain::Seq(out))
            }
            "seq_float" => {
                let mut out = Vec::with_capacity(tokens.len() - 1);
                for t in &tokens[1..] {
                    out.push(Scalar::Float(parse_float(t)?));
                }
                Ok(OptionDomain::Seq(out))
            }
            "str" => Ok(OptionDomain::Singleton(Scalar::Str(tokens[1..].join(" ")))),
            "int" if tokens.len() >= 2 => Ok(OptionDomain::Singleton(Scalar::Int(parse_int(tokens[1])?))),
            "float" if tokens.len() >= 2 => Ok(OptionDomain::Singleton(Scalar::Float(parse_float(tokens[1])?))),
            "int" | "float" => Err(DomainError::UnknownKeyword(expr.to_string())),
            "none" => Ok(OptionDomain::Singleton(Scalar::None)),
            bare => {
                if let Ok(i) = bare.parse::<i64>() {
                    Ok(OptionDomain::Singleton(Scalar::Int(i)))
                } else {
                    Ok(OptionDomain::Singleton(Scalar::Str(expr.to_string())))
                }
            }
        }
    }
}

fn parse_int(s: &str) -> Result<i64, DomainError> {
    s.parse::<i64>().map_err(|_| DomainError::NotANumber(s.to_string()))
}

fn parse_float(s: &str) -> Result<f64, DomainError> {
    s.parse::<f64>().map_err(|_| DomainError::NotANumber(s.to_string()))
}

fn parse_range(args: &[&str]) -> Result<OptionDomain, DomainError> {
    let (start, stop, step) = match args.len() {
        1 => (0, parse_int(args[0])?, 1),
        2 => (parse_int(args[0])?, parse_int(args[1])?, 1),
        3 => (parse_int(args[0])?, parse_int(args[1])?, parse_int(args[2])?),
        _ => return Err(DomainError::UnknownKeyword(format!("range {}", args.join(" ")))),
    };
    if step == 0 {
        return Err(DomainError::ZeroStep);
    }
    if (step > 0 && start > stop) || (step < 0 && start < stop) {
        return Err(DomainError::EmptyRange { start: start as f64, stop: stop as f64, step: step as f64 });
    }
    Ok(OptionDomain::IntRange { start, stop, step })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_single_arg_inclusive() {
        let d = OptionDomain::parse("range 3").unwrap();
        assert_eq!(d.len(), 4);
        assert_eq!(d.get(0).unwrap(), Scalar::Int(0));
        assert_eq!(d.get(3).unwrap(), Scalar::Int(3));
    }

    #[test]
    fn range_start_equals_stop_has_length_one() {
        let d = OptionDomain::parse("range 5 5").unwrap();
        assert_eq!(d.len(), 1);
        assert_eq!(d.get(0).unwrap(), Scalar::Int(5));
    }

    #[test]
    fn range_rejects_zero_step() {
        assert!(OptionDomain::parse("range 0 5 0").is_err());
    }

    #[test]
    fn range_rejects_wrong_direction() {
        assert!(OptionDomain::parse("range 5 0 1").is_err());
        assert!(OptionDomain::parse("range 0 5 -1").is_err());
    }

    #[test]
    fn negative_step_range() {
        let d = OptionDomain::parse("range 5 0 -1").unwrap();
        assert_eq!(d.len(), 6);
        assert_eq!(d.get(5).unwrap(), Scalar::Int(0));
    }

    #[test]
    fn seq_int_parses_each_token() {
        let d = OptionDomain::parse("seq_int 1 2 3").unwrap();
        assert_eq!(d.len(), 3);
        assert_eq!(d.get(1).unwrap(), Scalar::Int(2));
    }

    #[test]
    fn bare_literal_defaults_to_int_then_str() {
        assert_eq!(OptionDomain::parse("42").unwrap().get(0).unwrap(), Scalar::Int(42));
        assert_eq!(OptionDomain::parse("first").unwrap().get(0).unwrap(), Scalar::Str("first".into()));
    }

    #[test]
    fn none_is_a_length_one_singleton() {
        let d = OptionDomain::parse("none").unwrap();
        assert_eq!(d.len(), 1);
        assert_eq!(d.get(0).unwrap(), Scalar::None);
    }

    #[test]
    fn out_of_range_index_is_an_error() {
        let d = OptionDomain::parse("range 2").unwrap();
        assert!(d.get(10).is_err());
    }

    #[test]
    fn int_or_float_without_a_value_is_a_domain_error_not_a_panic() {
        assert!(OptionDomain::parse("int").is_err());
        assert!(OptionDomain::parse("float").is_err());
    }
}
