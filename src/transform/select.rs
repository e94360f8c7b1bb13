use crate::domain::Scalar;
use crate::errors::TransformError;
use crate::packet::PacketList;

use super::{require_arity, Described, Transformation};

/// Builds a new PacketList containing only the listed indices, in listed
/// order; duplicates are permitted. An out-of-range index drops that
/// position from the result rather than aborting the whole list, so that
/// `apply` stays total; the dropped index is logged.
pub struct Select {
    indices: Vec<usize>,
}

impl Select {
    pub fn build(args: &[Scalar]) -> Result<Box<dyn Transformation>, TransformError> {
        require_arity("select", -1, args)?;
        let mut indices = Vec::with_capacity(args.len());
        for (idx, a) in args.iter().enumerate() {
            let i = a.as_int().ok_or_else(|| TransformError::BadArgument {
                mod_name: "select",
                index: idx,
                message: "expected a non-negative integer index".to_string(),
            })?;
            if i < 0 {
                return Err(TransformError::BadArgument {
                    mod_name: "select",
                    index: idx,
                    message: format!("index must be non-negative, got {}", i),
                });
            }
            indices.push(i as usize);
        }
        Ok(Box::new(Select { indices }))
    }
}

impl Transformation for Select {
    fn name(&self) -> &'static str {
        "select"
    }

    fn arity() -> isize {
        -1
    }

    fn usage(&self) -> String {
        "select <i0> <i1> ...\nKeeps only the listed packet indices, in order.".to_string()
    }

    fn apply(&self, pl: PacketList) -> PacketList {
        let mut out = PacketList::new();
        for &i in &self.indices {
            match pl.get(i) {
                Some(pkt) => {
                    let _ = out.add(pkt.clone(), pkt.delay());
                }
                None => warn!("select: index {} out of range for a list of {} packets", i, pl.len()),
            }
        }
        out
    }

    fn describe(&self) -> Described {
        vec![("indices", format!("{:?}", self.indices))]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{L3Protocol, Packet};

    #[test]
    fn selects_in_listed_order_with_duplicates() {
        let op = Select::build(&[Scalar::Int(1), Scalar::Int(0), Scalar::Int(1)]).unwrap();
        let mut pl = PacketList::new();
        pl.add(Packet::new(vec![0], L3Protocol::Other), 0.0).unwrap();
        pl.add(Packet::new(vec![1], L3Protocol::Other), 0.0).unwrap();
        let out = op.apply(pl);
        assert_eq!(out.len(), 3);
        assert_eq!(out.get(0).unwrap().bytes(), &[1]);
        assert_eq!(out.get(1).unwrap().bytes(), &[0]);
        assert_eq!(out.get(2).unwrap().bytes(), &[1]);
    }

    #[test]
    fn out_of_range_index_is_dropped_not_fatal() {
        let op = Select::build(&[Scalar::Int(5)]).unwrap();
        let mut pl = PacketList::new();
        pl.add(Packet::new(vec![0], L3Protocol::Other), 0.0).unwrap();
        assert_eq!(op.apply(pl).len(), 0);
    }
}
