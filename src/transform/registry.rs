//! The static name → constructor table for every operator in the catalog.
//!
//! No dynamic plugin loading: the full set of operators is known at compile
//! time and dispatched through a `match`, mirroring the teacher's own
//! aversion (see `stack.rs`) to runtime-registered protocol handlers in
//! favor of a fixed, explicit dispatch table.

use crate::domain::Scalar;
use crate::errors::TransformError;

use super::{
    delay::Delay, drop_one::DropOne, drop_prob::DropProb, duplicate::Duplicate, echo::Echo, field::Field,
    frag_v4::FragV4, frag_v6::FragV6, frag_v6::FragV6Atomic, overlap::Ipv4Overlap, overlap::TcpOverlap,
    print_mod::Print, reorder::Reorder, select::Select, summary::Summary, tcp_segment::TcpSegment,
    v6_exthdr_shuffle::V6ExthdrShuffle, v6_header_field::Ipv6HeaderField, Transformation,
};

/// Every registered operator name, in a fixed, stable order (used by the
/// `list` CLI subcommand).
pub const NAMES: &[&str] = &[
    "drop",
    "drop_prob",
    "duplicate",
    "reorder",
    "select",
    "delay",
    "echo",
    "print",
    "summary",
    "field",
    "ipv4_fragment",
    "ipv6_fragment",
    "ipv6_atomic_fragment",
    "ipv4_overlap",
    "tcp_overlap",
    "tcp_segment",
    "ipv6_exthdr_shuffle",
    "ipv6_hop",
    "ipv6_plen",
    "ipv6_nh",
];

/// Builds the named operator from its already-JSON-deserialized argument
/// scalars. Unknown names are a [`TransformError::UnknownOperator`].
pub fn construct(mod_name: &str, args: &[Scalar]) -> Result<Box<dyn Transformation>, TransformError> {
    match mod_name {
        "drop" => DropOne::build(args),
        "drop_prob" => DropProb::build(args),
        "duplicate" => Duplicate::build(args),
        "reorder" => Reorder::build(args),
        "select" => Select::build(args),
        "delay" => Delay::build(args),
        "echo" => Echo::build(args),
        "print" => Print::build(args),
        "summary" => Summary::build(args),
        "field" => Field::build(args),
        "ipv4_fragment" => FragV4::build(args),
        "ipv6_fragment" => FragV6::build(args),
        "ipv6_atomic_fragment" => FragV6Atomic::build(args),
        "ipv4_overlap" => Ipv4Overlap::build(args),
        "tcp_overlap" => TcpOverlap::build(args),
        "tcp_segment" => TcpSegment::build(args),
        "ipv6_exthdr_shuffle" => V6ExthdrShuffle::build(args),
        "ipv6_hop" => Ipv6HeaderField::build_hop(args),
        "ipv6_plen" => Ipv6HeaderField::build_plen(args),
        "ipv6_nh" => Ipv6HeaderField::build_nh(args),
        other => Err(TransformError::UnknownOperator(other.to_string())),
    }
}

/// Printed usage text for the named operator, independent of any
/// particular argument values (used by the `usage`/`list` CLI
/// subcommands, which have no concrete arguments on hand).
pub fn usage(mod_name: &str) -> Result<String, TransformError> {
    let text = match mod_name {
        "drop" => "drop <first|last|random|N>\nRemoves one packet at the given position.",
        "drop_prob" => "drop_prob <p>\nDrops each packet independently with probability p.",
        "duplicate" => "duplicate <first|last|random|N>\nInserts a copy of the packet right after it.",
        "reorder" => "reorder <reverse|random>\nReorders the packet list.",
        "select" => "select <i0> <i1> ...\nKeeps only the listed packet indices, in order.",
        "delay" => "delay <first|last|random|N|all> <seconds>\nSets the pre-send delay of the target packet(s).",
        "echo" => "echo <message>\nPrints message to standard output, unchanged.",
        "print" => "print\nPrints a hex dump of every packet in the list.",
        "summary" => "summary\nPrints the packet count by L3 protocol.",
        "field" => "field <layer> <field> <value|random>\nOverwrites a header field on each matching packet.",
        "ipv4_fragment" => "ipv4_fragment <size>\nSplits each IPv4 packet into fragments of at most size bytes.",
        "ipv6_fragment" => {
            "ipv6_fragment <size>\nSplits each IPv6 packet using a Fragment extension header, at most size bytes per fragment."
        }
        "ipv6_atomic_fragment" => {
            "ipv6_atomic_fragment <size>\nLike ipv6_fragment, but a packet that already fits gets a single atomic Fragment header instead of passing through unchanged."
        }
        "ipv4_overlap" => {
            "ipv4_overlap <fragsize> <overlap>\nFragments an IPv4 packet, appending overlap random bytes to each fragment."
        }
        "tcp_overlap" => {
            "tcp_overlap <segsize> <overlap> <before|after>\nSegments a TCP packet, adding overlap random bytes to each segment."
        }
        "tcp_segment" => "tcp_segment <size>\nSplits a TCP packet's payload into segments of at most size bytes.",
        "ipv6_exthdr_shuffle" => "ipv6_exthdr_shuffle\nRandomly permutes the IPv6 extension header chain of each packet.",
        "ipv6_hop" => "ipv6_hop <value|random>\nOverwrites Hop-Limit on every IPv6 packet.",
        "ipv6_plen" => "ipv6_plen <value|random>\nOverwrites Payload Length on every IPv6 packet.",
        "ipv6_nh" => "ipv6_nh <value|random>\nOverwrites Next-Header on every IPv6 packet.",
        other => return Err(TransformError::UnknownOperator(other.to_string())),
    };
    Ok(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_listed_name_has_a_usage_string() {
        for name in NAMES {
            assert!(usage(name).is_ok(), "missing usage for {}", name);
        }
    }

    #[test]
    fn unknown_operator_is_rejected() {
        assert!(construct("not_a_real_operator", &[]).is_err());
    }

    #[test]
    fn construct_dispatches_to_the_right_builder() {
        let op = construct("echo", &[Scalar::Str("hi".into())]).unwrap();
        assert_eq!(op.name(), "echo");
    }
}
