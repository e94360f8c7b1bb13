// Copyright (c) 2016 Linus Färnstrand <faern@faern.net>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! # Fragscapy
//!
//! A test harness that intercepts packets traversing a local host through an
//! `NFQUEUE`, rewrites them according to a declarative recipe, forwards the
//! result, and runs a user command once per combination of recipe
//! parameters. Built for protocol-conformance and robustness testing:
//! IPv4/IPv6 fragmentation, TCP segmentation, extension-header permutations,
//! field fuzzing, and drop/duplicate/reorder/delay patterns.
//!
//! ## Architecture
//!
//! - [`packet`] holds the owned, mutable [`Packet`](packet::Packet)/
//!   [`PacketList`](packet::PacketList) types every operator works on.
//! - [`transform`] is the catalog of operators (`Transformation` impls) plus
//!   the static name registry.
//! - [`domain`] and [`generator`] enumerate the Cartesian product of
//!   per-operator parameter domains into concrete recipes.
//! - [`queue_rule`] installs/removes the nftables rules that steer traffic
//!   into the queue.
//! - [`engine`] runs the worker threads that dequeue, transform, and
//!   re-inject packets.
//! - [`driver`] is the top-level orchestrator tying all of the above to a
//!   configuration document and a user command.
//! - [`config`] deserializes the JSON configuration document.
//! - [`capture`] is the optional pcap mirroring writer.
//!
//! None of this crate implements its own TCP/IP stack: wire bytes are parsed
//! and re-serialized through `pnet`, with a small hand-rolled chain walker in
//! [`ipv6hdr`] for IPv6 extension headers, which `pnet` does not model.

#[macro_use]
extern crate log;

pub mod capture;
pub mod config;
pub mod domain;
pub mod driver;
pub mod engine;
pub mod errors;
pub mod generator;
pub mod ipv6hdr;
pub mod packet;
pub mod queue_rule;
pub mod transform;

pub use errors::FragscapyError;
pub use packet::{Packet, PacketList};
pub use transform::Transformation;

/// Default NFQUEUE-facing MTU used when no explicit fragmentation size is
/// given by a recipe; mirrors the teacher's `DEFAULT_MTU` for Ethernet.
pub static DEFAULT_MTU: usize = 1500;

/// Default number of repetitions for a non-deterministic recipe, overridable
/// from the CLI with `--repeat`.
pub static DEFAULT_REPEAT: usize = 100;
