//! Error types, one per component, composed into [`FragscapyError`] at the
//! CLI boundary. Mirrors the teacher's `TxError`/`RxError`/`StackError`
//! layering, but expressed with `thiserror` instead of hand-rolled
//! `Display`/`Error` impls.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors constructing or mutating a [`crate::packet::Packet`] or
/// [`crate::packet::PacketList`].
#[derive(Debug, Error)]
pub enum PacketError {
    #[error("index {index} out of range (list has {len} packets)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("delay must be finite and non-negative, got {0}")]
    InvalidDelay(f64),

    #[error("packet did not parse as a well-formed L3 frame: {0}")]
    Malformed(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Errors raised while parsing a transformation's arguments or applying it.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("'{mod_name}' expects {expected} argument(s), got {got}")]
    Arity {
        mod_name: &'static str,
        expected: isize,
        got: usize,
    },

    #[error("'{mod_name}' argument {index}: {message}")]
    BadArgument {
        mod_name: &'static str,
        index: usize,
        message: String,
    },

    #[error("unknown transformation '{0}'")]
    UnknownOperator(String),

    #[error("'{mod_name}': {message}")]
    Apply { mod_name: &'static str, message: String },

    #[error(transparent)]
    Packet(#[from] PacketError),
}

/// Errors parsing an [`crate::domain::OptionDomain`] grammar string.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("empty option-domain expression")]
    Empty,

    #[error("'range' requires a non-zero step, got 0")]
    ZeroStep,

    #[error("'range {start} {stop} {step}' is empty: step direction disagrees with start/stop")]
    EmptyRange { start: f64, stop: f64, step: f64 },

    #[error("could not parse '{0}' as a number")]
    NotANumber(String),

    #[error("unrecognized option-domain keyword '{0}'")]
    UnknownKeyword(String),

    #[error("index {index} out of range (domain has {len} values)")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Errors installing or removing a host filter rule.
#[derive(Debug, Error)]
pub enum QueueRuleError {
    #[error("rule has neither an ingress nor an egress chain selected")]
    NoChain,

    #[error("rule has neither ipv4 nor ipv6 selected")]
    NoFamily,

    #[error("insufficient privileges to install nftables rule (need CAP_NET_ADMIN): {0}")]
    Privilege(String),

    #[error("nftables command failed: {0}")]
    Nftables(String),
}

/// Errors raised by the interception engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unable to bind queue {qnum}: {source}")]
    QueueBind { qnum: u16, source: io::Error },

    #[error("error receiving from queue {qnum}: {source}")]
    QueueRecv { qnum: u16, source: io::Error },

    #[error("no active recipe installed for direction {0:?}")]
    NoActiveRecipe(crate::engine::Direction),

    #[error("failed to send re-injected packet: {0}")]
    Send(String),

    #[error(transparent)]
    Packet(#[from] PacketError),
}

/// Errors loading or validating the configuration document.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{path}: {message}")]
    InvalidDocument { path: String, message: String },

    #[error("could not read configuration file {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("{path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_path_to_error::Error<serde_json::Error>,
    },

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Errors raised by the top-level test driver.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    QueueRule(#[from] QueueRuleError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("could not open sink {path}: {source}")]
    Sink { path: PathBuf, source: io::Error },
}

/// Top-level error composing every component error, surfaced at the CLI
/// boundary. Analogous to the teacher's `StackError` aggregating `TxError`
/// and `io::Error`.
#[derive(Debug, Error)]
pub enum FragscapyError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    QueueRule(#[from] QueueRuleError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Io(#[from] io::Error),
}
