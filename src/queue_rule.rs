//! Installs and removes the nftables rules that steer matching traffic into
//! an NFQUEUE, one table per address family, built on the same `Batch` /
//! `Nftables` / `helper::apply_ruleset` path the `nftables` crate's own
//! examples use.

use nftables::batch::Batch;
use nftables::expr::{Expression, Meta, MetaKey, NamedExpression, Payload, PayloadField};
use nftables::helper;
use nftables::schema::{Chain, NfListObject, Rule, Table};
use nftables::stmt::{Match, Operator, Queue, Statement};
use nftables::types::{NfChainPolicy, NfChainType, NfFamily, NfHook};

use crate::errors::QueueRuleError;

const TABLE_V4: &str = "fragscapy";
const TABLE_V6: &str = "fragscapy6";
const CHAIN_IN: &str = "fragscapy_in";
const CHAIN_OUT: &str = "fragscapy_out";

/// One host filter: which families and chains to hit, the optional
/// host/port/proto match, and the queue number (egress uses `qnum`,
/// ingress uses `qnum + 1`).
#[derive(Debug, Clone)]
pub struct QueueRule {
    pub host: Option<String>,
    pub host6: Option<String>,
    pub port: Option<u16>,
    pub proto: Option<String>,
    pub output_chain: bool,
    pub input_chain: bool,
    pub ipv4: bool,
    pub ipv6: bool,
    pub qnum: u16,
}

impl QueueRule {
    pub fn validate(&self) -> Result<(), QueueRuleError> {
        if !self.output_chain && !self.input_chain {
            return Err(QueueRuleError::NoChain);
        }
        if !self.ipv4 && !self.ipv6 {
            return Err(QueueRuleError::NoFamily);
        }
        Ok(())
    }
}

fn family_table(family: NfFamily) -> &'static str {
    match family {
        NfFamily::IP => TABLE_V4,
        NfFamily::IP6 => TABLE_V6,
        _ => unreachable!("queue rules only ever use ip/ip6"),
    }
}

fn base_table(family: NfFamily) -> NfListObject {
    NfListObject::Table(Table {
        family,
        name: family_table(family).to_string(),
        handle: None,
    })
}

fn base_chain(family: NfFamily, name: &str, hook: NfHook) -> NfListObject {
    NfListObject::Chain(Chain {
        family,
        table: family_table(family).to_string(),
        name: name.to_string(),
        newname: None,
        handle: None,
        _type: Some(NfChainType::Filter),
        hook: Some(hook),
        prio: Some(0),
        dev: None,
        policy: Some(NfChainPolicy::Accept),
        ..Chain::default()
    })
}

fn host_field(family: NfFamily) -> &'static str {
    match family {
        NfFamily::IP => "ip",
        NfFamily::IP6 => "ip6",
        _ => unreachable!(),
    }
}

fn payload(protocol: &str, field: &str) -> Expression {
    Expression::Named(NamedExpression::Payload(Payload::PayloadField(PayloadField {
        protocol: protocol.to_string(),
        field: field.to_string(),
    })))
}

fn build_queue_rule(family: NfFamily, chain: &str, rule: &QueueRule, direction_qnum: u16) -> NfListObject {
    let mut expr = Vec::new();

    let host = match family {
        NfFamily::IP => rule.host.as_ref(),
        NfFamily::IP6 => rule.host6.as_ref(),
        _ => unreachable!(),
    };
    if let Some(host) = host {
        let field = if chain == CHAIN_OUT { "daddr" } else { "saddr" };
        expr.push(Statement::Match(Match {
            left: payload(host_field(family), field),
            right: Expression::String(host.clone()),
            op: Operator::EQ,
        }));
    }
    if let Some(proto) = &rule.proto {
        expr.push(Statement::Match(Match {
            left: Expression::Named(NamedExpression::Meta(Meta { key: MetaKey::L4proto })),
            right: Expression::String(proto.clone()),
            op: Operator::EQ,
        }));
        if let Some(port) = rule.port {
            let field = if chain == CHAIN_OUT { "dport" } else { "sport" };
            expr.push(Statement::Match(Match {
                left: payload(proto, field),
                right: Expression::Number(port as u32),
                op: Operator::EQ,
            }));
        }
    }
    expr.push(Statement::Queue(Queue {
        num: Expression::Number(direction_qnum as u32),
        flags: None,
    }));

    NfListObject::Rule(Rule {
        family,
        table: family_table(family).to_string(),
        chain: chain.to_string(),
        expr,
        handle: None,
        index: None,
        comment: Some("fragscapy queue rule".to_string()),
    })
}

/// For TCP filters, a companion rule dropping locally-originated RST to the
/// filtered host/port, so the kernel does not abort the connection before
/// user-space can inject a re-crafted packet.
fn build_rst_drop_rule(family: NfFamily, chain: &str, rule: &QueueRule) -> Option<NfListObject> {
    if rule.proto.as_deref() != Some("tcp") {
        return None;
    }
    let mut expr = vec![Statement::Match(Match {
        left: Expression::Named(NamedExpression::Meta(Meta { key: MetaKey::L4proto })),
        right: Expression::String("tcp".to_string()),
        op: Operator::EQ,
    })];
    expr.push(Statement::Match(Match {
        left: payload("tcp", "flags"),
        right: Expression::String("rst".to_string()),
        op: Operator::EQ,
    }));
    expr.push(Statement::Drop(None));
    Some(NfListObject::Rule(Rule {
        family,
        table: family_table(family).to_string(),
        chain: chain.to_string(),
        expr,
        handle: None,
        index: None,
        comment: Some("fragscapy rst guard".to_string()),
    }))
}

/// Installs every selected (chain × family) combination for `rule`.
/// Installation requires `CAP_NET_ADMIN`; nftables' own permission-denied
/// message is wrapped as [`QueueRuleError::Privilege`].
pub fn install(rule: &QueueRule) -> Result<(), QueueRuleError> {
    rule.validate()?;
    let mut batch = Batch::new();
    let families: Vec<NfFamily> = [(rule.ipv4, NfFamily::IP), (rule.ipv6, NfFamily::IP6)]
        .into_iter()
        .filter_map(|(on, f)| on.then_some(f))
        .collect();

    for family in &families {
        batch.add(base_table(*family));
        if rule.output_chain {
            batch.add(base_chain(*family, CHAIN_OUT, NfHook::Output));
            batch.add(build_queue_rule(*family, CHAIN_OUT, rule, rule.qnum));
            if let Some(guard) = build_rst_drop_rule(*family, CHAIN_OUT, rule) {
                batch.add(guard);
            }
        }
        if rule.input_chain {
            batch.add(base_chain(*family, CHAIN_IN, NfHook::Prerouting));
            batch.add(build_queue_rule(*family, CHAIN_IN, rule, rule.qnum + 1));
            if let Some(guard) = build_rst_drop_rule(*family, CHAIN_IN, rule) {
                batch.add(guard);
            }
        }
    }

    helper::apply_ruleset(&batch.to_nftables(), None, None).map_err(translate_error)
}

/// Removes every table this module may have installed. Deleting the owning
/// table removes its chains and rules atomically, so this is idempotent and
/// safe to call even if install only partially succeeded.
pub fn remove(rule: &QueueRule) -> Result<(), QueueRuleError> {
    let mut batch = Batch::new();
    if rule.ipv4 {
        batch.delete(base_table(NfFamily::IP));
    }
    if rule.ipv6 {
        batch.delete(base_table(NfFamily::IP6));
    }
    helper::apply_ruleset(&batch.to_nftables(), None, None).map_err(translate_error)
}

fn translate_error(err: helper::NftablesError) -> QueueRuleError {
    match &err {
        helper::NftablesError::NftFailed { stderr, .. } if stderr.to_lowercase().contains("permission denied") => {
            QueueRuleError::Privilege(stderr.clone())
        }
        other => QueueRuleError::Nftables(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_chain_selected_is_rejected() {
        let rule = QueueRule {
            host: None,
            host6: None,
            port: None,
            proto: None,
            output_chain: false,
            input_chain: false,
            ipv4: true,
            ipv6: false,
            qnum: 0,
        };
        assert!(rule.validate().is_err());
    }

    #[test]
    fn no_family_selected_is_rejected() {
        let rule = QueueRule {
            host: None,
            host6: None,
            port: None,
            proto: None,
            output_chain: true,
            input_chain: false,
            ipv4: false,
            ipv6: false,
            qnum: 0,
        };
        assert!(rule.validate().is_err());
    }

    #[test]
    fn valid_rule_passes_validation() {
        let rule = QueueRule {
            host: Some("10.0.0.1".to_string()),
            host6: None,
            port: Some(80),
            proto: Some("tcp".to_string()),
            output_chain: true,
            input_chain: true,
            ipv4: true,
            ipv6: false,
            qnum: 0,
        };
        assert!(rule.validate().is_ok());
    }
}
