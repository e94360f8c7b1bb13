//! Deserializes the JSON configuration document into a run plan: one
//! (ingress, egress) [`RecipeGenerator`] pair plus the nftables rule specs
//! and command to run, per file.
//!
//! Grounded in the `nftables` crate's own use of `serde_path_to_error` in
//! its `helper.rs` for precise error paths into a JSON document — applied
//! here to the configuration document instead of to an `nft` response.

use std::path::Path;

use serde::Deserialize;

use crate::domain::OptionDomain;
use crate::errors::ConfigError;
use crate::generator::{OperatorInstanceGenerator, RecipeGenerator};
use crate::queue_rule::QueueRule;

/// One operator entry inside `input`/`output`: a name, its argument
/// domains (each still a raw JSON scalar or option-domain string), and
/// whether a build failure should degrade to a no-op instead of aborting.
#[derive(Debug, Clone, Deserialize)]
pub struct OperatorSpec {
    pub mod_name: String,
    #[serde(default)]
    pub mod_opts: Vec<serde_json::Value>,
    #[serde(default)]
    pub optional: bool,
}

impl OperatorSpec {
    fn into_generator(self) -> Result<OperatorInstanceGenerator, ConfigError> {
        let mut domains = Vec::with_capacity(self.mod_opts.len());
        for opt in &self.mod_opts {
            domains.push(value_to_domain(opt)?);
        }
        Ok(OperatorInstanceGenerator::new(self.mod_name, domains, self.optional))
    }
}

fn value_to_domain(value: &serde_json::Value) -> Result<OptionDomain, ConfigError> {
    match value {
        serde_json::Value::String(s) => Ok(OptionDomain::parse(s)?),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(OptionDomain::Singleton(crate::domain::Scalar::Int(i)))
            } else {
                Ok(OptionDomain::Singleton(crate::domain::Scalar::Float(n.as_f64().unwrap_or_default())))
            }
        }
        serde_json::Value::Null => Ok(OptionDomain::Singleton(crate::domain::Scalar::None)),
        other => Err(ConfigError::InvalidDocument {
            path: "mod_opts".to_string(),
            message: format!("expected a string or number, got {}", other),
        }),
    }
}

/// One record of the `nfrules` array: a superset of [`QueueRule`]'s fields,
/// with every field but `qnum` optional so a document can say as little as
/// `{"host": "10.0.0.1"}`.
#[derive(Debug, Clone, Deserialize)]
pub struct NfRuleSpec {
    pub host: Option<String>,
    pub host6: Option<String>,
    pub port: Option<u16>,
    pub proto: Option<String>,
    #[serde(default = "default_true")]
    pub output_chain: bool,
    #[serde(default = "default_true")]
    pub input_chain: bool,
    #[serde(default = "default_true")]
    pub ipv4: bool,
    #[serde(default)]
    pub ipv6: bool,
    pub qnum: u16,
}

fn default_true() -> bool {
    true
}

impl From<NfRuleSpec> for QueueRule {
    fn from(spec: NfRuleSpec) -> QueueRule {
        QueueRule {
            host: spec.host,
            host6: spec.host6,
            port: spec.port,
            proto: spec.proto,
            output_chain: spec.output_chain,
            input_chain: spec.input_chain,
            ipv4: spec.ipv4,
            ipv6: spec.ipv6,
            qnum: spec.qnum,
        }
    }
}

/// The raw, field-for-field mirror of the JSON document, before its
/// operator specs are compiled into generators.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub cmd: String,
    #[serde(default)]
    pub nfrules: Vec<NfRuleSpec>,
    #[serde(default)]
    pub input: Vec<OperatorSpec>,
    #[serde(default)]
    pub output: Vec<OperatorSpec>,
}

/// A loaded, compiled configuration file: ready to drive one run-plan
/// entry.
pub struct Configuration {
    pub cmd: String,
    pub rules: Vec<QueueRule>,
    pub ingress: RecipeGenerator,
    pub egress: RecipeGenerator,
}

const KNOWN_TOP_LEVEL_KEYS: &[&str] = &["cmd", "nfrules", "input", "output"];

/// Loads and compiles one configuration file, reporting the exact JSON
/// pointer path on a malformed document via `serde_path_to_error`.
pub fn load(path: &Path) -> Result<Configuration, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
    warn_on_unknown_keys(&text, path);
    let de = &mut serde_json::Deserializer::from_str(&text);
    let file: ConfigFile = serde_path_to_error::deserialize(de)
        .map_err(|source| ConfigError::Json { path: path.to_path_buf(), source })?;
    compile(file)
}

/// Unknown top-level keys are not an error (serde silently drops them when
/// deserializing into [`ConfigFile`]), but they are almost always a typo,
/// so this warns about them before the real parse.
fn warn_on_unknown_keys(text: &str, path: &Path) {
    let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(text) else {
        return;
    };
    for key in map.keys() {
        if !KNOWN_TOP_LEVEL_KEYS.contains(&key.as_str()) {
            warn!("{}: unrecognized top-level key '{}'", path.display(), key);
        }
    }
}

fn compile(file: ConfigFile) -> Result<Configuration, ConfigError> {
    let rules = file.nfrules.into_iter().map(QueueRule::from).collect();

    let mut ingress_generators = Vec::with_capacity(file.input.len());
    for spec in file.input {
        ingress_generators.push(spec.into_generator()?);
    }
    let mut egress_generators = Vec::with_capacity(file.output.len());
    for spec in file.output {
        egress_generators.push(spec.into_generator()?);
    }

    Ok(Configuration {
        cmd: file.cmd,
        rules,
        ingress: RecipeGenerator::new(ingress_generators),
        egress: RecipeGenerator::new(egress_generators),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_document_parses() {
        let json = r#"{"cmd": "/bin/true", "nfrules": [{"host": "10.0.0.1", "qnum": 0}], "input": [{"mod_name": "echo", "mod_opts": ["hi"]}], "output": []}"#;
        let de = &mut serde_json::Deserializer::from_str(json);
        let file: ConfigFile = serde_path_to_error::deserialize(de).unwrap();
        let config = compile(file).unwrap();
        assert_eq!(config.cmd, "/bin/true");
        assert_eq!(config.rules.len(), 1);
        assert_eq!(config.ingress.len(), 1);
    }

    #[test]
    fn missing_mod_name_is_a_precise_path_error() {
        let json = r#"{"cmd": "/bin/true", "input": [{"mod_opts": ["hi"]}]}"#;
        let de = &mut serde_json::Deserializer::from_str(json);
        let result: Result<ConfigFile, _> = serde_path_to_error::deserialize(de);
        assert!(result.is_err());
    }

    #[test]
    fn unknown_top_level_key_is_ignored_by_default_serde_behavior() {
        let json = r#"{"cmd": "/bin/true", "bogus_key": 1}"#;
        let de = &mut serde_json::Deserializer::from_str(json);
        let file: Result<ConfigFile, _> = serde_path_to_error::deserialize(de);
        assert!(file.is_ok());
    }
}
