//! The top-level orchestrator: resolves a run plan from one or more
//! configuration files, installs/removes queue rules, starts/stops the
//! engine, and runs the user command once per test case.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::{self, Configuration};
use crate::engine::{Direction, Engine};
use crate::errors::DriverError;
use crate::queue_rule;

/// Flags that shape one `start` invocation, mirroring the CLI's `Start`
/// subcommand flags 1:1.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub modif_file: Option<String>,
    pub stdout_pattern: Option<String>,
    pub stderr_pattern: Option<String>,
    pub local_pcap_pattern: Option<String>,
    pub remote_pcap_pattern: Option<String>,
    pub append: bool,
    pub repeat: Option<usize>,
}

/// The outcome of one concrete test case `i_j`.
#[derive(Debug, Clone)]
pub enum CaseOutcome {
    Passed,
    Failed(i32),
    NotRun,
}

#[derive(Debug, Clone)]
pub struct CaseResult {
    pub id: String,
    pub outcome: CaseOutcome,
}

/// Pass/fail/not-run counts plus the case IDs, truncated for display the
/// way the CLI summary does.
#[derive(Debug, Clone, Default)]
pub struct Summary {
    pub cases: Vec<CaseResult>,
}

impl Summary {
    pub fn passed(&self) -> usize {
        self.cases.iter().filter(|c| matches!(c.outcome, CaseOutcome::Passed)).count()
    }

    pub fn failed(&self) -> usize {
        self.cases.iter().filter(|c| matches!(c.outcome, CaseOutcome::Failed(_))).count()
    }

    pub fn not_run(&self) -> usize {
        self.cases.iter().filter(|c| matches!(c.outcome, CaseOutcome::NotRun)).count()
    }
}

fn substitute(pattern: &str, conf: usize, i: usize, j: usize) -> String {
    pattern
        .replace("{conf}", &conf.to_string())
        .replace("{i}", &i.to_string())
        .replace("{j}", &j.to_string())
}

/// Deletes every file matching `pattern` once `{i}`/`{j}`/`{conf}` are
/// replaced with a glob wildcard, used to clear stale output before a run
/// unless `--append` was given.
fn erase_matching(pattern: &str) {
    let glob_pattern = pattern.replace("{conf}", "*").replace("{i}", "*").replace("{j}", "*");
    if let Ok(paths) = glob::glob(&glob_pattern) {
        for path in paths.flatten() {
            let _ = fs::remove_file(path);
        }
    }
}

fn open_sink(path: &Path, append: bool) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().create(true).write(true).append(append).truncate(!append).open(path)
}

/// Runs every configuration file's full (ingress × egress) case matrix.
/// On any fatal error, attempts rule removal and worker join before
/// returning.
pub fn run(config_paths: &[PathBuf], opts: &RunOptions) -> Result<Summary, DriverError> {
    if !opts.append {
        for pattern in [
            opts.modif_file.as_deref(),
            opts.stdout_pattern.as_deref(),
            opts.stderr_pattern.as_deref(),
            opts.local_pcap_pattern.as_deref(),
            opts.remote_pcap_pattern.as_deref(),
        ]
        .into_iter()
        .flatten()
        {
            erase_matching(pattern);
        }
    }

    let mut configs = Vec::with_capacity(config_paths.len());
    for path in config_paths {
        configs.push(config::load(path)?);
    }

    let mut installed_rules = Vec::new();
    for config in &configs {
        for rule in &config.rules {
            if let Err(err) = queue_rule::install(rule) {
                warn!("rule install failed, tearing down already-installed rules: {}", err);
                for installed in &installed_rules {
                    let _ = queue_rule::remove(installed);
                }
                return Err(DriverError::QueueRule(err));
            }
            installed_rules.push(rule.clone());
        }
    }

    let qnum = configs
        .iter()
        .flat_map(|c| c.rules.iter())
        .map(|r| r.qnum)
        .next()
        .unwrap_or(0);

    let engine = match Engine::start(qnum) {
        Ok(engine) => engine,
        Err(err) => {
            for rule in &installed_rules {
                let _ = queue_rule::remove(rule);
            }
            return Err(DriverError::Engine(err));
        }
    };

    let result = run_cases(&configs, opts, &engine);

    let stop_result = engine.stop();
    for rule in &installed_rules {
        let _ = queue_rule::remove(rule);
    }
    stop_result?;

    result
}

fn run_cases(configs: &[Configuration], opts: &RunOptions, engine: &Engine) -> Result<Summary, DriverError> {
    let mut summary = Summary::default();

    let mut modif_file = match &opts.modif_file {
        Some(pattern) if !pattern.contains('{') => Some(open_sink(Path::new(pattern), opts.append)?),
        _ => None,
    };

    for (conf_idx, config) in configs.iter().enumerate() {
        let total = config.ingress.len().max(config.egress.len());
        for i in 0..total {
            let ingress_recipe = config.ingress.get(i % config.ingress.len().max(1)).map_err(|e| {
                DriverError::Config(crate::errors::ConfigError::Transform(e))
            })?;
            let egress_recipe = config.egress.get(i % config.egress.len().max(1)).map_err(|e| {
                DriverError::Config(crate::errors::ConfigError::Transform(e))
            })?;

            let deterministic = crate::generator::recipe_is_deterministic(&ingress_recipe)
                && crate::generator::recipe_is_deterministic(&egress_recipe);
            let repeat = if deterministic { 1 } else { opts.repeat.unwrap_or(crate::DEFAULT_REPEAT) };

            let describe = |recipe: &crate::generator::Recipe| -> String {
                recipe.iter().map(|op| format!("{}({:?})", op.name(), op.describe())).collect::<Vec<_>>().join("\n")
            };
            let repeat_suffix = if repeat > 1 { format!("(repeated {} times)", repeat) } else { String::new() };
            let record = format!(
                "Modification n\u{b0}{}{}:\n> INPUT:  {}\n> OUTPUT: {}\n{}\n",
                i,
                repeat_suffix,
                describe(&ingress_recipe),
                describe(&egress_recipe),
                "=".repeat(50),
            );
            if let Some(pattern) = &opts.modif_file {
                if pattern.contains('{') {
                    let path = substitute(pattern, conf_idx, i, 0);
                    if let Ok(mut f) = open_sink(Path::new(&path), true) {
                        let _ = f.write_all(record.as_bytes());
                    }
                } else if let Some(f) = modif_file.as_mut() {
                    let _ = f.write_all(record.as_bytes());
                }
            }

            engine.install_recipe(Direction::Ingress, ingress_recipe);
            engine.install_recipe(Direction::Egress, egress_recipe);

            for j in 0..repeat {
                let case_id = format!("{}_{}", i, j);

                let local = opts.local_pcap_pattern.as_ref().map(|p| PathBuf::from(substitute(p, conf_idx, i, j)));
                let remote = opts.remote_pcap_pattern.as_ref().map(|p| PathBuf::from(substitute(p, conf_idx, i, j)));
                engine.set_capture_paths(local, remote);

                let mut command = Command::new("/bin/sh");
                command.arg("-c").arg(&config.cmd);

                if let Some(pattern) = &opts.stdout_pattern {
                    let path = substitute(pattern, conf_idx, i, j);
                    if let Ok(file) = open_sink(Path::new(&path), opts.append) {
                        command.stdout(file);
                    }
                }
                if let Some(pattern) = &opts.stderr_pattern {
                    let path = substitute(pattern, conf_idx, i, j);
                    if let Ok(file) = open_sink(Path::new(&path), opts.append) {
                        command.stderr(file);
                    }
                }

                let outcome = match command.status() {
                    Ok(status) => match status.code() {
                        Some(0) => CaseOutcome::Passed,
                        Some(code) => CaseOutcome::Failed(code),
                        None => CaseOutcome::NotRun,
                    },
                    Err(err) => {
                        error!("case {}: could not launch command: {}", case_id, err);
                        CaseOutcome::NotRun
                    }
                };

                if let Some(fatal) = engine.fatal_error() {
                    error!("engine reported a fatal error during case {}: {}", case_id, fatal);
                    summary.cases.push(CaseResult { id: case_id, outcome });
                    return Ok(summary);
                }

                summary.cases.push(CaseResult { id: case_id, outcome });
            }
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitute_replaces_all_three_placeholders() {
        assert_eq!(substitute("out_{conf}_{i}_{j}.log", 1, 2, 3), "out_1_2_3.log");
    }

    #[test]
    fn summary_counts_by_outcome() {
        let mut summary = Summary::default();
        summary.cases.push(CaseResult { id: "0_0".into(), outcome: CaseOutcome::Passed });
        summary.cases.push(CaseResult { id: "0_1".into(), outcome: CaseOutcome::Failed(1) });
        summary.cases.push(CaseResult { id: "0_2".into(), outcome: CaseOutcome::NotRun });
        assert_eq!(summary.passed(), 1);
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.not_run(), 1);
    }

    /// `drop(seq_int 0 1)` has a two-value domain but each resolved
    /// instance targets one fixed position, so every index's recipe must
    /// be deterministic (repeat == 1), not the whole-generator notion of
    /// determinism.
    #[test]
    fn a_deterministic_operator_over_a_multi_value_domain_needs_no_repeats() {
        use crate::domain::OptionDomain;
        use crate::generator::{recipe_is_deterministic, OperatorInstanceGenerator, RecipeGenerator};

        let gen = OperatorInstanceGenerator::new("drop", vec![OptionDomain::parse("seq_int 0 1").unwrap()], false);
        let recipes = RecipeGenerator::new(vec![gen]);
        assert_eq!(recipes.len(), 2);
        for i in 0..recipes.len() {
            let recipe = recipes.get(i).unwrap();
            assert!(recipe_is_deterministic(&recipe));
        }
    }
}
