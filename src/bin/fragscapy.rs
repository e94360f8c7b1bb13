// Copyright (c) 2016 Linus Färnstrand <faern@faern.net>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! CLI entry point: parses argv with `clap`, initializes logging, and
//! dispatches to the library's configuration loader and driver.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::{error, info};

use fragscapy::driver::{self, RunOptions};
use fragscapy::transform::registry;
use fragscapy::{config, FragscapyError};

#[derive(Parser)]
#[command(name = "fragscapy", about = "Packet-mangling test harness for protocol-conformance and robustness testing")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Raises the log level by one step per occurrence (warn -> info -> debug -> trace).
    #[arg(short = 'v', long = "verbose", global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Prints every registered operator name.
    List,
    /// Prints usage text for each named operator.
    Usage {
        #[arg(required = true)]
        mods: Vec<String>,
    },
    /// Validates one or more configuration files without running anything.
    Checkconfig {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Runs the full test suite described by one or more configuration files.
    Start {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        #[arg(long = "modif-file")]
        modif_file: Option<String>,

        #[arg(long = "stdout")]
        stdout: Option<String>,

        #[arg(long = "stderr")]
        stderr: Option<String>,

        #[arg(long = "local-pcap")]
        local_pcap: Option<String>,

        #[arg(long = "remote-pcap")]
        remote_pcap: Option<String>,

        #[arg(long)]
        append: bool,

        #[arg(long)]
        repeat: Option<usize>,

        #[arg(long = "no-progressbar")]
        no_progressbar: bool,

        #[arg(long = "no-results")]
        no_results: bool,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn run(cli: Cli) -> Result<(), FragscapyError> {
    match cli.command {
        Command::List => {
            for name in registry::NAMES {
                println!("{}", name);
            }
            Ok(())
        }
        Command::Usage { mods } => {
            for name in &mods {
                match registry::usage(name) {
                    Ok(text) => println!("{}", text),
                    Err(err) => println!("{}: {}", name, err),
                }
            }
            Ok(())
        }
        Command::Checkconfig { files } => {
            for path in &files {
                let loaded = config::load(path)?;
                info!(
                    "{}: cmd={:?} rules={} ingress_recipes={} egress_recipes={}",
                    path.display(),
                    loaded.cmd,
                    loaded.rules.len(),
                    loaded.ingress.len(),
                    loaded.egress.len()
                );
            }
            Ok(())
        }
        Command::Start {
            files,
            modif_file,
            stdout,
            stderr,
            local_pcap,
            remote_pcap,
            append,
            repeat,
            no_progressbar: _,
            no_results,
        } => {
            let opts = RunOptions {
                modif_file,
                stdout_pattern: stdout,
                stderr_pattern: stderr,
                local_pcap_pattern: local_pcap,
                remote_pcap_pattern: remote_pcap,
                append,
                repeat,
            };
            let summary = driver::run(&files, &opts)?;
            if !no_results {
                println!(
                    "passed: {}, failed: {}, not-run: {}",
                    summary.passed(),
                    summary.failed(),
                    summary.not_run()
                );
            }
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}
