// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Command-line interface code.
//!
//! All booleans must have `#[serde(default)]` annotated, and anything that
//! isn't a boolean must be optional. This allows all arguments to be optional
//! *and* usable in an arguments file.
//!
//! Only 3 things should be public in this module: `Wbtoas`, `Wbtoas::run`,
//! and `WbtoasError`.

#[macro_use]
mod common;
mod error;
mod toas;

pub(crate) use common::Warn;
pub use error::WbtoasError;

use std::path::PathBuf;

use clap::{AppSettings, Args, CommandFactory, Parser};
use is_terminal::IsTerminal;
use log::{debug, info};

use crate::PROGRESS_BARS;

// Add build-time information from the "built" crate.
include!(concat!(env!("OUT_DIR"), "/built.rs"));

#[derive(Debug, Parser)]
#[clap(
    name = "wbtoas",
    version,
    author,
    about = r#"Wideband pulse times-of-arrival, DMs and scattering from pulsar portraits.
TOAs are written in tempo2 (ipta) or princeton formats."#
)]
#[clap(global_setting(AppSettings::DeriveDisplayOrder))]
#[clap(infer_long_args = true)]
pub struct Wbtoas {
    #[clap(flatten)]
    global_opts: GlobalArgs,

    #[clap(flatten)]
    args: toas::ToaArgs,
}

#[derive(Debug, Args)]
struct GlobalArgs {
    /// Don't draw progress bars.
    #[clap(long)]
    no_progress_bars: bool,

    /// The verbosity of the program. Increase by specifying multiple times
    /// (e.g. -vv). The default is to print only high-level information.
    #[clap(short, long, parse(from_occurrences))]
    verbosity: u8,

    /// Only verify that arguments were correctly ingested and print out
    /// high-level information.
    #[clap(long)]
    dry_run: bool,

    /// Save the input arguments into a new TOML file that can be used to
    /// reproduce this run.
    #[clap(long)]
    save_toml: Option<PathBuf>,
}

impl Wbtoas {
    pub fn run(self) -> Result<(), WbtoasError> {
        // Set up logging.
        let GlobalArgs {
            verbosity,
            dry_run,
            no_progress_bars,
            save_toml,
        } = self.global_opts;
        setup_logging(verbosity)
            .map_err(|e| WbtoasError::Generic(format!("Failed to initialise logging: {e}")))?;
        // Enable progress bars if the user didn't say "no progress bars" and
        // someone is there to see them.
        if !no_progress_bars && std::io::stderr().is_terminal() {
            PROGRESS_BARS.store(true);
        }

        info!("wbtoas {}", env!("CARGO_PKG_VERSION"));
        display_build_info();

        let args = self.args.merge()?;
        if let Some(toml) = save_toml {
            use std::{
                fs::File,
                io::{BufWriter, Write},
            };

            let mut f = BufWriter::new(File::create(toml)?);
            let toml_str = toml::to_string(&args)
                .map_err(|e| WbtoasError::Generic(format!("toml serialisation error: {e}")))?;
            f.write_all(toml_str.as_bytes())?;
        }
        args.run(dry_run).map_err(|e| match e {
            WbtoasError::Usage(msg) => {
                WbtoasError::Usage(format!("{msg}\n\n{}", Wbtoas::command().render_usage()))
            }
            e => e,
        })?;

        info!("wbtoas complete.");
        Ok(())
    }
}

/// Activate a logger. All log messages are put onto `stderr`, because TOAs may
/// be written to `stdout`. `env_logger` automatically only uses colours and
/// fancy symbols if we're on a tty (e.g. a terminal); piped output will be
/// formatted sensibly. Source code lines are displayed in log messages when
/// verbosity >= 3.
fn setup_logging(verbosity: u8) -> Result<(), log::SetLoggerError> {
    let mut builder = env_logger::Builder::from_default_env();
    builder.target(env_logger::Target::Stderr);
    builder.format_target(false);
    match verbosity {
        0 => builder.filter_level(log::LevelFilter::Info),
        1 => builder.filter_level(log::LevelFilter::Debug),
        2 => builder.filter_level(log::LevelFilter::Trace),
        _ => {
            builder.filter_level(log::LevelFilter::Trace);
            builder.format(|buf, record| {
                use std::io::Write;

                let timestamp = buf.timestamp();
                let level = record.level();
                let target = record.target();
                let line = record.line().unwrap_or(0);
                let message = record.args();

                writeln!(buf, "[{timestamp} {level} {target}:{line}] {message}")
            })
        }
    };
    builder.try_init()
}

/// Write debug-level log lines of how this executable was compiled.
fn display_build_info() {
    let dirty = match GIT_DIRTY {
        Some(true) => " (dirty)",
        _ => "",
    };
    match GIT_COMMIT_HASH_SHORT {
        Some(hash) => {
            debug!("Compiled on git commit hash: {hash}{dirty}");
        }
        None => debug!("Compiled on git commit hash: <no git info>"),
    }
    if let Some(hr) = GIT_HEAD_REF {
        debug!("            git head ref: {}", hr);
    }
    debug!("            {}", BUILT_TIME_UTC);
    debug!("         with compiler {}", RUSTC_VERSION);
    debug!("");
}
