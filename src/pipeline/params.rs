// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Parameters for a whole run, ready to be used directly.

use std::{
    io::{BufWriter, Write},
    path::PathBuf,
};

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{info, warn};
use vec1::Vec1;

use super::{process_archive, ToaAccumulator, ToaOptions, ToaRunError};
use crate::{
    constants::MAX_NUM_ARCHIVES,
    fit::FitEngine,
    io::{
        read::ArchiveRead,
        write::{open_for_append, write_toas, TimOptions},
    },
    math::median,
    template::TemplateProvider,
    PROGRESS_BARS,
};

/// Where TOAs go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToaOutput {
    Stdout,
    /// TOAs are appended to this file.
    File(PathBuf),
}

pub struct ToaParams {
    pub data_files: Vec1<PathBuf>,
    pub template: Box<dyn TemplateProvider>,
    pub reader: Box<dyn ArchiveRead>,
    pub engine: Box<dyn FitEngine>,
    pub options: ToaOptions,

    /// Replace each TOA's DM with its archive's mean DM.
    pub one_dm: bool,
    pub output: ToaOutput,
    /// The header field is decided when the output is opened.
    pub tim_options: TimOptions,
    /// DM uncertainties are appended here, if given.
    pub dm_errfile: Option<PathBuf>,
    /// Zapping proposals are appended here, if given.
    pub zap_output: Option<PathBuf>,
}

impl ToaParams {
    /// Make TOAs for all archives and write them out.
    pub fn run(&self) -> Result<ToaAccumulator, ToaRunError> {
        let accumulator = self.make_toas()?;
        if accumulator.is_empty() {
            warn!("No TOAs were made; nothing will be written");
            return Ok(accumulator);
        }
        self.write(&accumulator)?;
        Ok(accumulator)
    }

    /// Process each archive in turn. Archives that can't be used are logged
    /// and skipped.
    pub fn make_toas(&self) -> Result<ToaAccumulator, ToaRunError> {
        let num_archives = self.data_files.len();
        if num_archives > MAX_NUM_ARCHIVES {
            return Err(ToaRunError::TooManyArchives {
                num: num_archives,
                max: MAX_NUM_ARCHIVES,
            });
        }

        let progress = ProgressBar::with_draw_target(
            Some(num_archives as _),
            if PROGRESS_BARS.load() {
                ProgressDrawTarget::stderr()
            } else {
                ProgressDrawTarget::hidden()
            },
        )
        .with_style(
            ProgressStyle::default_bar()
                .template("{msg:17}: [{wide_bar:.blue}] {pos:3}/{len:3} archives ({elapsed_precise}<{eta_precise})")
                .unwrap()
                .progress_chars("=> "),
        )
        .with_position(0)
        .with_message("Measuring TOAs");
        progress.tick();

        let mut accumulator = ToaAccumulator::new();
        for path in &self.data_files {
            match process_archive(
                path,
                self.reader.as_ref(),
                self.template.as_ref(),
                self.engine.as_ref(),
                &self.options,
            ) {
                Ok(outcome) => {
                    let num_toas = outcome.toas.len();
                    let errors: Vec<f64> = outcome.toas.iter().map(|t| t.error).collect();
                    let duration = outcome.fit_duration;
                    accumulator.merge(outcome);
                    if num_toas > 0 {
                        info!(
                            "{}: ~{:.4} sec/TOA, median TOA error is {:.3} us",
                            path.display(),
                            duration.as_secs_f64() / num_toas as f64,
                            median(&errors).unwrap_or(f64::NAN)
                        );
                    }
                }
                Err(e) => warn!("{}: {e}. Skipping it.", path.display()),
            }
            progress.inc(1);
        }
        progress.abandon_with_message("Finished archives");

        let num_toas = accumulator.len();
        if num_toas > 0 {
            info!(
                "Made {num_toas} TOAs; total fit time {:.2} s, ~{:.4} sec/TOA",
                accumulator.fit_duration().as_secs_f64(),
                accumulator.fit_duration().as_secs_f64() / num_toas as f64
            );
        }
        Ok(accumulator)
    }

    /// Write the TOAs (and any DM errors and zapping proposals) out.
    pub fn write(&self, accumulator: &ToaAccumulator) -> Result<usize, ToaRunError> {
        let one_dm_toas;
        let toas = if self.one_dm {
            one_dm_toas = accumulator.one_dm_toas();
            one_dm_toas.as_slice()
        } else {
            accumulator.toas()
        };
        let dm0s = accumulator.dm0s();

        let mut errfile = match &self.dm_errfile {
            Some(path) => Some(open_for_append(path)?.0),
            None => None,
        };
        let errfile = errfile.as_mut().map(|f| f as &mut dyn Write);

        let num_written = match &self.output {
            ToaOutput::Stdout => {
                let stdout = std::io::stdout();
                let mut writer = BufWriter::new(stdout.lock());
                let options = TimOptions {
                    header: true,
                    ..self.tim_options
                };
                write_toas(toas, &dm0s, &mut writer, errfile, &options)?
            }
            ToaOutput::File(path) => {
                let (mut writer, empty) = open_for_append(path)?;
                let options = TimOptions {
                    header: empty,
                    ..self.tim_options
                };
                let n = write_toas(toas, &dm0s, &mut writer, errfile, &options)?;
                info!("Wrote {n} TOAs to {}", path.display());
                n
            }
        };

        if let Some(path) = &self.zap_output {
            let (mut writer, _) = open_for_append(path)?;
            for (archive, summary) in accumulator.archives() {
                for proposal in &summary.zap {
                    write!(writer, "{archive} {}", proposal.subint)?;
                    for chan in &proposal.channels {
                        write!(writer, " {chan}")?;
                    }
                    writeln!(writer)?;
                }
            }
            writer.flush()?;
        }
        Ok(num_written)
    }
}
