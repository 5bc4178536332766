// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Arguments for making TOAs.

#[cfg(test)]
mod tests;

use std::{path::PathBuf, str::FromStr};

use clap::Parser;
use indexmap::IndexMap;
use itertools::Itertools;
use log::{debug, info, trace};
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use thiserror::Error;
use vec1::Vec1;

use super::common::{display_warnings, RunSummary, Warn, ARG_FILE_HELP};
use crate::{
    constants::{
        DEFAULT_SNR_CUT, DEFAULT_ZAP_RED_CHI2_THRESHOLD, DEFAULT_ZAP_SNR_THRESHOLD,
        MAX_NUM_ARCHIVES,
    },
    fit::{FitMethod, PortraitFitter},
    io::{
        read::{get_data_files, ArchiveReadError, JsonArchiveReader},
        write::{TimFormat, TimOptions, TIM_FORMATS},
    },
    pipeline::{ScatteringTriple, ToaOptions, ToaOutput, ToaParams, ZapCriteria},
    scattering::{InstrumentalResponse, ResponseKind},
    template::{load_template, TemplateError},
    WbtoasError,
};

lazy_static::lazy_static! {
    static ref FORMAT_HELP: String =
        format!("The format of written TOAs. Supported formats: {}. Default: {}", *TIM_FORMATS, TimFormat::Ipta);

    static ref METHOD_HELP: String =
        format!("The minimisation method. Only TNC honours bounds. Supported methods: {}. Default: {}", FitMethod::iter().join(", "), FitMethod::TrustNcg);

    static ref SNR_CUT_HELP: String =
        format!("Only write TOAs with an SNR flag of at least this. Default: {DEFAULT_SNR_CUT}");

    static ref ZAP_SNR_HELP: String =
        format!("The SNR that channels kept after zapping should reach together. Default: {DEFAULT_ZAP_SNR_THRESHOLD}");

    static ref ZAP_RCHI2_HELP: String =
        format!("Channels with a larger reduced chi-squared are proposed for zapping. Default: {DEFAULT_ZAP_RED_CHI2_THRESHOLD}");

    static ref RESPONSE_KIND_HELP: String =
        format!("The kinds of instrumental response kernels, one per width. Supported kinds: {}", ResponseKind::iter().join(", "));
}

#[derive(Parser, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(super) struct ToaArgs {
    #[clap(name = "ARGUMENTS_FILE", help = ARG_FILE_HELP.as_str(), parse(from_os_str))]
    pub(super) args_file: Option<PathBuf>,

    /// Archives to make TOAs for. Each path is either a .json archive or a
    /// text file listing archive paths, one per line.
    #[clap(short = 'd', long = "data", multiple_values(true), help_heading = "INPUT FILES")]
    pub(super) data: Option<Vec<PathBuf>>,

    /// The template: a .gmodel file or a .json archive.
    #[clap(short = 'm', long = "model", help_heading = "INPUT FILES")]
    pub(super) model: Option<PathBuf>,

    /// Average each archive's subintegrations together before fitting.
    #[clap(short = 'T', long, help_heading = "INPUT FILES")]
    #[serde(default)]
    pub(super) tscrunch: bool,

    /// Append TOAs to this file. If not given, TOAs are written to stdout.
    #[clap(short = 'o', long, help_heading = "OUTPUT FILES")]
    pub(super) outfile: Option<PathBuf>,

    #[clap(short = 'f', long, help = FORMAT_HELP.as_str(), help_heading = "OUTPUT FILES")]
    pub(super) format: Option<String>,

    /// Append wideband DM uncertainties to this file, one per line.
    #[clap(long, help_heading = "OUTPUT FILES")]
    pub(super) errfile: Option<PathBuf>,

    #[clap(long, help = SNR_CUT_HELP.as_str(), help_heading = "OUTPUT FILES")]
    pub(super) snr_cut: Option<f64>,

    /// Make one phase-only TOA per channel instead of wideband TOAs.
    #[clap(long, help_heading = "FITTING")]
    #[serde(default)]
    pub(super) narrowband: bool,

    /// Hold DM at its stored value.
    #[clap(long = "fix-DM", help_heading = "FITTING")]
    #[serde(default)]
    pub(super) fix_dm: bool,

    /// Also fit for a delay proportional to nu^-4 (GM).
    #[clap(long = "fit-dt4", alias = "fit-gm", help_heading = "FITTING")]
    #[serde(default)]
    pub(super) fit_gm: bool,

    /// Fit for a scattering timescale and index.
    #[clap(long, help_heading = "FITTING")]
    #[serde(default)]
    pub(super) fit_scat: bool,

    /// Fit the scattering timescale itself rather than its log10.
    #[clap(long, help_heading = "FITTING")]
    #[serde(default)]
    pub(super) no_logscat: bool,

    /// Hold the scattering index at its guessed value.
    #[clap(long, help_heading = "FITTING")]
    #[serde(default)]
    pub(super) fix_alpha: bool,

    /// A scattering guess: timescale [s], its reference frequency [MHz] and
    /// the scattering index, comma separated.
    #[clap(
        long,
        use_value_delimiter = true,
        require_value_delimiter = true,
        allow_hyphen_values = true,
        value_name = "TAU,FREQ,ALPHA",
        help_heading = "FITTING"
    )]
    pub(super) scat_guess: Option<Vec<f64>>,

    #[clap(long, help = METHOD_HELP.as_str(), help_heading = "FITTING")]
    pub(super) method: Option<String>,

    /// The DM that archive DM offsets are measured from [pc cm^-3]. Default:
    /// each archive's stored DM.
    #[clap(long = "DM", help_heading = "FITTING")]
    pub(super) dm: Option<f64>,

    /// The frequency [MHz] that TOAs, DMs and GMs are referenced to; "inf" is
    /// allowed. Default: each subintegration's zero-covariance frequency.
    #[clap(long, help_heading = "REFERENCE FREQUENCIES")]
    pub(super) nu_ref: Option<f64>,

    /// The frequency [MHz] that scattering timescales are referenced to.
    /// Default: each subintegration's zero-covariance frequency.
    #[clap(long, help_heading = "REFERENCE FREQUENCIES")]
    pub(super) nu_tau: Option<f64>,

    /// Fix the frequency [MHz] that phase and DM are fit at.
    #[clap(long, help_heading = "REFERENCE FREQUENCIES")]
    pub(super) nu_fit: Option<f64>,

    /// Fix the frequency [MHz] that scattering is fit at.
    #[clap(long, help_heading = "REFERENCE FREQUENCIES")]
    pub(super) nu_fit_tau: Option<f64>,

    /// Don't Doppler-correct DMs, GMs and scattering reference frequencies.
    #[clap(long, help_heading = "REFERENCE FREQUENCIES")]
    #[serde(default)]
    pub(super) no_bary: bool,

    /// Give every TOA of an archive that archive's mean DM.
    #[clap(long = "one-DM", help_heading = "TOA FLAGS")]
    #[serde(default)]
    pub(super) one_dm: bool,

    /// Add the fitted phase and its uncertainty as flags.
    #[clap(long, help_heading = "TOA FLAGS")]
    #[serde(default)]
    pub(super) print_phase: bool,

    /// Add flux estimates as flags.
    #[clap(long, help_heading = "TOA FLAGS")]
    #[serde(default)]
    pub(super) print_flux: bool,

    /// Add the parallactic angle as a flag.
    #[clap(long, help_heading = "TOA FLAGS")]
    #[serde(default)]
    pub(super) print_parangle: bool,

    /// Extra flags for every TOA as comma-separated key,value pairs, e.g.
    /// "pta,NANOGrav,grp,L-wide". These replace computed flags of the same
    /// name.
    #[clap(
        long,
        use_value_delimiter = true,
        require_value_delimiter = true,
        help_heading = "TOA FLAGS"
    )]
    pub(super) flags: Option<Vec<String>>,

    /// Append proposed channels to zap to this file, one line per
    /// subintegration.
    #[clap(long, help_heading = "ZAPPING")]
    pub(super) zap_output: Option<PathBuf>,

    #[clap(long, help = ZAP_SNR_HELP.as_str(), help_heading = "ZAPPING")]
    pub(super) zap_snr: Option<f64>,

    #[clap(long, help = ZAP_RCHI2_HELP.as_str(), help_heading = "ZAPPING")]
    pub(super) zap_rchi2: Option<f64>,

    /// Only apply the zapping SNR cut once.
    #[clap(long, help_heading = "ZAPPING")]
    #[serde(default)]
    pub(super) no_zap_iterate: bool,

    /// Convolve templates with intra-channel dispersive smearing at this DM
    /// [pc cm^-3].
    #[clap(long, help_heading = "INSTRUMENTAL RESPONSE")]
    pub(super) response_dm: Option<f64>,

    /// The widths [rot] of instrumental response kernels to convolve
    /// templates with.
    #[clap(
        long,
        use_value_delimiter = true,
        require_value_delimiter = true,
        help_heading = "INSTRUMENTAL RESPONSE"
    )]
    pub(super) response_widths: Option<Vec<f64>>,

    #[clap(
        long,
        use_value_delimiter = true,
        require_value_delimiter = true,
        help = RESPONSE_KIND_HELP.as_str(),
        help_heading = "INSTRUMENTAL RESPONSE"
    )]
    pub(super) response_kinds: Option<Vec<String>>,
}

impl ToaArgs {
    /// Both command-line and file arguments overlap in terms of what is
    /// available; this function consolidates everything that was specified into
    /// a single struct. Where applicable, it will prefer CLI parameters over
    /// those in the file.
    ///
    /// This function should only ever merge arguments, and not try to make
    /// sense of them.
    pub(super) fn merge(self) -> Result<ToaArgs, WbtoasError> {
        debug!("Merging command-line arguments with the argument file");

        let cli_args = self;

        if let Some(arg_file) = cli_args.args_file {
            // Read in the file arguments. Ensure all of the file args are
            // accounted for by pattern matching.
            let ToaArgs {
                args_file: _,
                data,
                model,
                tscrunch,
                outfile,
                format,
                errfile,
                snr_cut,
                narrowband,
                fix_dm,
                fit_gm,
                fit_scat,
                no_logscat,
                fix_alpha,
                scat_guess,
                method,
                dm,
                nu_ref,
                nu_tau,
                nu_fit,
                nu_fit_tau,
                no_bary,
                one_dm,
                print_phase,
                print_flux,
                print_parangle,
                flags,
                zap_output,
                zap_snr,
                zap_rchi2,
                no_zap_iterate,
                response_dm,
                response_widths,
                response_kinds,
            } = unpack_arg_file!(arg_file);

            // Merge all the arguments, preferring the CLI args when available.
            Ok(ToaArgs {
                args_file: None,
                data: cli_args.data.or(data),
                model: cli_args.model.or(model),
                tscrunch: cli_args.tscrunch || tscrunch,
                outfile: cli_args.outfile.or(outfile),
                format: cli_args.format.or(format),
                errfile: cli_args.errfile.or(errfile),
                snr_cut: cli_args.snr_cut.or(snr_cut),
                narrowband: cli_args.narrowband || narrowband,
                fix_dm: cli_args.fix_dm || fix_dm,
                fit_gm: cli_args.fit_gm || fit_gm,
                fit_scat: cli_args.fit_scat || fit_scat,
                no_logscat: cli_args.no_logscat || no_logscat,
                fix_alpha: cli_args.fix_alpha || fix_alpha,
                scat_guess: cli_args.scat_guess.or(scat_guess),
                method: cli_args.method.or(method),
                dm: cli_args.dm.or(dm),
                nu_ref: cli_args.nu_ref.or(nu_ref),
                nu_tau: cli_args.nu_tau.or(nu_tau),
                nu_fit: cli_args.nu_fit.or(nu_fit),
                nu_fit_tau: cli_args.nu_fit_tau.or(nu_fit_tau),
                no_bary: cli_args.no_bary || no_bary,
                one_dm: cli_args.one_dm || one_dm,
                print_phase: cli_args.print_phase || print_phase,
                print_flux: cli_args.print_flux || print_flux,
                print_parangle: cli_args.print_parangle || print_parangle,
                flags: cli_args.flags.or(flags),
                zap_output: cli_args.zap_output.or(zap_output),
                zap_snr: cli_args.zap_snr.or(zap_snr),
                zap_rchi2: cli_args.zap_rchi2.or(zap_rchi2),
                no_zap_iterate: cli_args.no_zap_iterate || no_zap_iterate,
                response_dm: cli_args.response_dm.or(response_dm),
                response_widths: cli_args.response_widths.or(response_widths),
                response_kinds: cli_args.response_kinds.or(response_kinds),
            })
        } else {
            Ok(cli_args)
        }
    }

    /// Turn the arguments into parameters. The template is read here, so
    /// problems with it are caught before any archive is touched.
    pub(super) fn parse(self) -> Result<ToaParams, ToaArgsError> {
        debug!("{:#?}", self);

        let Self {
            args_file: _,
            data,
            model,
            tscrunch,
            outfile,
            format,
            errfile,
            snr_cut,
            narrowband,
            fix_dm,
            fit_gm,
            fit_scat,
            no_logscat,
            fix_alpha,
            scat_guess,
            method,
            dm,
            nu_ref,
            nu_tau,
            nu_fit,
            nu_fit_tau,
            no_bary,
            one_dm,
            print_phase,
            print_flux,
            print_parangle,
            flags,
            zap_output,
            zap_snr,
            zap_rchi2,
            no_zap_iterate,
            response_dm,
            response_widths,
            response_kinds,
        } = self;

        let data = data.ok_or(ToaArgsError::NoData)?;
        let model = model.ok_or(ToaArgsError::NoModel)?;

        let mut data_files = vec![];
        for path in data {
            if !path.exists() {
                return Err(ArchiveReadError::BadFile(path).into());
            }
            data_files.extend(get_data_files(&path)?);
        }
        if data_files.len() > MAX_NUM_ARCHIVES {
            return Err(ToaArgsError::TooManyArchives {
                num: data_files.len(),
                max: MAX_NUM_ARCHIVES,
            });
        }
        let data_files = Vec1::try_from_vec(data_files).map_err(|_| ToaArgsError::NoData)?;

        let reader = JsonArchiveReader;
        if !model.exists() {
            return Err(TemplateError::BadFile(model).into());
        }
        let template = load_template(&model, &reader)?;

        let format = match format {
            Some(f) => TimFormat::from_str(&f).map_err(|_| ToaArgsError::BadFormat(f))?,
            None => TimFormat::Ipta,
        };
        let method = match method {
            Some(m) => FitMethod::from_str(&m).map_err(|_| ToaArgsError::BadMethod(m))?,
            None => FitMethod::TrustNcg,
        };

        let scat_guess = match scat_guess.as_deref() {
            None => None,
            Some(&[tau, ref_freq, alpha]) => Some(ScatteringTriple {
                tau,
                ref_freq,
                alpha,
            }),
            Some(other) => return Err(ToaArgsError::BadScatGuess(other.len())),
        };

        let extra_flags = match flags {
            None => IndexMap::new(),
            Some(flags) => {
                if flags.len() % 2 != 0 {
                    return Err(ToaArgsError::OddFlags(flags.len()));
                }
                flags
                    .into_iter()
                    .tuples()
                    .map(|(k, v)| (k.trim_start_matches('-').to_string(), v))
                    .collect()
            }
        };

        let instrumental_response = match (response_dm, response_widths, response_kinds) {
            (None, None, None) => None,
            (dm, widths, kinds) => {
                let widths = widths.unwrap_or_default();
                let kinds = kinds
                    .unwrap_or_default()
                    .into_iter()
                    .map(|k| {
                        ResponseKind::from_str(&k).map_err(|_| ToaArgsError::BadResponseKind(k))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                if widths.len() != kinds.len() {
                    return Err(ToaArgsError::ResponseLengths {
                        widths: widths.len(),
                        kinds: kinds.len(),
                    });
                }
                Some(InstrumentalResponse {
                    dm: dm.unwrap_or(0.0),
                    widths,
                    kinds,
                })
            }
        };

        if narrowband && fit_scat {
            "Narrowband TOAs are phase-only fits; ignoring --fit-scat".warn();
        }
        if narrowband && zap_output.is_some() {
            "Channels are only proposed for zapping after wideband fits; no zapping output will be written".warn();
        }
        if zap_output.is_none() && (zap_snr.is_some() || zap_rchi2.is_some() || no_zap_iterate) {
            "Zapping thresholds were given without --zap-output; they will be ignored".warn();
        }
        if scat_guess.is_some() && !fit_scat {
            "A scattering guess was given without --fit-scat; it will be ignored".warn();
        }
        if nu_ref == Some(f64::INFINITY) {
            "TOAs referenced to infinite frequency are written with a frequency of 0".warn();
        }

        let zap = zap_output.as_ref().map(|_| ZapCriteria {
            snr_threshold: zap_snr.unwrap_or(DEFAULT_ZAP_SNR_THRESHOLD),
            red_chi2_threshold: zap_rchi2.unwrap_or(DEFAULT_ZAP_RED_CHI2_THRESHOLD),
            iterate: !no_zap_iterate,
        });

        let options = ToaOptions {
            fit_dm: !fix_dm,
            fit_gm,
            fit_scat: fit_scat && !narrowband,
            log10_tau: !no_logscat,
            fix_alpha,
            scat_guess,
            nu_ref_dm: nu_ref,
            nu_ref_tau: nu_tau,
            nu_fit_dm: nu_fit,
            nu_fit_tau,
            bary: !no_bary,
            dm0: dm,
            print_phase,
            print_flux,
            print_parangle,
            extra_flags,
            method,
            bounds: None,
            instrumental_response,
            tscrunch,
            narrowband,
            zap,
        };

        let output = match outfile {
            Some(path) => ToaOutput::File(path),
            None => ToaOutput::Stdout,
        };
        let tim_options = TimOptions {
            format,
            snr_cut: snr_cut.unwrap_or(DEFAULT_SNR_CUT),
            header: false,
        };

        let mut summary = RunSummary::new("TOA set up");
        summary.line(format!("{} archive(s)", data_files.len()));
        summary.line(format!("Template: {}", template.name()));
        if narrowband {
            summary.line("Narrowband: phase only, one TOA per channel");
        } else {
            let mut free = vec!["phase"];
            if options.fit_dm {
                free.push("DM");
            }
            if options.fit_gm {
                free.push("GM");
            }
            if options.fit_scat {
                free.push(if options.log10_tau { "log10 tau" } else { "tau" });
                if !options.fix_alpha {
                    free.push("alpha");
                }
            }
            summary.line(format!("Wideband fit of {} ({method})", free.join(", ")));
        }
        summary.line(match &output {
            ToaOutput::Stdout => format!("Writing {format} TOAs to stdout"),
            ToaOutput::File(p) => format!("Appending {format} TOAs to {}", p.display()),
        });
        if let Some(zap) = &zap_output {
            summary.line(format!("Appending zapping proposals to {}", zap.display()));
        }
        summary.display();
        display_warnings();

        Ok(ToaParams {
            data_files,
            template,
            reader: Box::new(reader),
            engine: Box::new(PortraitFitter::default()),
            options,
            one_dm,
            output,
            tim_options,
            dm_errfile: errfile,
            zap_output,
        })
    }

    pub(super) fn run(self, dry_run: bool) -> Result<(), WbtoasError> {
        debug!("Converting arguments into parameters");
        trace!("{:#?}", self);
        let params = self.parse()?;

        if dry_run {
            info!("Dry run -- exiting now.");
            return Ok(());
        }

        params.run()?;
        Ok(())
    }
}

#[derive(Error, Debug)]
pub(super) enum ToaArgsError {
    #[error("No data files were specified (-d)")]
    NoData,

    #[error("No template was specified (-m)")]
    NoModel,

    #[error("{num} archives were given, but at most {max} can be processed in one run")]
    TooManyArchives { num: usize, max: usize },

    #[error("TOA format '{0}' is not supported; supported formats are: {}", *TIM_FORMATS)]
    BadFormat(String),

    #[error("Fit method '{0}' is not supported; supported methods are: {}", FitMethod::iter().join(", "))]
    BadMethod(String),

    #[error("A scattering guess needs exactly 3 values (tau, frequency, alpha), but {0} were given")]
    BadScatGuess(usize),

    #[error("Extra flags must come in key,value pairs, but {0} values were given")]
    OddFlags(usize),

    #[error("Instrumental response kind '{0}' is not supported; supported kinds are: {}", ResponseKind::iter().join(", "))]
    BadResponseKind(String),

    #[error("{widths} instrumental response widths were given, but {kinds} kinds")]
    ResponseLengths { widths: usize, kinds: usize },

    #[error(transparent)]
    ArchiveRead(#[from] ArchiveReadError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
