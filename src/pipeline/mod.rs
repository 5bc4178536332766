// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The TOA pipeline.
//!
//! Each archive is processed independently: it is loaded and checked, every
//! good subintegration is fit against the template (or, in narrowband mode,
//! every good channel), and the resulting TOAs and DM summary are returned
//! as an [`ArchiveOutcome`]. Outcomes are merged into a [`ToaAccumulator`].

mod aggregate;
mod error;
mod flux;
mod guess;
mod narrowband;
mod params;
mod wideband;
mod zap;

pub use aggregate::{aggregate_delta_dm, ArchiveSummary, DeltaDmSummary, ToaAccumulator};
pub use error::{ArchiveSkip, SubintError, ToaRunError};
pub use guess::ScatteringGuess;
pub use params::{ToaOutput, ToaParams};
pub use zap::{channels_to_zap, ZapCriteria, ZapProposal};

use std::{path::Path, time::Duration};

use indexmap::IndexMap;
use log::{debug, info, warn};
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    constants::MAX_NAN_SNR_CHANNELS,
    context::Observation,
    fit::{FitEngine, FitMask, FitMethod, FitParam, FitResult, ParamBounds, NUM_FIT_PARAMS},
    io::read::{ArchiveRead, LoadOptions},
    scattering::InstrumentalResponse,
    template::TemplateProvider,
    toa::Toa,
};

/// A scattering timescale, the frequency it's referenced to and a scattering
/// index.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScatteringTriple {
    /// \[seconds\]
    pub tau: f64,
    /// \[MHz\]
    pub ref_freq: f64,
    pub alpha: f64,
}

/// Options controlling how TOAs are made. These apply to every archive of a
/// run.
#[derive(Debug, Clone)]
pub struct ToaOptions {
    pub fit_dm: bool,
    pub fit_gm: bool,
    pub fit_scat: bool,
    /// Fit log10 of the scattering timescale. Ignored unless `fit_scat`.
    pub log10_tau: bool,
    /// Hold the scattering index at its guessed value.
    pub fix_alpha: bool,
    pub scat_guess: Option<ScatteringTriple>,

    /// The frequency \[MHz\] that TOAs, DMs and GMs are referenced to. May be
    /// infinite. If not given, the zero-covariance frequency is used.
    pub nu_ref_dm: Option<f64>,
    /// The frequency \[MHz\] that scattering timescales are referenced to.
    /// This is barycentric if `bary` is set.
    pub nu_ref_tau: Option<f64>,
    /// Fixed reference frequencies \[MHz\] for the fit itself. If not given,
    /// each subintegration's zero-covariance frequency is used.
    pub nu_fit_dm: Option<f64>,
    pub nu_fit_tau: Option<f64>,

    /// Doppler-correct DMs, GMs and scattering reference frequencies.
    pub bary: bool,
    /// The DM that archive-level DM offsets are measured from. If not given,
    /// each archive's stored DM is used.
    pub dm0: Option<f64>,

    pub print_phase: bool,
    pub print_flux: bool,
    pub print_parangle: bool,
    /// Flags added to every TOA; these win over computed flags.
    pub extra_flags: IndexMap<String, String>,

    pub method: FitMethod,
    /// Only used with [`FitMethod::Tnc`]. If not given, sensible bounds on the
    /// scattering parameters are used.
    pub bounds: Option<ParamBounds>,
    pub instrumental_response: Option<InstrumentalResponse>,

    /// Average each archive's subintegrations before fitting.
    pub tscrunch: bool,
    /// Make one phase-only TOA per channel instead of wideband TOAs.
    pub narrowband: bool,
    /// If given, propose channels to zap after wideband fits.
    pub zap: Option<ZapCriteria>,
}

impl Default for ToaOptions {
    fn default() -> Self {
        ToaOptions {
            fit_dm: true,
            fit_gm: false,
            fit_scat: false,
            log10_tau: true,
            fix_alpha: false,
            scat_guess: None,
            nu_ref_dm: None,
            nu_ref_tau: None,
            nu_fit_dm: None,
            nu_fit_tau: None,
            bary: true,
            dm0: None,
            print_phase: false,
            print_flux: false,
            print_parangle: false,
            extra_flags: IndexMap::new(),
            method: FitMethod::TrustNcg,
            bounds: None,
            instrumental_response: None,
            tscrunch: false,
            narrowband: false,
            zap: None,
        }
    }
}

impl ToaOptions {
    /// The requested free parameters, before any channel-count overrides.
    pub fn base_mask(&self) -> FitMask {
        FitMask::new(self.fit_dm, self.fit_gm, self.fit_scat, self.fix_alpha)
    }

    /// log10 tau is only meaningful when fitting scattering.
    pub fn log10_tau(&self) -> bool {
        self.fit_scat && self.log10_tau
    }
}

/// The fit of one subintegration.
#[derive(Debug, Clone)]
pub struct SubintFit {
    pub subint: usize,
    /// The channels that were fit.
    pub ok_chans: Vec<usize>,
    pub mask: FitMask,
    pub result: FitResult,
    /// The covariance matrix over all five parameters; rows and columns of
    /// fixed parameters are zero.
    pub covariance: Array2<f64>,
    /// The reported DM and GM, after any Doppler correction.
    pub dm: f64,
    pub gm: f64,
}

/// Everything produced for one archive.
#[derive(Debug, Clone)]
pub struct ArchiveOutcome {
    pub archive: String,
    /// \[pc cm^-3\]
    pub dm0: f64,
    pub toas: Vec<Toa>,
    /// Wideband fits, one per TOA.
    pub fits: Vec<SubintFit>,
    pub delta_dm: Option<DeltaDmSummary>,
    pub zap: Vec<ZapProposal>,
    pub fit_duration: Duration,
}

/// Convert topocentric DM and GM values to barycentric ones. Only fitted
/// parameters are converted.
pub fn to_barycentric(dm: f64, gm: f64, doppler_factor: f64, mask: &FitMask) -> (f64, f64) {
    let dm = if mask.is_free(FitParam::Dm) {
        dm * doppler_factor
    } else {
        dm
    };
    let gm = if mask.is_free(FitParam::Gm) {
        gm * doppler_factor.powi(3)
    } else {
        gm
    };
    (dm, gm)
}

/// The inverse of [`to_barycentric`].
pub fn to_topocentric(dm: f64, gm: f64, doppler_factor: f64, mask: &FitMask) -> (f64, f64) {
    to_barycentric(dm, gm, doppler_factor.recip(), mask)
}

/// Place the covariance matrix of the free parameters into a 5x5 matrix,
/// using the mask's free indices as the map.
pub(crate) fn full_covariance(
    covariance: ArrayView2<f64>,
    mask: &FitMask,
) -> Result<Array2<f64>, SubintError> {
    let free = mask.free_indices();
    if covariance.dim() != (free.len(), free.len()) {
        return Err(SubintError::CovarianceShape {
            expected: free.len(),
            got: covariance.nrows(),
        });
    }
    let mut full = Array2::zeros((NUM_FIT_PARAMS, NUM_FIT_PARAMS));
    for (ii, &i) in free.iter().enumerate() {
        for (jj, &j) in free.iter().enumerate() {
            full[(i, j)] = covariance[(ii, jj)];
        }
    }
    Ok(full)
}

/// Load an archive and check that it's worth fitting. Archives that have
/// been dedispersed are loaded again with the dedispersion undone. A few
/// channels with NaN SNRs are dropped; too many and the archive is skipped.
pub fn load_observation(
    path: &Path,
    reader: &dyn ArchiveRead,
    options: &ToaOptions,
) -> Result<Observation, ArchiveSkip> {
    let mut load_options = LoadOptions {
        tscrunch: options.tscrunch,
        remove_baseline: true,
        ..Default::default()
    };
    let mut obs = reader.load(path, &load_options)?;
    if obs.dedispersed {
        info!("{} is dedispersed; reloading it", path.display());
        load_options.dededisperse = true;
        obs = reader.load(path, &load_options)?;
    }
    check_observation(&mut obs, &path.display().to_string())?;
    Ok(obs)
}

fn check_observation(obs: &mut Observation, archive: &str) -> Result<(), ArchiveSkip> {
    if obs.prof_snr.is_nan() || obs.prof_snr == 0.0 {
        return Err(ArchiveSkip::ZeroSnr);
    }
    let num_nan = obs.num_nan_snr_channels();
    if num_nan > MAX_NAN_SNR_CHANNELS {
        return Err(ArchiveSkip::TooManyNanChannels { count: num_nan });
    }
    if num_nan > 0 {
        warn!("{archive} has {num_nan} frequency channels with a NaN SNR; not using them");
        obs.drop_nan_snr_channels();
    }
    if obs.ok_subints().is_empty() {
        return Err(ArchiveSkip::NoGoodSubints);
    }
    Ok(())
}

/// Make TOAs for an observation. Subintegrations (or channels) that can't be
/// fit are logged and skipped.
pub fn process_observation(
    archive: &str,
    mut obs: Observation,
    template: &dyn TemplateProvider,
    engine: &dyn FitEngine,
    options: &ToaOptions,
) -> Result<ArchiveOutcome, ArchiveSkip> {
    check_observation(&mut obs, archive)?;
    template.check_compatible(&obs)?;

    let dm0 = options.dm0.unwrap_or(obs.dm);
    let ok_subints = obs.ok_subints();
    info!(
        "{archive}: each of the {} TOAs is approximately {:.2} s",
        ok_subints.len(),
        obs.integration_length() / obs.subints.len() as f64
    );

    let mut toas = vec![];
    let mut fits = vec![];
    let mut fit_duration = Duration::ZERO;
    for isub in ok_subints {
        if options.narrowband {
            match narrowband::fit_channels(archive, &obs, isub, template, options) {
                Ok((sub_toas, duration)) => {
                    toas.extend(sub_toas);
                    fit_duration += duration;
                }
                Err(e) => warn!("{archive} subint {isub}: {e}; skipping it"),
            }
        } else {
            match wideband::fit_subint(archive, &obs, isub, template, engine, options) {
                Ok((toa, fit)) => {
                    fit_duration += fit.result.duration;
                    toas.push(toa);
                    fits.push(fit);
                }
                Err(e) => warn!("{archive} subint {isub}: {e}; skipping it"),
            }
        }
    }

    let (dms, dm_errs): (Vec<f64>, Vec<f64>) =
        fits.iter().map(|f| (f.dm, f.result.dm_err)).unzip();
    let delta_dm = aggregate_delta_dm(&dms, &dm_errs, dm0);
    if let Some(d) = delta_dm {
        debug!(
            "{archive}: mean DM offset {:.7} +/- {:.7} (inflation {:.3})",
            d.mean, d.err, d.inflation
        );
    }

    let zap = match options.zap {
        Some(criteria) => fits
            .iter()
            .map(|f| ZapProposal {
                subint: f.subint,
                channels: channels_to_zap(
                    &f.ok_chans,
                    f.result.channel_snrs.view(),
                    f.result.channel_red_chi2s.view(),
                    &criteria,
                ),
            })
            .filter(|p| !p.channels.is_empty())
            .collect(),
        None => vec![],
    };

    Ok(ArchiveOutcome {
        archive: archive.to_string(),
        dm0,
        toas,
        fits,
        delta_dm,
        zap,
        fit_duration,
    })
}

/// Load an archive and make its TOAs.
pub fn process_archive(
    path: &Path,
    reader: &dyn ArchiveRead,
    template: &dyn TemplateProvider,
    engine: &dyn FitEngine,
    options: &ToaOptions,
) -> Result<ArchiveOutcome, ArchiveSkip> {
    let obs = load_observation(path, reader, options)?;
    process_observation(&path.display().to_string(), obs, template, engine, options)
}
