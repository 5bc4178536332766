// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Initial parameter guesses for portrait fits.

use log::trace;
use ndarray::prelude::*;

use super::ScatteringTriple;
use crate::{
    constants::{ALPHA_BOUNDS, NUM_PHASE_TRIALS},
    fit::{fit_phase_shift, FitError, ParamBounds, ParamVector},
    math::{phase_transform, rotate_portrait, RealFft},
    scattering::scatter_profile,
    template::TemplateDefaults,
};

/// Where the initial scattering parameters of a fit come from. Exactly one
/// source is used, in order of preference: the template's own scattering, a
/// caller-supplied triple, then no scattering at all.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScatteringGuess {
    /// The template was made with scattering.
    Template(ScatteringTriple),

    /// The caller supplied a guess.
    User(ScatteringTriple),

    /// Start unscattered. The index comes from the template defaults.
    Unscattered { alpha: f64 },
}

impl ScatteringGuess {
    pub fn choose(defaults: &TemplateDefaults, user: Option<ScatteringTriple>) -> ScatteringGuess {
        match (defaults.scattering, user) {
            (Some(s), _) => ScatteringGuess::Template(ScatteringTriple {
                tau: s.tau,
                ref_freq: s.ref_freq,
                alpha: defaults.alpha,
            }),
            (None, Some(triple)) => ScatteringGuess::User(triple),
            (None, None) => ScatteringGuess::Unscattered {
                alpha: defaults.alpha,
            },
        }
    }

    /// The guessed scattering timescale \[rot\] at `nu_fit_tau` \[MHz\] and
    /// the guessed index.
    pub fn tau_alpha(&self, period: f64, nu_fit_tau: f64) -> (f64, f64) {
        match self {
            ScatteringGuess::Template(t) | ScatteringGuess::User(t) => (
                t.tau / period * (nu_fit_tau / t.ref_freq).powf(t.alpha),
                t.alpha,
            ),
            ScatteringGuess::Unscattered { alpha } => (0.0, *alpha),
        }
    }
}

/// The data needed to seed a subintegration's fit.
pub(super) struct GuessInputs<'a> {
    pub(super) fft: &'a RealFft,
    pub(super) portrait: ArrayView2<'a, f64>,
    pub(super) model: ArrayView2<'a, f64>,
    pub(super) freqs: ArrayView1<'a, f64>,
    pub(super) weights: ArrayView1<'a, f64>,
    pub(super) period: f64,
    /// The DM stored in the archive \[pc cm^-3\].
    pub(super) dm_stored: f64,
    pub(super) nu_fit_dm: f64,
    pub(super) nu_fit_tau: f64,
    /// Only given when scattering is being fit.
    pub(super) scattering: Option<ScatteringGuess>,
    pub(super) log10_tau: bool,
}

/// Guess (phi, DM, GM, tau, alpha). The data are dedispersed with the stored
/// DM about the mean channel frequency and averaged, then the phase is found
/// by cross-correlating against the band-averaged (and possibly scattered)
/// template. That phase is referenced to `nu_fit_dm` before being returned.
pub(super) fn initial_guess(inputs: &GuessInputs) -> Result<ParamVector, FitError> {
    let GuessInputs {
        fft,
        portrait,
        model,
        freqs,
        weights,
        period,
        dm_stored,
        nu_fit_dm,
        nu_fit_tau,
        scattering,
        log10_tau,
    } = *inputs;

    let nu_mean = freqs.mean().ok_or(FitError::NoChannels)?;
    let rotated = rotate_portrait(fft, portrait, 0.0, dm_stored, period, freqs, nu_mean);
    let weights = if weights.sum() > 0.0 {
        weights.to_owned()
    } else {
        Array1::ones(weights.len())
    };
    let profile = weights.dot(&rotated) / weights.sum();
    let model_profile = model.mean_axis(Axis(0)).ok_or(FitError::NoChannels)?;

    let (mut tau, alpha) = match scattering {
        Some(s) => s.tau_alpha(period, nu_fit_tau),
        None => (0.0, 0.0),
    };
    let model_profile = if tau != 0.0 {
        scatter_profile(fft, model_profile.view(), tau)
    } else {
        model_profile
    };
    // The phase is all we want here; the noise level doesn't affect it.
    let shift = fit_phase_shift(
        profile.view(),
        model_profile.view(),
        Some(1.0),
        (-0.5, 0.5),
        NUM_PHASE_TRIALS,
    )?;
    if scattering.is_some() && log10_tau {
        if tau == 0.0 {
            tau = 1.0 / fft.nbin() as f64;
        }
        tau = tau.log10();
    }

    let phi = phase_transform(shift.phase, dm_stored, 0.0, nu_mean, nu_fit_dm, period, true);
    trace!("Initial guess: phi {phi}, DM {dm_stored}, tau {tau}, alpha {alpha}");
    Ok([phi, dm_stored, 0.0, tau, alpha])
}

/// Bounds used with the bounded fitter when none are given: the scattering
/// timescale can't be negative (or, for log10 tau, smaller than a tenth of a
/// bin) and the index is kept within [`ALPHA_BOUNDS`].
pub(super) fn default_bounds(log10_tau: bool, nbin: usize) -> ParamBounds {
    let tau_lower = if log10_tau {
        (10.0 * nbin as f64).recip().log10()
    } else {
        0.0
    };
    ParamBounds([
        (None, None),
        (None, None),
        (None, None),
        (Some(tau_lower), None),
        (Some(ALPHA_BOUNDS.0), Some(ALPHA_BOUNDS.1)),
    ])
}
