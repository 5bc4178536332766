// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Phase-only fits of a profile against a template profile.

use std::time::{Duration, Instant};

use ndarray::prelude::*;

use super::FitError;
use crate::{
    c64,
    constants::TAU,
    math::{get_noise, RealFft},
};

/// The result of a phase-only fit.
#[derive(Debug, Clone)]
pub struct PhaseShift {
    /// The delay of the profile relative to the template \[rot\].
    pub phase: f64,
    pub phase_err: f64,
    /// The template amplitude.
    pub scale: f64,
    pub scale_err: f64,
    pub snr: f64,
    pub red_chi2: f64,
    pub duration: Duration,
}

/// The cross-correlation of a profile and template, and its first two
/// derivatives, at a trial phase.
fn cross_correlation(cross: &[c64], omegas: &[f64], phase: f64) -> (f64, f64, f64) {
    cross
        .iter()
        .zip(omegas)
        .fold((0.0, 0.0, 0.0), |(c, c_p, c_pp), (q, &w)| {
            let z = q * c64::from_polar(1.0, w * phase);
            (c + z.re, c_p - w * z.im, c_pp - w * w * z.re)
        })
}

/// Find the phase delay of `profile` relative to `template` by maximising
/// their Fourier-domain cross-correlation. The search covers `bounds` \[rot\]
/// with at least `num_trials` trial phases before refining the best one with
/// Newton's method.
///
/// If `noise` isn't given, it is estimated from `profile`.
pub fn fit_phase_shift(
    profile: ArrayView1<f64>,
    template: ArrayView1<f64>,
    noise: Option<f64>,
    bounds: (f64, f64),
    num_trials: usize,
) -> Result<PhaseShift, FitError> {
    let start = Instant::now();
    let nbin = profile.len();
    if template.len() != nbin {
        return Err(FitError::ShapeMismatch {
            data: (1, nbin),
            model: (1, template.len()),
        });
    }
    let fft = RealFft::new(nbin);
    let num_harm = fft.max_fit_harmonic();
    if num_harm == 0 {
        return Err(FitError::TooFewBins(nbin));
    }

    let data_ft = fft.forward(profile);
    let model_ft = fft.forward(template);
    let cross: Vec<c64> = (1..=num_harm)
        .map(|k| data_ft[k] * model_ft[k].conj())
        .collect();
    let omegas: Vec<f64> = (1..=num_harm).map(|k| TAU * k as f64).collect();
    let s: f64 = (1..=num_harm).map(|k| model_ft[k].norm_sqr()).sum();
    if s <= 0.0 {
        return Err(FitError::ZeroTemplate { chan: 0 });
    }
    let noise = noise.unwrap_or_else(|| get_noise(&fft, profile));
    if !noise.is_finite() || noise <= 0.0 {
        return Err(FitError::BadNoise { chan: 0, noise });
    }
    let var = nbin as f64 * noise * noise / 2.0;

    // Grid search.
    let (lo, hi) = bounds;
    let num_trials = num_trials.max(2 * num_harm);
    let spacing = (hi - lo) / num_trials as f64;
    let mut phase = (0..num_trials)
        .map(|i| lo + spacing * i as f64)
        .map(|p| (p, cross_correlation(&cross, &omegas, p).0))
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(p, _)| p)
        .unwrap_or(lo);

    // Newton refinement within a trial spacing of the best trial.
    let (search_lo, search_hi) = ((phase - spacing).max(lo), (phase + spacing).min(hi));
    for _ in 0..50 {
        let (_, c_p, c_pp) = cross_correlation(&cross, &omegas, phase);
        if c_pp >= 0.0 {
            break;
        }
        let new_phase = (phase - c_p / c_pp).clamp(search_lo, search_hi);
        let converged = (new_phase - phase).abs() < 1e-14;
        phase = new_phase;
        if converged {
            break;
        }
    }

    let (c, _, c_pp) = cross_correlation(&cross, &omegas, phase);
    let data_power: f64 = (1..=num_harm).map(|k| data_ft[k].norm_sqr()).sum();
    let chi2 = (data_power - c * c / s) / var;
    let phase_err = if c * c_pp < 0.0 {
        (s * var / (-c * c_pp)).sqrt()
    } else {
        f64::NAN
    };

    Ok(PhaseShift {
        phase,
        phase_err,
        scale: c / s,
        scale_err: (var / s).sqrt(),
        snr: c / (s * var).sqrt(),
        red_chi2: chi2 / (2 * num_harm).saturating_sub(2).max(1) as f64,
        duration: start.elapsed(),
    })
}
