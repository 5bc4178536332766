// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Some helper mathematics.

mod fourier;
#[cfg(test)]
mod tests;

pub(crate) use fourier::{shift_spectrum, RealFft};

use ndarray::prelude::*;

use crate::constants::DCONST;

/// Wrap a phase \[rot\] into the interval [-0.5, 0.5).
#[inline]
pub(crate) fn wrap_phase(phase: f64) -> f64 {
    phase - (phase + 0.5).floor()
}

/// The phase delay \[rot\] per unit DM between a frequency and a reference
/// frequency. Either frequency may be infinite.
#[inline]
pub(crate) fn dm_phase_coefficient(freq: f64, nu_ref: f64, period: f64) -> f64 {
    DCONST / period * (freq.powi(-2) - nu_ref.powi(-2))
}

/// The phase delay \[rot\] per unit GM between a frequency and a reference
/// frequency.
#[inline]
pub(crate) fn gm_phase_coefficient(freq: f64, nu_ref: f64, period: f64) -> f64 {
    DCONST * DCONST / period * (freq.powi(-4) - nu_ref.powi(-4))
}

/// Get the phase of each channel's pulse relative to the phase `phi` at
/// `nu_ref`, given a DM and GM.
pub(crate) fn channel_phases(
    phi: f64,
    dm: f64,
    gm: f64,
    freqs: ArrayView1<f64>,
    nu_ref: f64,
    period: f64,
) -> Array1<f64> {
    freqs.mapv(|f| {
        phi + dm * dm_phase_coefficient(f, nu_ref, period)
            + gm * gm_phase_coefficient(f, nu_ref, period)
    })
}

/// Transform a phase referenced to `nu_ref1` so that it is referenced to
/// `nu_ref2`, using the dispersive (and GM) delay law. If `wrap` is true, the
/// result is wrapped into [-0.5, 0.5).
pub(crate) fn phase_transform(
    phi: f64,
    dm: f64,
    gm: f64,
    nu_ref1: f64,
    nu_ref2: f64,
    period: f64,
    wrap: bool,
) -> f64 {
    let phi2 = phi
        + dm * dm_phase_coefficient(nu_ref2, nu_ref1, period)
        + gm * gm_phase_coefficient(nu_ref2, nu_ref1, period);
    if wrap {
        wrap_phase(phi2)
    } else {
        phi2
    }
}

/// Estimate the frequency \[MHz\] at which the covariance between a phase and
/// a nu^-2 delay term vanishes, given per-channel signal-to-noise ratios. Each
/// channel's information scales as its SNR squared. Non-finite SNRs are given
/// zero weight; if no weight remains, all channels are treated equally.
pub(crate) fn guess_fit_freq(freqs: ArrayView1<f64>, snrs: ArrayView1<f64>) -> f64 {
    let mut weights = snrs.mapv(|s| if s.is_finite() { s * s } else { 0.0 });
    if weights.sum() <= 0.0 {
        weights.fill(1.0);
    }
    let sum_w = weights.sum();
    let mean_inv_sq = freqs
        .iter()
        .zip(weights.iter())
        .map(|(f, w)| w * f.powi(-2))
        .sum::<f64>()
        / sum_w;
    mean_inv_sq.powf(-0.5)
}

/// The inverse-variance weighted mean of some values, and the uncertainty of
/// that mean.
pub(crate) fn weighted_mean(values: ArrayView1<f64>, errors: ArrayView1<f64>) -> (f64, f64) {
    let (sum_wx, sum_w) = values
        .iter()
        .zip(errors.iter())
        .fold((0.0, 0.0), |(sum_wx, sum_w), (x, e)| {
            let w = e.powi(-2);
            (sum_wx + w * x, sum_w + w)
        });
    (sum_wx / sum_w, sum_w.powf(-0.5))
}

/// The median of some values. NaNs are ignored; `None` is returned if nothing
/// remains.
pub(crate) fn median(values: &[f64]) -> Option<f64> {
    let mut v: Vec<f64> = values.iter().copied().filter(|x| !x.is_nan()).collect();
    if v.is_empty() {
        return None;
    }
    v.sort_unstable_by(|a, b| a.total_cmp(b));
    let n = v.len();
    Some(if n % 2 == 1 {
        v[n / 2]
    } else {
        0.5 * (v[n / 2 - 1] + v[n / 2])
    })
}

/// Rotate each channel of a portrait to earlier phases by `phase` plus the
/// channel's dispersive delay relative to `nu_ref`. This removes the delays
/// that a pulse with this phase and DM would have.
pub(crate) fn rotate_portrait(
    fft: &RealFft,
    portrait: ArrayView2<f64>,
    phase: f64,
    dm: f64,
    period: f64,
    freqs: ArrayView1<f64>,
    nu_ref: f64,
) -> Array2<f64> {
    let phases = channel_phases(phase, dm, 0.0, freqs, nu_ref, period);
    let mut spectra = fft.forward_rows(portrait);
    for (mut row, &phi) in spectra.outer_iter_mut().zip(phases.iter()) {
        shift_spectrum(row.view_mut(), -phi);
    }
    fft.inverse_rows(spectra.view())
}

/// Rotate a profile to earlier phases by `phase` \[rot\].
pub(crate) fn rotate_profile(fft: &RealFft, profile: ArrayView1<f64>, phase: f64) -> Array1<f64> {
    let mut spectrum = fft.forward(profile);
    shift_spectrum(spectrum.view_mut(), -phase);
    fft.inverse(spectrum.view())
}

/// Estimate the time-domain noise level of a profile from the power in the
/// highest quarter of its harmonics, where there should be little pulse
/// signal.
pub(crate) fn get_noise(fft: &RealFft, profile: ArrayView1<f64>) -> f64 {
    let spectrum = fft.forward(profile);
    let max_harm = fft.max_fit_harmonic();
    if max_harm == 0 {
        return f64::NAN;
    }
    let first = (max_harm - max_harm / 4).max(1);
    let power = spectrum
        .slice(s![first..=max_harm])
        .iter()
        .map(|c| c.norm_sqr())
        .sum::<f64>()
        / (max_harm - first + 1) as f64;
    (power / fft.nbin() as f64).sqrt()
}

/// Estimate the signal-to-noise ratio of a profile with the given noise
/// level from the excess harmonic power over that expected from noise alone.
pub(crate) fn get_snr(fft: &RealFft, profile: ArrayView1<f64>, noise: f64) -> f64 {
    if !noise.is_finite() || noise <= 0.0 {
        return f64::NAN;
    }
    let spectrum = fft.forward(profile);
    let noise_power = fft.nbin() as f64 * noise * noise;
    let snr_sq = spectrum
        .slice(s![1..=fft.max_fit_harmonic()])
        .iter()
        .map(|c| 2.0 * (c.norm_sqr() - noise_power) / noise_power)
        .sum::<f64>();
    snr_sq.max(0.0).sqrt()
}
