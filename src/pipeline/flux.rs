// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Flux-density estimates from fitted template amplitudes.

use ndarray::prelude::*;

use crate::{
    fit::FitResult,
    math::{weighted_mean, RealFft},
    scattering::{scatter_portrait, scattering_times},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) struct FluxEstimate {
    pub(super) flux: f64,
    pub(super) flux_err: f64,
    /// \[MHz\]
    pub(super) ref_freq: f64,
}

/// Estimate the mean flux density of a subintegration. The template is
/// scattered with the fitted timescale, and each channel's mean intensity is
/// scaled by the fitted amplitude. Channels are combined with inverse-variance
/// weights, which also give the reference frequency of the estimate.
pub(super) fn estimate_flux(
    fft: &RealFft,
    model: ArrayView2<f64>,
    freqs: ArrayView1<f64>,
    fit: &FitResult,
    log10_tau: bool,
) -> FluxEstimate {
    let tau = if log10_tau {
        10f64.powf(fit.tau)
    } else {
        fit.tau
    };
    let scattered = if tau != 0.0 {
        let taus = scattering_times(tau, fit.alpha, freqs, fit.nu_tau);
        scatter_portrait(fft, model, taus.view())
    } else {
        model.to_owned()
    };
    let model_means = scattered
        .mean_axis(Axis(1))
        .unwrap_or_else(|| Array1::zeros(model.nrows()));

    let fluxes = &model_means * &fit.scales;
    let flux_errs = model_means.mapv(f64::abs) * &fit.scale_errs;
    let (flux, flux_err) = weighted_mean(fluxes.view(), flux_errs.view());
    let (ref_freq, _) = weighted_mean(freqs, flux_errs.view());
    FluxEstimate {
        flux,
        flux_err,
        ref_freq,
    }
}
