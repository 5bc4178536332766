// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Wideband TOAs: one joint fit per subintegration.

use hifitime::{Duration, Unit};
use log::{debug, trace};
use ndarray::prelude::*;

use super::{
    flux::estimate_flux,
    full_covariance,
    guess::{default_bounds, initial_guess, GuessInputs, ScatteringGuess},
    to_barycentric, SubintError, SubintFit, ToaOptions,
};
use crate::{
    context::Observation,
    fit::{FitEngine, FitMethod, FitParam, FitRequest},
    math::{guess_fit_freq, RealFft},
    template::TemplateProvider,
    toa::{Toa, ToaFlags},
};

/// Fit a subintegration and make its TOA.
pub(super) fn fit_subint(
    archive: &str,
    obs: &Observation,
    isub: usize,
    template: &dyn TemplateProvider,
    engine: &dyn FitEngine,
    options: &ToaOptions,
) -> Result<(Toa, SubintFit), SubintError> {
    let sub = &obs.subints[isub];
    let period = sub.period;
    let fft = RealFft::new(obs.nbin);
    let log10_tau = options.log10_tau();

    let ok_chans = &sub.ok_chans;
    let freqs = sub.ok_freqs();
    let weights = sub.weights.select(Axis(0), ok_chans);
    let portrait = sub.ok_portrait();
    let snrs = sub.snrs.select(Axis(0), ok_chans);
    let noise_stds = sub.noise_stds.select(Axis(0), ok_chans);

    // When fitting scattering, the template's own scattering is left out.
    let model = template
        .portrait(obs.nbin, sub.freqs.view(), period, !options.fit_scat)?
        .select(Axis(0), ok_chans);
    let model = match options.instrumental_response.as_ref() {
        Some(ir) if ir.dm != 0.0 || !ir.widths.is_empty() => ir.convolve(
            &fft,
            model.view(),
            freqs.view(),
            obs.bandwidth / obs.nchan as f64,
            period,
        ),
        _ => model,
    };

    // Fit frequencies default to the zero-covariance frequency.
    let nu_zero = guess_fit_freq(freqs.view(), snrs.view());
    let nu_fit_dm = options.nu_fit_dm.unwrap_or(nu_zero);
    let nu_fit_tau = options.nu_fit_tau.unwrap_or(nu_zero);
    let doppler_factor = if options.bary {
        sub.doppler_factor
    } else {
        1.0
    };
    // The fit is topocentric, so a barycentric tau reference frequency is
    // converted before fitting.
    let nu_ref_tau = options.nu_ref_tau.map(|nu| nu / doppler_factor);

    let scattering = options
        .fit_scat
        .then(|| ScatteringGuess::choose(&template.defaults(), options.scat_guess));
    let guess = initial_guess(&GuessInputs {
        fft: &fft,
        portrait: portrait.view(),
        model: model.view(),
        freqs: freqs.view(),
        weights: weights.view(),
        period,
        dm_stored: obs.dm,
        nu_fit_dm,
        nu_fit_tau,
        scattering,
        log10_tau,
    })?;

    let bounds = match (options.bounds, options.method) {
        (Some(b), _) => Some(b),
        (None, FitMethod::Tnc) => Some(default_bounds(log10_tau, obs.nbin)),
        (None, _) => None,
    };

    let base_mask = options.base_mask();
    let mask = base_mask.for_num_channels(freqs.len());
    if mask != base_mask {
        debug!(
            "{archive} subint {isub} only has {} frequency channels; fitting for {}",
            freqs.len(),
            mask.free_indices().len()
        );
    }

    let request = FitRequest {
        data: portrait.view(),
        model: model.view(),
        guess,
        period,
        freqs: freqs.view(),
        fit_freqs: [nu_fit_dm, nu_fit_dm, nu_fit_tau],
        ref_freqs: [options.nu_ref_dm, options.nu_ref_dm, nu_ref_tau],
        noise_stds: noise_stds.view(),
        mask,
        bounds,
        log10_tau,
        method: options.method,
    };
    let result = engine.fit(&request)?;
    trace!(
        "{archive} subint {isub}: {} after {} evaluations (red. chi2 {:.3})",
        result.status,
        result.num_evals,
        result.red_chi2
    );
    let covariance = full_covariance(result.covariance.view(), &mask)?;

    let epoch =
        sub.epoch + Duration::from_f64(result.phi * period + obs.backend_delay, Unit::Second);
    let error = result.phi_err * period * 1e6;
    let (dm, gm) = to_barycentric(result.dm, result.gm, doppler_factor, &mask);

    let flux = options
        .print_flux
        .then(|| estimate_flux(&fft, model.view(), freqs.view(), &result, log10_tau));

    let fit_tau = mask.is_free(FitParam::Tau);
    let fmax = freqs.fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    let fmin = freqs.fold(f64::INFINITY, |a, &b| a.min(b));
    let flags = ToaFlags {
        gm: mask.is_free(FitParam::Gm).then_some(gm),
        gm_err: mask.is_free(FitParam::Gm).then_some(result.gm_err),
        scat_time: fit_tau.then(|| {
            let tau = if log10_tau {
                10f64.powf(result.tau)
            } else {
                result.tau
            };
            tau * period / doppler_factor * 1e6
        }),
        log10_scat_time: (fit_tau && log10_tau)
            .then(|| result.tau + (period / doppler_factor).log10()),
        log10_scat_time_err: (fit_tau && log10_tau).then_some(result.tau_err),
        scat_time_err: (fit_tau && !log10_tau)
            .then(|| result.tau_err * period / doppler_factor * 1e6),
        scat_ref_freq: fit_tau.then(|| result.nu_tau * doppler_factor),
        scat_ind: fit_tau.then_some(result.alpha),
        scat_ind_err: mask.is_free(FitParam::Alpha).then_some(result.alpha_err),
        backend: obs.backend.clone(),
        frontend: obs.frontend.clone(),
        nbin: obs.nbin,
        nch: Some(obs.nchan),
        nchx: Some(freqs.len()),
        bw: fmax - fmin,
        chbw: Some(obs.bandwidth.abs() / obs.nchan as f64),
        subint: isub,
        chan: None,
        tobs: sub.duration,
        fratio: Some(fmax / fmin),
        template: template.name().to_string(),
        snr: result.snr,
        phi_dm_cov: mask
            .is_free(FitParam::Dm)
            .then(|| covariance[(FitParam::Phase as usize, FitParam::Dm as usize)]),
        gof: result.red_chi2,
        phase: options.print_phase.then_some(result.phi),
        phase_err: options.print_phase.then_some(result.phi_err),
        flux: flux.map(|f| f.flux),
        flux_err: flux.map(|f| f.flux_err),
        flux_ref_freq: flux.map(|f| f.ref_freq),
        par_angle: options.print_parangle.then_some(sub.parallactic_angle),
        extra: options.extra_flags.clone(),
        dm_mean: false,
    };

    let toa = Toa {
        archive: archive.to_string(),
        frequency: result.nu_dm,
        epoch,
        error,
        telescope: obs.telescope.clone(),
        telescope_code: obs.telescope_code.clone(),
        dm: mask.is_free(FitParam::Dm).then_some(dm),
        dm_error: mask.is_free(FitParam::Dm).then_some(result.dm_err),
        flags,
    };
    let fit = SubintFit {
        subint: isub,
        ok_chans: ok_chans.clone(),
        mask,
        result,
        covariance,
        dm,
        gm,
    };
    Ok((toa, fit))
}
