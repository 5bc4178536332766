// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Narrowband TOAs: a phase-only fit for every good channel.

use hifitime::Unit;
use log::warn;

use super::{SubintError, ToaOptions};
use crate::{
    constants::NUM_PHASE_TRIALS,
    context::Observation,
    fit::fit_phase_shift,
    math::RealFft,
    template::TemplateProvider,
    toa::{Toa, ToaFlags},
};

/// Make a TOA for each good channel of a subintegration. Channels whose fits
/// fail are skipped. Also returns the time spent fitting.
pub(super) fn fit_channels(
    archive: &str,
    obs: &Observation,
    isub: usize,
    template: &dyn TemplateProvider,
    options: &ToaOptions,
) -> Result<(Vec<Toa>, std::time::Duration), SubintError> {
    let sub = &obs.subints[isub];
    let period = sub.period;
    let model = template.portrait(obs.nbin, sub.freqs.view(), period, true)?;
    let model = match options.instrumental_response.as_ref() {
        Some(ir) if ir.dm != 0.0 || !ir.widths.is_empty() => ir.convolve(
            &RealFft::new(obs.nbin),
            model.view(),
            sub.freqs.view(),
            obs.bandwidth / obs.nchan as f64,
            period,
        ),
        _ => model,
    };
    let chan_bw = obs.bandwidth.abs() / obs.nchan as f64;

    let mut toas = Vec::with_capacity(sub.ok_chans.len());
    let mut fit_duration = std::time::Duration::ZERO;
    for &ichan in &sub.ok_chans {
        let model_profile = model.row(ichan);
        let shift = match fit_phase_shift(
            sub.portrait.row(ichan),
            model_profile,
            Some(sub.noise_stds[ichan]),
            (-0.5, 0.5),
            NUM_PHASE_TRIALS,
        ) {
            Ok(s) => s,
            Err(e) => {
                warn!("{archive} subint {isub} channel {ichan}: {e}; skipping it");
                continue;
            }
        };
        fit_duration += shift.duration;

        let flux = options.print_flux.then(|| {
            let mean = model_profile.mean().unwrap_or(0.0);
            (mean * shift.scale, mean.abs() * shift.scale_err)
        });
        let flags = ToaFlags {
            backend: obs.backend.clone(),
            frontend: obs.frontend.clone(),
            nbin: obs.nbin,
            bw: chan_bw,
            subint: isub,
            chan: Some(ichan),
            tobs: sub.duration,
            template: template.name().to_string(),
            snr: shift.snr,
            gof: shift.red_chi2,
            phase: options.print_phase.then_some(shift.phase),
            phase_err: options.print_phase.then_some(shift.phase_err),
            flux: flux.map(|f| f.0),
            flux_err: flux.map(|f| f.1),
            par_angle: options.print_parangle.then_some(sub.parallactic_angle),
            extra: options.extra_flags.clone(),
            ..Default::default()
        };
        toas.push(Toa {
            archive: archive.to_string(),
            frequency: sub.freqs[ichan],
            epoch: sub.epoch
                + hifitime::Duration::from_f64(
                    shift.phase * period + obs.backend_delay,
                    Unit::Second,
                ),
            error: shift.phase_err * period * 1e6,
            telescope: obs.telescope.clone(),
            telescope_code: obs.telescope_code.clone(),
            dm: None,
            dm_error: None,
            flags,
        });
    }
    Ok((toas, fit_duration))
}
