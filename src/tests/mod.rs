// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Helpful functions for tests: synthetic templates, observations and an
//! in-memory archive reader.

use std::{collections::HashMap, path::{Path, PathBuf}};

use hifitime::{Duration, Epoch, Unit};
use ndarray::prelude::*;
use rand::prelude::*;
use rand_distr::Normal;

use crate::{
    context::{Observation, Subint},
    io::read::{ArchiveRead, ArchiveReadError, LoadOptions},
    math::{channel_phases, shift_spectrum, RealFft},
    scattering::scatter_portrait,
    template::{TemplateDefaults, TemplateError, TemplateProvider},
};

pub(crate) fn gaussian_profile(nbin: usize, loc: f64, fwhm: f64) -> Array1<f64> {
    Array1::from_shape_fn(nbin, |i| {
        let x = (i as f64 + 0.5) / nbin as f64 - loc;
        // Include the neighbouring rotations so the profile is periodic.
        [-1.0, 0.0, 1.0]
            .iter()
            .map(|o| (-4.0 * std::f64::consts::LN_2 * ((x + o) / fwhm).powi(2)).exp())
            .sum()
    })
}

/// A two-component template whose shape changes with frequency.
pub(crate) fn evolving_template(nbin: usize, freqs: ArrayView1<f64>) -> Array2<f64> {
    let mut port = Array2::zeros((freqs.len(), nbin));
    for (mut row, &f) in port.outer_iter_mut().zip(freqs.iter()) {
        let r = f / 1400.0;
        row.assign(&(gaussian_profile(nbin, 0.5, 0.03 * r.powf(-0.3))
            + gaussian_profile(nbin, 0.56, 0.04) * (0.4 * r.powf(-1.5))));
    }
    port
}

/// Delay each channel of a portrait by the given phases \[rot\].
pub(crate) fn delay_portrait(portrait: ArrayView2<f64>, phases: ArrayView1<f64>) -> Array2<f64> {
    let fft = RealFft::new(portrait.ncols());
    let mut spectra = fft.forward_rows(portrait);
    for (mut row, &phi) in spectra.outer_iter_mut().zip(phases.iter()) {
        shift_spectrum(row.view_mut(), phi);
    }
    fft.inverse_rows(spectra.view())
}

/// The parameters of a synthetic subintegration.
#[derive(Debug, Clone)]
pub(crate) struct SyntheticSubint {
    pub(crate) phi: f64,
    /// The DM delay relative to the archive's stored DM.
    pub(crate) delta_dm: f64,
    pub(crate) gm: f64,
    /// \[rot\] at 1400 MHz
    pub(crate) tau: f64,
    pub(crate) alpha: f64,
    pub(crate) amplitude: f64,
    /// The noise level; no noise is added if `add_noise` is false, but the
    /// level is still recorded.
    pub(crate) noise: f64,
    pub(crate) add_noise: bool,
    pub(crate) doppler_factor: f64,
}

impl Default for SyntheticSubint {
    fn default() -> Self {
        SyntheticSubint {
            phi: 0.1,
            delta_dm: 0.0,
            gm: 0.0,
            tau: 0.0,
            alpha: -4.0,
            amplitude: 1.0,
            noise: 0.01,
            add_noise: false,
            doppler_factor: 1.0,
        }
    }
}

pub(crate) const SYNTHETIC_DM: f64 = 30.0;
pub(crate) const SYNTHETIC_PERIOD: f64 = 0.005;

/// Make an observation whose channels are delayed relative to
/// [`evolving_template`] by the given parameters (referenced to infinite
/// frequency) plus the dispersive delay of [`SYNTHETIC_DM`].
pub(crate) fn synthetic_observation(
    nbin: usize,
    nchan: usize,
    subints: &[SyntheticSubint],
    seed: u64,
) -> Observation {
    let freqs = Array1::linspace(1200.0, 1600.0 - 400.0 / nchan as f64, nchan) + 200.0 / nchan as f64;
    let template = evolving_template(nbin, freqs.view());
    let fft = RealFft::new(nbin);
    let mut rng = StdRng::seed_from_u64(seed);
    let start = Epoch::from_mjd_utc(58000.0);

    let subints = subints
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let taus = freqs.mapv(|f| s.tau * (f / 1400.0).powf(s.alpha));
            let scattered = scatter_portrait(&fft, template.view(), taus.view());
            let phases = channel_phases(
                s.phi,
                SYNTHETIC_DM + s.delta_dm,
                s.gm,
                freqs.view(),
                f64::INFINITY,
                SYNTHETIC_PERIOD,
            );
            let mut portrait = delay_portrait(scattered.view(), phases.view()) * s.amplitude;
            if s.add_noise {
                let normal = Normal::new(0.0, s.noise).unwrap();
                portrait.mapv_inplace(|x| x + normal.sample(&mut rng));
            }
            let snrs = template.map_axis(Axis(1), |row| {
                let mean = row.mean().unwrap();
                s.amplitude * row.mapv(|x| (x - mean).powi(2)).sum().sqrt() / s.noise
            });
            Subint {
                epoch: start + Duration::from_f64(60.0 * i as f64, Unit::Second),
                period: SYNTHETIC_PERIOD,
                duration: 60.0,
                freqs: freqs.clone(),
                weights: Array1::ones(nchan),
                portrait,
                noise_stds: Array1::from_elem(nchan, s.noise),
                snrs,
                ok_chans: (0..nchan).collect(),
                doppler_factor: s.doppler_factor,
                parallactic_angle: 12.5,
            }
        })
        .collect();

    Observation {
        source: "J1234+5678".to_string(),
        telescope: "GBT".to_string(),
        telescope_code: "1".to_string(),
        backend: "GUPPI".to_string(),
        frontend: "Rcvr1_2".to_string(),
        nbin,
        nchan,
        bandwidth: 400.0,
        centre_freq: 1400.0,
        dm: SYNTHETIC_DM,
        dedispersed: false,
        backend_delay: 0.0,
        prof_snr: 1000.0,
        subints,
    }
}

/// An archive reader serving observations from memory.
#[derive(Default)]
pub(crate) struct InMemoryReader {
    pub(crate) archives: HashMap<PathBuf, Observation>,
}

impl InMemoryReader {
    pub(crate) fn insert<P: AsRef<Path>>(&mut self, path: P, obs: Observation) {
        self.archives.insert(path.as_ref().to_path_buf(), obs);
    }
}

impl ArchiveRead for InMemoryReader {
    fn load(&self, path: &Path, _options: &LoadOptions) -> Result<Observation, ArchiveReadError> {
        self.archives
            .get(path)
            .cloned()
            .ok_or_else(|| ArchiveReadError::Parse {
                file: path.display().to_string(),
                details: "not in memory".to_string(),
            })
    }
}

/// A template provider serving [`evolving_template`].
#[derive(Default)]
pub(crate) struct SyntheticTemplate {
    pub(crate) defaults: TemplateDefaults,
    /// If set, observations with any other number of bins are rejected.
    pub(crate) nbin: Option<usize>,
}

impl TemplateProvider for SyntheticTemplate {
    fn name(&self) -> &str {
        "synthetic.gmodel"
    }

    fn portrait(
        &self,
        nbin: usize,
        freqs: ArrayView1<f64>,
        _period: f64,
        _scattered: bool,
    ) -> Result<Array2<f64>, TemplateError> {
        Ok(evolving_template(nbin, freqs))
    }

    fn defaults(&self) -> TemplateDefaults {
        self.defaults
    }

    fn check_compatible(&self, obs: &Observation) -> Result<(), TemplateError> {
        match self.nbin {
            Some(nbin) if nbin != obs.nbin => Err(TemplateError::NbinMismatch {
                template: nbin,
                data: obs.nbin,
            }),
            _ => Ok(()),
        }
    }
}
