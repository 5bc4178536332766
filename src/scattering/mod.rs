// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Pulse-broadening kernels.
//!
//! Thin-screen scattering convolves each channel's pulse with a one-sided
//! exponential, exp(-t/tau)/tau, whose timescale scales with frequency as a
//! power law. The kernels are applied in the Fourier domain, where the
//! exponential becomes 1 / (1 + 2 pi i k tau) for harmonic k and tau in
//! rotations.
//!
//! The instrument can also smear pulses, e.g. by dispersion within a finite
//! channel width or by the backend's impulse response. These are modelled as
//! zero-phase boxcar or Gaussian kernels.


use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::{
    c64,
    constants::{DCONST, PI, TAU},
    math::RealFft,
};

/// Scattering timescales at each of `freqs`, given a timescale `tau` at
/// `nu_ref` and scattering index `alpha`. The units of the result are those
/// of `tau`.
pub fn scattering_times(tau: f64, alpha: f64, freqs: ArrayView1<f64>, nu_ref: f64) -> Array1<f64> {
    freqs.mapv(|f| tau * (f / nu_ref).powf(alpha))
}

/// The Fourier-domain scattering kernel for each channel. `taus` are in
/// rotations; the output has shape (num. channels, num_harmonics).
pub fn scattering_kernel_ft(taus: ArrayView1<f64>, num_harmonics: usize) -> Array2<c64> {
    Array2::from_shape_fn((taus.len(), num_harmonics), |(i, k)| {
        c64::new(1.0, TAU * k as f64 * taus[i]).inv()
    })
}

/// Scatter-broaden each channel of a portrait. `taus` are in rotations.
pub(crate) fn scatter_portrait(
    fft: &RealFft,
    portrait: ArrayView2<f64>,
    taus: ArrayView1<f64>,
) -> Array2<f64> {
    if taus.iter().all(|&t| t == 0.0) {
        return portrait.to_owned();
    }
    let kernel = scattering_kernel_ft(taus, fft.num_harmonics());
    let spectra = fft.forward_rows(portrait) * kernel;
    fft.inverse_rows(spectra.view())
}

/// Scatter-broaden a profile. `tau` is in rotations.
pub(crate) fn scatter_profile(fft: &RealFft, profile: ArrayView1<f64>, tau: f64) -> Array1<f64> {
    if tau == 0.0 {
        return profile.to_owned();
    }
    let kernel = scattering_kernel_ft(aview1(&[tau]), fft.num_harmonics());
    let spectrum = fft.forward(profile) * kernel.row(0);
    fft.inverse(spectrum.view())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, EnumString, Serialize, Deserialize)]
pub enum ResponseKind {
    #[strum(serialize = "boxcar")]
    Boxcar,

    #[strum(serialize = "gaussian")]
    Gaussian,
}

impl ResponseKind {
    /// The Fourier transform of a zero-phase kernel of this kind with width
    /// `width` \[rot\] at harmonic `k`. Gaussian widths are FWHMs.
    fn ft(self, width: f64, k: usize) -> f64 {
        let x = PI * k as f64 * width;
        match self {
            ResponseKind::Boxcar => {
                if x == 0.0 {
                    1.0
                } else {
                    x.sin() / x
                }
            }
            ResponseKind::Gaussian => (-x * x / (4.0 * std::f64::consts::LN_2)).exp(),
        }
    }
}

/// An instrumental response to convolve templates with before fitting.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentalResponse {
    /// The DM used to compute intra-channel dispersive smearing
    /// \[pc cm^-3\]. No smearing is applied if this is zero.
    pub dm: f64,

    /// The widths of any additional response kernels \[rot\].
    pub widths: Vec<f64>,

    /// The kind of each additional kernel; the same length as `widths`.
    pub kinds: Vec<ResponseKind>,
}

impl InstrumentalResponse {
    /// The Fourier-domain response of each channel. `chan_bw` is the channel
    /// width \[MHz\] and `period` the spin period \[seconds\].
    pub fn kernel_ft(
        &self,
        num_harmonics: usize,
        freqs: ArrayView1<f64>,
        chan_bw: f64,
        period: f64,
    ) -> Array2<f64> {
        Array2::from_shape_fn((freqs.len(), num_harmonics), |(i, k)| {
            let smear = 2.0 * DCONST * self.dm * chan_bw.abs() / freqs[i].powi(3) / period;
            self.widths
                .iter()
                .zip(self.kinds.iter())
                .fold(ResponseKind::Boxcar.ft(smear, k), |acc, (&w, kind)| {
                    acc * kind.ft(w, k)
                })
        })
    }

    /// Convolve each channel of a portrait with the response.
    pub(crate) fn convolve(
        &self,
        fft: &RealFft,
        portrait: ArrayView2<f64>,
        freqs: ArrayView1<f64>,
        chan_bw: f64,
        period: f64,
    ) -> Array2<f64> {
        let kernel = self.kernel_ft(fft.num_harmonics(), freqs, chan_bw, period);
        let mut spectra = fft.forward_rows(portrait);
        spectra.zip_mut_with(&kernel, |c, &r| *c *= r);
        fft.inverse_rows(spectra.view())
    }
}
