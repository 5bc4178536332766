// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Real-valued FFTs of pulse profiles.

use std::sync::Arc;

use ndarray::prelude::*;
use rustfft::{Fft, FftPlanner};

use crate::{c64, constants::TAU};

/// Forward and inverse FFT plans for profiles with a fixed number of phase
/// bins. Only the non-negative harmonics (0 to nbin/2 inclusive) of a real
/// profile are kept.
pub(crate) struct RealFft {
    nbin: usize,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
}

impl RealFft {
    pub(crate) fn new(nbin: usize) -> RealFft {
        let mut planner = FftPlanner::new();
        RealFft {
            nbin,
            forward: planner.plan_fft_forward(nbin),
            inverse: planner.plan_fft_inverse(nbin),
        }
    }

    pub(crate) fn nbin(&self) -> usize {
        self.nbin
    }

    /// The number of harmonics in a spectrum (including DC).
    pub(crate) fn num_harmonics(&self) -> usize {
        self.nbin / 2 + 1
    }

    /// The highest harmonic with two real degrees of freedom. DC and (for an
    /// even number of bins) the Nyquist harmonic are not used in fits.
    pub(crate) fn max_fit_harmonic(&self) -> usize {
        self.nbin.saturating_sub(1) / 2
    }

    pub(crate) fn forward(&self, profile: ArrayView1<f64>) -> Array1<c64> {
        let mut buffer: Vec<c64> = profile.iter().map(|&x| c64::new(x, 0.0)).collect();
        self.forward.process(&mut buffer);
        buffer.truncate(self.num_harmonics());
        Array1::from(buffer)
    }

    pub(crate) fn inverse(&self, spectrum: ArrayView1<c64>) -> Array1<f64> {
        let n = self.nbin;
        let mut buffer: Vec<c64> = (0..n)
            .map(|k| {
                if k < spectrum.len() {
                    spectrum[k]
                } else {
                    spectrum[n - k].conj()
                }
            })
            .collect();
        self.inverse.process(&mut buffer);
        let norm = 1.0 / n as f64;
        buffer.into_iter().map(|c| c.re * norm).collect()
    }

    /// Forward-transform each row (channel) of a portrait.
    pub(crate) fn forward_rows(&self, portrait: ArrayView2<f64>) -> Array2<c64> {
        let mut out = Array2::zeros((portrait.len_of(Axis(0)), self.num_harmonics()));
        for (mut out_row, row) in out.outer_iter_mut().zip(portrait.outer_iter()) {
            out_row.assign(&self.forward(row));
        }
        out
    }

    /// Inverse-transform each row (channel) of a portrait's spectra.
    pub(crate) fn inverse_rows(&self, spectra: ArrayView2<c64>) -> Array2<f64> {
        let mut out = Array2::zeros((spectra.len_of(Axis(0)), self.nbin));
        for (mut out_row, row) in out.outer_iter_mut().zip(spectra.outer_iter()) {
            out_row.assign(&self.inverse(row));
        }
        out
    }
}

/// Delay a spectrum by `phase` \[rot\]; a negative phase advances it.
pub(crate) fn shift_spectrum(mut spectrum: ArrayViewMut1<c64>, phase: f64) {
    for (k, c) in spectrum.iter_mut().enumerate() {
        *c *= c64::from_polar(1.0, -TAU * k as f64 * phase);
    }
}
