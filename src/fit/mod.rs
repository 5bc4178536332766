// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Fitting observed portraits against templates.
//!
//! A portrait is fit for up to five parameters: a phase (phi), a dispersion
//! measure (DM), a nu^-4 delay term (GM), a scattering timescale (tau) and a
//! scattering index (alpha). The [`FitEngine`] trait is the seam between the
//! TOA pipeline and the numerical work; [`PortraitFitter`] is the built-in
//! engine. [`fit_phase_shift`] fits a single profile for phase only.

mod error;
mod phase_shift;
mod portrait;

pub use error::FitError;
pub use phase_shift::{fit_phase_shift, PhaseShift};
pub use portrait::PortraitFitter;

use std::time::Duration;

use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

/// The number of parameters that can be fit.
pub const NUM_FIT_PARAMS: usize = 5;

/// Values for each of (phi, DM, GM, tau, alpha).
pub type ParamVector = [f64; NUM_FIT_PARAMS];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter)]
pub enum FitParam {
    #[strum(serialize = "phi")]
    Phase = 0,
    #[strum(serialize = "DM")]
    Dm = 1,
    #[strum(serialize = "GM")]
    Gm = 2,
    #[strum(serialize = "tau")]
    Tau = 3,
    #[strum(serialize = "alpha")]
    Alpha = 4,
}

/// Which of (phi, DM, GM, tau, alpha) are free in a fit. The phase is always
/// free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitMask {
    flags: [bool; NUM_FIT_PARAMS],
}

impl FitMask {
    pub fn new(fit_dm: bool, fit_gm: bool, fit_scat: bool, fix_alpha: bool) -> FitMask {
        FitMask {
            flags: [true, fit_dm, fit_gm, fit_scat, fit_scat && !fix_alpha],
        }
    }

    pub fn phase_only() -> FitMask {
        FitMask::new(false, false, false, false)
    }

    /// Restrict the mask for the number of good channels available. A single
    /// channel can only constrain phase. Two channels can't separate the
    /// nu^-2 and nu^-4 terms, so DM takes priority over GM.
    pub fn for_num_channels(self, num_chans: usize) -> FitMask {
        match num_chans {
            0 | 1 => FitMask::phase_only(),
            2 if self.is_free(FitParam::Dm) && self.is_free(FitParam::Gm) => {
                let mut flags = self.flags;
                flags[FitParam::Gm as usize] = false;
                FitMask { flags }
            }
            _ => self,
        }
    }

    pub fn is_free(&self, param: FitParam) -> bool {
        self.flags[param as usize]
    }

    /// The indices (into a [`ParamVector`]) of the free parameters, in
    /// ascending order. This is the map between a reduced covariance matrix
    /// and the full 5x5 one.
    pub fn free_indices(&self) -> Vec<usize> {
        self.flags
            .iter()
            .enumerate()
            .filter(|(_, &f)| f)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn num_free(&self) -> usize {
        self.flags.iter().filter(|&&f| f).count()
    }

    pub fn as_array(&self) -> [bool; NUM_FIT_PARAMS] {
        self.flags
    }
}

/// The minimisation strategy. Only [`FitMethod::Tnc`] honours bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, EnumString, Serialize, Deserialize)]
pub enum FitMethod {
    /// Bounded truncated Newton.
    #[strum(serialize = "TNC")]
    Tnc,

    /// Unbounded Newton with a backtracking line search.
    #[strum(serialize = "Newton-CG")]
    NewtonCg,

    /// Unbounded Newton with an adaptive trust region.
    #[strum(serialize = "trust-ncg")]
    TrustNcg,
}

/// Lower and upper bounds on each parameter. `None` is unbounded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamBounds(pub [(Option<f64>, Option<f64>); NUM_FIT_PARAMS]);

impl ParamBounds {
    pub fn unbounded() -> ParamBounds {
        ParamBounds([(None, None); NUM_FIT_PARAMS])
    }

    /// Clamp the values of `params` into these bounds.
    pub(crate) fn clamp(&self, params: &mut ParamVector) {
        for (p, (lo, hi)) in params.iter_mut().zip(self.0.iter()) {
            if let Some(lo) = lo {
                *p = p.max(*lo);
            }
            if let Some(hi) = hi {
                *p = p.min(*hi);
            }
        }
    }
}

/// Everything needed to fit a portrait.
#[derive(Debug, Clone)]
pub struct FitRequest<'a> {
    /// The observed portrait of good channels; shape (nchan, nbin).
    pub data: ArrayView2<'a, f64>,

    /// The template portrait for the same channels.
    pub model: ArrayView2<'a, f64>,

    /// Initial values, which are also the values of fixed parameters. tau is
    /// in rotations, or log10 rotations if `log10_tau` is set.
    pub guess: ParamVector,

    /// \[seconds\]
    pub period: f64,

    /// The channel frequencies \[MHz\].
    pub freqs: ArrayView1<'a, f64>,

    /// The frequencies \[MHz\] that DM, GM and tau are referenced to during
    /// the fit.
    pub fit_freqs: [f64; 3],

    /// The frequencies \[MHz\] that DM, GM and tau should be reported at.
    /// Where `None`, the engine picks the frequency that decorrelates the
    /// parameter from phase (or alpha).
    pub ref_freqs: [Option<f64>; 3],

    /// The time-domain noise level of each channel.
    pub noise_stds: ArrayView1<'a, f64>,

    pub mask: FitMask,

    /// Only used by [`FitMethod::Tnc`].
    pub bounds: Option<ParamBounds>,

    pub log10_tau: bool,

    pub method: FitMethod,
}

/// How a fit finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum FitStatus {
    /// The expected improvement from another Newton step fell below the
    /// tolerance.
    Converged,

    /// No step that reduced chi-squared could be found.
    Stalled,

    /// The iteration limit was reached.
    MaxIterations,

    /// The Hessian at the solution couldn't be inverted, so uncertainties are
    /// not available.
    SingularHessian,
}

impl FitStatus {
    /// The solver return code written alongside results.
    pub fn return_code(self) -> i32 {
        match self {
            FitStatus::Converged => 1,
            FitStatus::Stalled => 2,
            FitStatus::MaxIterations => 3,
            FitStatus::SingularHessian => -1,
        }
    }
}

/// The results of a portrait fit. Fixed parameters carry their guessed values
/// and zero uncertainty.
#[derive(Debug, Clone)]
pub struct FitResult {
    /// \[rot\], referenced to `nu_dm`.
    pub phi: f64,
    pub phi_err: f64,
    /// \[pc cm^-3\]
    pub dm: f64,
    pub dm_err: f64,
    pub gm: f64,
    pub gm_err: f64,
    /// \[rot\] (or log10 \[rot\]), referenced to `nu_tau`.
    pub tau: f64,
    pub tau_err: f64,
    pub alpha: f64,
    pub alpha_err: f64,

    /// The covariance of the free parameters, in the order of
    /// [`FitMask::free_indices`].
    pub covariance: Array2<f64>,

    /// The overall signal-to-noise ratio.
    pub snr: f64,
    pub channel_snrs: Array1<f64>,

    /// The reduced chi-squared of each channel against its own noise level.
    pub channel_red_chi2s: Array1<f64>,

    /// The template amplitude in each channel.
    pub scales: Array1<f64>,
    pub scale_errs: Array1<f64>,

    pub red_chi2: f64,
    pub status: FitStatus,
    pub num_evals: usize,
    pub duration: Duration,

    /// The reference frequencies \[MHz\] of the reported DM, GM and tau.
    pub nu_dm: f64,
    pub nu_gm: f64,
    pub nu_tau: f64,
}

impl FitResult {
    pub fn params(&self) -> ParamVector {
        [self.phi, self.dm, self.gm, self.tau, self.alpha]
    }

    pub fn param_errs(&self) -> ParamVector {
        [
            self.phi_err,
            self.dm_err,
            self.gm_err,
            self.tau_err,
            self.alpha_err,
        ]
    }
}

/// Something that can fit portraits. Implementations must be deterministic
/// for identical requests.
pub trait FitEngine {
    fn fit(&self, request: &FitRequest) -> Result<FitResult, FitError>;
}
