// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The built-in portrait fitter.
//!
//! In the Fourier domain, channel n of the data is modelled as
//! a_n M_nk B_nk exp(-2 pi i k phi_n), where M is the template, B the
//! scattering kernel, a_n a free amplitude and phi_n the channel's phase delay
//! (phi plus the DM and GM terms). Minimising chi-squared over each a_n
//! analytically leaves
//!
//!   chi2 = sum_n (sum_k |D_nk|^2 - C_n^2 / S_n) / sigma_n^2
//!
//! with C_n = Re sum_k D_nk conj(M_nk B_nk) exp(2 pi i k phi_n) and
//! S_n = sum_k |M_nk B_nk|^2. Derivatives of C_n and S_n with respect to phi_n
//! and tau_n are analytic, so the gradient and Hessian in the five fit
//! parameters follow from the chain rule. DC and Nyquist harmonics are not
//! used.

use std::time::Instant;

use log::trace;
use nalgebra::{DMatrix, DVector};
use ndarray::prelude::*;

use super::*;
use crate::{
    c64,
    constants::{DCONST, LN_10, TAU},
    math::{dm_phase_coefficient, gm_phase_coefficient, wrap_phase, RealFft},
};

/// The largest number of trial steps per iteration before giving up on
/// reducing chi-squared.
const MAX_STEP_ATTEMPTS: usize = 40;

/// Fits portraits with damped Newton iterations using analytic derivatives.
#[derive(Debug, Clone)]
pub struct PortraitFitter {
    /// The maximum number of Newton iterations.
    pub max_iterations: usize,

    /// Iteration stops when the expected chi-squared improvement of a full
    /// Newton step falls below this.
    pub tolerance: f64,
}

impl Default for PortraitFitter {
    fn default() -> Self {
        PortraitFitter {
            max_iterations: 200,
            tolerance: 1e-10,
        }
    }
}

/// The per-channel quantities at some parameter values.
#[derive(Debug, Clone, Copy)]
struct ChannelSums {
    c: f64,
    s: f64,
    chi2: f64,
}

struct Evaluation {
    chi2: f64,
    grad: [f64; NUM_FIT_PARAMS],
    hess: [[f64; NUM_FIT_PARAMS]; NUM_FIT_PARAMS],
    channels: Vec<ChannelSums>,
}

/// The fixed parts of a fit.
struct Problem {
    /// D_nk conj(M_nk) for harmonics 1..=K.
    cross: Array2<c64>,
    /// |M_nk|^2 for harmonics 1..=K.
    model_power: Array2<f64>,
    /// sum_k |D_nk|^2
    data_power: Array1<f64>,
    /// The Fourier-domain noise variance of each channel.
    variances: Array1<f64>,
    dm_coeffs: Array1<f64>,
    gm_coeffs: Array1<f64>,
    /// ln(nu_n / nu_tau)
    ln_tau_ratios: Array1<f64>,
    omegas: Array1<f64>,
    log10_tau: bool,
    scattering: bool,
}

impl Problem {
    fn new(request: &FitRequest) -> Result<Problem, FitError> {
        let (nchan, nbin) = request.data.dim();
        if request.model.dim() != (nchan, nbin) {
            return Err(FitError::ShapeMismatch {
                data: request.data.dim(),
                model: request.model.dim(),
            });
        }
        if nchan == 0 {
            return Err(FitError::NoChannels);
        }
        for (what, got) in [
            ("frequencies", request.freqs.len()),
            ("noise levels", request.noise_stds.len()),
        ] {
            if got != nchan {
                return Err(FitError::ChannelCountMismatch {
                    what,
                    expected: nchan,
                    got,
                });
            }
        }

        let fft = RealFft::new(nbin);
        let num_harm = fft.max_fit_harmonic();
        if num_harm == 0 {
            return Err(FitError::TooFewBins(nbin));
        }
        let data_ft = fft.forward_rows(request.data);
        let model_ft = fft.forward_rows(request.model);
        let data_ft = data_ft.slice(s![.., 1..=num_harm]);
        let model_ft = model_ft.slice(s![.., 1..=num_harm]);

        let cross = Array2::from_shape_fn((nchan, num_harm), |(n, j)| {
            data_ft[(n, j)] * model_ft[(n, j)].conj()
        });
        let model_power = model_ft.mapv(|c| c.norm_sqr());
        let data_power = data_ft.map_axis(Axis(1), |row| row.iter().map(|c| c.norm_sqr()).sum::<f64>());
        for (chan, power) in model_power.outer_iter().enumerate() {
            if power.sum() <= 0.0 {
                return Err(FitError::ZeroTemplate { chan });
            }
        }

        let mut variances = Array1::zeros(nchan);
        for (chan, (var, &noise)) in variances
            .iter_mut()
            .zip(request.noise_stds.iter())
            .enumerate()
        {
            if !noise.is_finite() || noise <= 0.0 {
                return Err(FitError::BadNoise { chan, noise });
            }
            *var = nbin as f64 * noise * noise / 2.0;
        }

        let [nu_dm, nu_gm, nu_tau] = request.fit_freqs;
        let period = request.period;
        let guess_tau = request.guess[FitParam::Tau as usize];
        let mask = request.mask;
        Ok(Problem {
            cross,
            model_power,
            data_power,
            variances,
            dm_coeffs: request.freqs.mapv(|f| dm_phase_coefficient(f, nu_dm, period)),
            gm_coeffs: request.freqs.mapv(|f| gm_phase_coefficient(f, nu_gm, period)),
            ln_tau_ratios: request.freqs.mapv(|f| (f / nu_tau).ln()),
            omegas: Array1::from_shape_fn(num_harm, |j| TAU * (j + 1) as f64),
            log10_tau: request.log10_tau,
            scattering: request.log10_tau
                || guess_tau != 0.0
                || mask.is_free(FitParam::Tau)
                || mask.is_free(FitParam::Alpha),
        })
    }

    fn num_harmonics(&self) -> usize {
        self.omegas.len()
    }

    /// A channel's scattering timescale \[rot\] and its first and second
    /// derivatives with respect to (tau, alpha).
    fn tau_derivs(&self, params: &ParamVector, chan: usize) -> (f64, [f64; 2], [[f64; 2]; 2]) {
        let theta = params[FitParam::Tau as usize];
        let alpha = params[FitParam::Alpha as usize];
        let ln_r = self.ln_tau_ratios[chan];
        let r_alpha = (alpha * ln_r).exp();
        if self.log10_tau {
            let tau = 10f64.powf(theta) * r_alpha;
            (
                tau,
                [tau * LN_10, tau * ln_r],
                [
                    [tau * LN_10 * LN_10, tau * LN_10 * ln_r],
                    [tau * LN_10 * ln_r, tau * ln_r * ln_r],
                ],
            )
        } else {
            let tau = theta * r_alpha;
            (
                tau,
                [r_alpha, tau * ln_r],
                [[0.0, r_alpha * ln_r], [r_alpha * ln_r, tau * ln_r * ln_r]],
            )
        }
    }

    fn evaluate(&self, params: &ParamVector) -> Evaluation {
        let mut eval = Evaluation {
            chi2: 0.0,
            grad: [0.0; NUM_FIT_PARAMS],
            hess: [[0.0; NUM_FIT_PARAMS]; NUM_FIT_PARAMS],
            channels: Vec::with_capacity(self.cross.nrows()),
        };

        for (n, (cross, model_power)) in self
            .cross
            .outer_iter()
            .zip(self.model_power.outer_iter())
            .enumerate()
        {
            let phi_n = params[0] + params[1] * self.dm_coeffs[n] + params[2] * self.gm_coeffs[n];
            let (tau_n, dtau, d2tau) = if self.scattering {
                self.tau_derivs(params, n)
            } else {
                (0.0, [0.0; 2], [[0.0; 2]; 2])
            };

            // C and its derivatives with respect to phi_n (p) and tau_n (t),
            // then S and its derivatives with respect to tau_n.
            let (mut c, mut c_p, mut c_pp, mut c_t, mut c_tt, mut c_pt) =
                (0.0, 0.0, 0.0, 0.0, 0.0, 0.0);
            let (mut s, mut s_t, mut s_tt) = (0.0, 0.0, 0.0);
            for ((&q0, &m2), &w) in cross.iter().zip(model_power.iter()).zip(self.omegas.iter()) {
                let q = q0 * c64::from_polar(1.0, w * phi_n);
                if self.scattering {
                    // conj(B) = 1 / (1 - i w tau)
                    let b_conj = c64::new(1.0, -w * tau_n).inv();
                    let qb = q * b_conj;
                    c += qb.re;
                    c_p -= w * qb.im;
                    c_pp -= w * w * qb.re;
                    let den = 1.0 + w * w * tau_n * tau_n;
                    s += m2 / den;
                    let qb2 = qb * b_conj;
                    let qb3 = qb2 * b_conj;
                    c_t -= w * qb2.im;
                    c_pt -= w * w * qb2.re;
                    c_tt -= 2.0 * w * w * qb3.re;
                    s_t -= 2.0 * m2 * w * w * tau_n / (den * den);
                    s_tt += m2
                        * (-2.0 * w * w / (den * den)
                            + 8.0 * w.powi(4) * tau_n * tau_n / den.powi(3));
                } else {
                    c += q.re;
                    c_p -= w * q.im;
                    c_pp -= w * w * q.re;
                    s += m2;
                }
            }

            let var = self.variances[n];
            let chi2_n = (self.data_power[n] - c * c / s) / var;
            eval.chi2 += chi2_n;
            eval.channels.push(ChannelSums { c, s, chi2: chi2_n });

            // Derivatives of f = C^2 / S; chi2_n = (|D|^2 - f) / var.
            let f_p = 2.0 * c * c_p / s;
            let f_t = 2.0 * c * c_t / s - c * c * s_t / (s * s);
            let f_pp = 2.0 * (c_p * c_p + c * c_pp) / s;
            let f_pt = 2.0 * (c_t * c_p + c * c_pt) / s - 2.0 * c * c_p * s_t / (s * s);
            let f_tt = 2.0 * (c_t * c_t + c * c_tt) / s - 4.0 * c * c_t * s_t / (s * s)
                - c * c * s_tt / (s * s)
                + 2.0 * c * c * s_t * s_t / s.powi(3);

            let jp = [1.0, self.dm_coeffs[n], self.gm_coeffs[n], 0.0, 0.0];
            let jt = [0.0, 0.0, 0.0, dtau[0], dtau[1]];
            for i in 0..NUM_FIT_PARAMS {
                eval.grad[i] -= (f_p * jp[i] + f_t * jt[i]) / var;
                for j in 0..NUM_FIT_PARAMS {
                    eval.hess[i][j] -= (f_pp * jp[i] * jp[j]
                        + f_pt * (jp[i] * jt[j] + jt[i] * jp[j])
                        + f_tt * jt[i] * jt[j])
                        / var;
                }
            }
            for i in 0..2 {
                for j in 0..2 {
                    eval.hess[3 + i][3 + j] -= f_t * d2tau[i][j] / var;
                }
            }
        }

        eval
    }
}

/// Pick out the gradient and Hessian of the free parameters.
fn reduce(eval: &Evaluation, free: &[usize]) -> (DVector<f64>, DMatrix<f64>) {
    let g = DVector::from_iterator(free.len(), free.iter().map(|&i| eval.grad[i]));
    let h = DMatrix::from_fn(free.len(), free.len(), |a, b| eval.hess[free[a]][free[b]]);
    (g, h)
}

/// Solve (H + lambda diag|H|) step = -g. `None` if the damped Hessian isn't
/// positive definite.
fn damped_step(h: &DMatrix<f64>, g: &DVector<f64>, lambda: f64) -> Option<DVector<f64>> {
    let mut a = h.clone();
    for i in 0..a.nrows() {
        a[(i, i)] += lambda * h[(i, i)].abs().max(f64::MIN_POSITIVE);
    }
    a.cholesky().map(|c| -c.solve(g))
}

/// The step-control state for the different methods.
struct Damping {
    method: FitMethod,
    lambda: f64,
    step_scale: f64,
}

impl Damping {
    fn new(method: FitMethod) -> Damping {
        Damping {
            method,
            lambda: match method {
                FitMethod::NewtonCg => 0.0,
                FitMethod::Tnc | FitMethod::TrustNcg => 1e-3,
            },
            step_scale: 1.0,
        }
    }

    fn step(&mut self, h: &DMatrix<f64>, g: &DVector<f64>) -> Option<DVector<f64>> {
        match damped_step(h, g, self.lambda) {
            Some(step) => Some(step * self.step_scale),
            None => {
                // The Hessian isn't positive definite; fall back to damping.
                self.lambda = (self.lambda * 10.0).max(1e-3);
                None
            }
        }
    }

    fn reject(&mut self) {
        match self.method {
            FitMethod::NewtonCg if self.lambda == 0.0 => self.step_scale *= 0.5,
            _ => self.lambda = (self.lambda * 10.0).max(1e-3),
        }
    }

    fn accept(&mut self) {
        self.step_scale = 1.0;
        self.lambda = match self.method {
            FitMethod::NewtonCg => 0.0,
            FitMethod::Tnc | FitMethod::TrustNcg => (self.lambda / 10.0).max(1e-12),
        };
    }
}

/// The chi-squared decrease a full Newton step would give, or `None` if the
/// Hessian isn't positive definite.
fn newton_decrement(h: &DMatrix<f64>, g: &DVector<f64>) -> Option<f64> {
    h.clone().cholesky().map(|c| g.dot(&c.solve(g)) / 2.0)
}

/// Embed a reduced covariance matrix into the full parameter space.
/// The frequency at which the phase and DM are uncorrelated, given the full
/// covariance at the fit frequencies. The phase picks up the GM term too, so
/// a free GM adds cov(GM, DM) to the condition; if the GM reference frequency
/// (`gm_ref.0`) isn't fixed it moves with the answer, and the condition is a
/// quadratic in nu^-2. `None` if there's no positive solution.
pub(super) fn zero_covariance_freq(
    cov: &DMatrix<f64>,
    fit_nu_dm: f64,
    gm_ref: (Option<f64>, f64),
    period: f64,
) -> Option<f64> {
    let (nu_gm, fit_nu_gm) = gm_ref;
    let a = DCONST / period;
    let b = DCONST * DCONST / period;
    let x0 = fit_nu_dm.powi(-2);
    let y0 = fit_nu_gm.powi(-4);
    let (c01, c11, c21) = (cov[(0, 1)], cov[(1, 1)], cov[(2, 1)]);
    if c11 <= 0.0 {
        return None;
    }

    // cov(phi', DM) = c01 + a (x - x0) c11 + b (y - y0) c21, with x = nu'^-2.
    let x = match nu_gm {
        Some(nu_gm) => x0 - (c01 + b * (nu_gm.powi(-4) - y0) * c21) / (a * c11),
        None => {
            // y = x^2: A x^2 + B x + C = 0.
            let qa = b * c21;
            let qb = a * c11;
            let qc = c01 - a * x0 * c11 - b * y0 * c21;
            if qa == 0.0 {
                -qc / qb
            } else {
                let disc = qb * qb - 4.0 * qa * qc;
                if disc < 0.0 {
                    return None;
                }
                // The root that tends to -C/B as A vanishes.
                -2.0 * qc / (qb + qb.signum() * disc.sqrt())
            }
        }
    };
    (x > 0.0 && x.is_finite()).then(|| x.powf(-0.5))
}

fn embed(reduced: &DMatrix<f64>, free: &[usize]) -> DMatrix<f64> {
    let mut full = DMatrix::zeros(NUM_FIT_PARAMS, NUM_FIT_PARAMS);
    for (a, &i) in free.iter().enumerate() {
        for (b, &j) in free.iter().enumerate() {
            full[(i, j)] = reduced[(a, b)];
        }
    }
    full
}

impl FitEngine for PortraitFitter {
    fn fit(&self, request: &FitRequest) -> Result<FitResult, FitError> {
        let start = Instant::now();
        let problem = Problem::new(request)?;
        let free = request.mask.free_indices();
        let bounds = match request.method {
            FitMethod::Tnc => request.bounds,
            FitMethod::NewtonCg | FitMethod::TrustNcg => None,
        };

        let mut params = request.guess;
        if let Some(b) = &bounds {
            b.clamp(&mut params);
        }
        let mut eval = problem.evaluate(&params);
        let mut num_evals = 1;
        let mut damping = Damping::new(request.method);
        let mut status = FitStatus::MaxIterations;

        'iterations: for iteration in 0..self.max_iterations {
            let (g, h) = reduce(&eval, &free);
            if eval.chi2 == 0.0
                || newton_decrement(&h, &g).map_or(false, |d| d < self.tolerance)
            {
                status = FitStatus::Converged;
                break;
            }

            for _ in 0..MAX_STEP_ATTEMPTS {
                let step = match damping.step(&h, &g) {
                    Some(s) => s,
                    None => continue,
                };
                let mut trial = params;
                for (&i, ds) in free.iter().zip(step.iter()) {
                    trial[i] += ds;
                }
                if let Some(b) = &bounds {
                    b.clamp(&mut trial);
                }
                let trial_eval = problem.evaluate(&trial);
                num_evals += 1;
                if trial_eval.chi2.is_finite() && trial_eval.chi2 <= eval.chi2 {
                    trace!(
                        "Iteration {iteration}: chi2 {:.6e} -> {:.6e}",
                        eval.chi2,
                        trial_eval.chi2
                    );
                    let unchanged = trial == params;
                    params = trial;
                    eval = trial_eval;
                    damping.accept();
                    if unchanged {
                        // Pinned against a bound.
                        status = FitStatus::Converged;
                        break 'iterations;
                    }
                    continue 'iterations;
                }
                damping.reject();
            }

            status = FitStatus::Stalled;
            break;
        }

        // Uncertainties from the Hessian of chi-squared.
        let (_, h) = reduce(&eval, &free);
        let nfree = free.len();
        let reduced_cov = match h.try_inverse() {
            Some(inv) => {
                let cov = inv * 2.0;
                (&cov + cov.transpose()) * 0.5
            }
            None => {
                status = FitStatus::SingularHessian;
                DMatrix::from_element(nfree, nfree, f64::NAN)
            }
        };
        let mut cov = embed(&reduced_cov, &free);

        // Move the reference frequencies.
        let [fit_nu_dm, fit_nu_gm, fit_nu_tau] = request.fit_freqs;
        let period = request.period;
        let mut jac = DMatrix::<f64>::identity(NUM_FIT_PARAMS, NUM_FIT_PARAMS);

        let nu_dm = request.ref_freqs[0].unwrap_or_else(|| {
            if request.mask.is_free(FitParam::Dm) {
                let gm_ref = (request.ref_freqs[1], fit_nu_gm);
                if let Some(nu) = zero_covariance_freq(&cov, fit_nu_dm, gm_ref, period) {
                    return nu;
                }
            }
            fit_nu_dm
        });
        let nu_gm = request.ref_freqs[1].unwrap_or(nu_dm);
        jac[(0, 1)] = dm_phase_coefficient(nu_dm, fit_nu_dm, period);
        jac[(0, 2)] = gm_phase_coefficient(nu_gm, fit_nu_gm, period);

        let tau = params[FitParam::Tau as usize];
        let alpha = params[FitParam::Alpha as usize];
        let nu_tau = request.ref_freqs[2].unwrap_or_else(|| {
            if request.mask.is_free(FitParam::Tau)
                && request.mask.is_free(FitParam::Alpha)
                && cov[(4, 4)] > 0.0
            {
                let ln_ratio = if request.log10_tau {
                    -cov[(3, 4)] / cov[(4, 4)] * LN_10
                } else if tau != 0.0 {
                    -cov[(3, 4)] / (tau * cov[(4, 4)])
                } else {
                    0.0
                };
                if ln_ratio.is_finite() {
                    return fit_nu_tau * ln_ratio.exp();
                }
            }
            fit_nu_tau
        });
        let ln_ratio = (nu_tau / fit_nu_tau).ln();
        let new_tau = if request.log10_tau {
            jac[(3, 4)] = ln_ratio / LN_10;
            tau + alpha * ln_ratio / LN_10
        } else {
            let r_alpha = (alpha * ln_ratio).exp();
            jac[(3, 3)] = r_alpha;
            jac[(3, 4)] = tau * r_alpha * ln_ratio;
            tau * r_alpha
        };

        let phi = params[0]
            + params[1] * jac[(0, 1)]
            + params[2] * jac[(0, 2)];
        cov = &jac * cov * jac.transpose();
        let errs: Vec<f64> = (0..NUM_FIT_PARAMS)
            .map(|i| {
                if request.mask.as_array()[i] {
                    cov[(i, i)].sqrt()
                } else {
                    0.0
                }
            })
            .collect();
        let covariance =
            Array2::from_shape_fn((nfree, nfree), |(a, b)| cov[(free[a], free[b])]);

        // Per-channel quantities.
        let num_harm = problem.num_harmonics();
        let nchan = eval.channels.len();
        let mut scales = Array1::zeros(nchan);
        let mut scale_errs = Array1::zeros(nchan);
        let mut channel_snrs = Array1::zeros(nchan);
        let mut channel_red_chi2s = Array1::zeros(nchan);
        let chan_dof = (2 * num_harm).saturating_sub(2).max(1) as f64;
        for (n, sums) in eval.channels.iter().enumerate() {
            let var = problem.variances[n];
            scales[n] = sums.c / sums.s;
            scale_errs[n] = (var / sums.s).sqrt();
            channel_snrs[n] = sums.c / (sums.s * var).sqrt();
            channel_red_chi2s[n] = sums.chi2 / chan_dof;
        }
        let snr = channel_snrs.mapv(|x: f64| x * x).sum().sqrt();
        let dof = (2 * num_harm * nchan).saturating_sub(nchan + nfree).max(1);

        Ok(FitResult {
            phi: wrap_phase(phi),
            phi_err: errs[0],
            dm: params[1],
            dm_err: errs[1],
            gm: params[2],
            gm_err: errs[2],
            tau: new_tau,
            tau_err: errs[3],
            alpha,
            alpha_err: errs[4],
            covariance,
            snr,
            channel_snrs,
            channel_red_chi2s,
            scales,
            scale_errs,
            red_chi2: eval.chi2 / dof as f64,
            status,
            num_evals,
            duration: start.elapsed(),
            nu_dm,
            nu_gm,
            nu_tau,
        })
    }
}
