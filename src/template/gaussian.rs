// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Gaussian-component template models.
//!
//! A model file looks like this:
//!
//! ```text
//! MODEL   J1234+5678
//! CODE    000
//! FREQ    1400.0
//! DC      0.0 0
//! TAU     0.0 0
//! ALPHA   -4.0 0
//! COMP01  0.50 1  0.00 0  0.030 1  -0.30 1  1.00 1  -1.5 1
//! ```
//!
//! `TAU` is in seconds and referenced to `FREQ` \[MHz\]. Each component line
//! holds (location, location evolution, FWHM, FWHM evolution, amplitude,
//! amplitude evolution), each followed by a fit flag that is read but not
//! used. The three `CODE` digits say how the location, FWHM and amplitude
//! evolve with frequency: 0 for a power law, value * (nu / FREQ)^evolution,
//! and 1 for linear, value + evolution * (nu - FREQ). Lines starting with `#`
//! are comments.

use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use ndarray::prelude::*;

use super::{TemplateDefaults, TemplateError, TemplateProvider, TemplateScattering};
use crate::{
    cli::Warn,
    constants::SCATTERING_ALPHA,
    context::Observation,
    math::RealFft,
    scattering::{scatter_portrait, scattering_times},
};

/// How a component parameter changes with frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evolution {
    PowerLaw,
    Linear,
}

impl Evolution {
    fn from_digit(c: char) -> Option<Evolution> {
        match c {
            '0' => Some(Evolution::PowerLaw),
            '1' => Some(Evolution::Linear),
            _ => None,
        }
    }

    fn apply(self, value: f64, evolution: f64, freq: f64, nu_ref: f64) -> f64 {
        match self {
            Evolution::PowerLaw => value * (freq / nu_ref).powf(evolution),
            Evolution::Linear => value + evolution * (freq - nu_ref),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianComponent {
    /// \[rot\]
    pub loc: f64,
    pub loc_evolution: f64,
    /// The full width at half maximum \[rot\].
    pub fwhm: f64,
    pub fwhm_evolution: f64,
    pub amp: f64,
    pub amp_evolution: f64,
}

#[derive(Debug, Clone)]
pub struct GaussianModel {
    /// Where the model came from; used as its name.
    pub path: String,
    pub model_name: String,
    /// How (location, FWHM, amplitude) evolve.
    pub code: [Evolution; 3],
    /// \[MHz\]
    pub nu_ref: f64,
    pub dc: f64,
    /// \[seconds\] at `nu_ref`
    pub tau: f64,
    pub alpha: f64,
    pub components: Vec<GaussianComponent>,
}

impl GaussianModel {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<GaussianModel, TemplateError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|_| TemplateError::BadFile(path.to_path_buf()))?;
        let mut model = parse_gaussian_model(&mut BufReader::new(file))?;
        model.path = path.display().to_string();
        Ok(model)
    }

    /// The profile at a single frequency, without scattering.
    fn profile(&self, nbin: usize, freq: f64) -> Array1<f64> {
        let [loc_code, fwhm_code, amp_code] = self.code;
        let mut profile = Array1::from_elem(nbin, self.dc);
        for comp in &self.components {
            let loc = loc_code.apply(comp.loc, comp.loc_evolution, freq, self.nu_ref);
            let fwhm = fwhm_code.apply(comp.fwhm, comp.fwhm_evolution, freq, self.nu_ref);
            let amp = amp_code.apply(comp.amp, comp.amp_evolution, freq, self.nu_ref);
            if fwhm <= 0.0 {
                continue;
            }
            profile.indexed_iter_mut().for_each(|(i, p)| {
                let phase = i as f64 / nbin as f64;
                // Fold the distance into [-0.5, 0.5) so components wrap.
                let x = (phase - loc + 0.5).rem_euclid(1.0) - 0.5;
                *p += amp * (-4.0 * std::f64::consts::LN_2 * (x / fwhm).powi(2)).exp();
            });
        }
        profile
    }
}

impl TemplateProvider for GaussianModel {
    fn name(&self) -> &str {
        &self.path
    }

    fn portrait(
        &self,
        nbin: usize,
        freqs: ArrayView1<f64>,
        period: f64,
        scattered: bool,
    ) -> Result<Array2<f64>, TemplateError> {
        let mut portrait = Array2::zeros((freqs.len(), nbin));
        for (mut row, &freq) in portrait.outer_iter_mut().zip(freqs.iter()) {
            row.assign(&self.profile(nbin, freq));
        }
        if scattered && self.tau != 0.0 {
            let taus = scattering_times(self.tau / period, self.alpha, freqs, self.nu_ref);
            portrait = scatter_portrait(&RealFft::new(nbin), portrait.view(), taus.view());
        }
        Ok(portrait)
    }

    /// A model with a zero TAU carries no scattering guess.
    fn defaults(&self) -> TemplateDefaults {
        TemplateDefaults {
            alpha: self.alpha,
            scattering: (self.tau > 0.0).then_some(TemplateScattering {
                tau: self.tau,
                ref_freq: self.nu_ref,
            }),
        }
    }

    fn check_compatible(&self, _obs: &Observation) -> Result<(), TemplateError> {
        // Generated at whatever resolution the data have.
        Ok(())
    }
}

/// Parse a buffer containing a Gaussian-component model.
pub(crate) fn parse_gaussian_model<T: BufRead>(buf: &mut T) -> Result<GaussianModel, TemplateError> {
    let mut line = String::new();
    let mut line_num: u32 = 0;
    let mut model_name = None;
    let mut code = None;
    let mut nu_ref = None;
    let mut dc = 0.0;
    let mut tau = 0.0;
    let mut alpha = SCATTERING_ALPHA;
    let mut components = vec![];

    let parse_float = |string: &str, line_num: u32| -> Result<f64, TemplateError> {
        string.parse().map_err(|_| TemplateError::ParseFloat {
            line_num,
            string: string.to_string(),
        })
    };

    while buf.read_line(&mut line)? > 0 {
        line_num += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            line.clear();
            continue;
        }

        let mut items = trimmed.split_ascii_whitespace();
        let key = items.next().unwrap_or_default().to_string();
        let values: Vec<&str> = items.collect();
        let expect = |n: usize| -> Result<(), TemplateError> {
            if values.len() < n {
                Err(TemplateError::IncompleteLine {
                    line_num,
                    key: key.clone(),
                    expected: n,
                    got: values.len(),
                })
            } else {
                Ok(())
            }
        };

        match key.as_str() {
            "MODEL" => {
                expect(1)?;
                model_name = Some(values.join(" "));
            }
            "CODE" => {
                expect(1)?;
                let digits: Vec<Evolution> = values[0].chars().filter_map(Evolution::from_digit).collect();
                match (values[0].len(), digits.as_slice()) {
                    (3, &[loc, wid, amp]) => code = Some([loc, wid, amp]),
                    _ => return Err(TemplateError::BadCode(values[0].to_string())),
                }
            }
            "FREQ" => {
                expect(1)?;
                nu_ref = Some(parse_float(values[0], line_num)?);
            }
            "DC" => {
                expect(1)?;
                dc = parse_float(values[0], line_num)?;
            }
            "TAU" => {
                expect(1)?;
                tau = parse_float(values[0], line_num)?;
            }
            "ALPHA" => {
                expect(1)?;
                alpha = parse_float(values[0], line_num)?;
            }
            k if k.starts_with("COMP") => {
                expect(12)?;
                // Values and fit flags alternate.
                let mut params = [0.0; 6];
                for (p, v) in params.iter_mut().zip(values.iter().step_by(2)) {
                    *p = parse_float(v, line_num)?;
                }
                components.push(GaussianComponent {
                    loc: params[0],
                    loc_evolution: params[1],
                    fwhm: params[2],
                    fwhm_evolution: params[3],
                    amp: params[4],
                    amp_evolution: params[5],
                });
            }
            _ => {
                return Err(TemplateError::UnknownKey {
                    line_num,
                    key: key.clone(),
                })
            }
        }
        line.clear();
    }

    let model_name = match model_name {
        Some(m) => m,
        None => {
            "Template has no MODEL line; it will be unnamed".warn();
            String::new()
        }
    };
    if components.is_empty() {
        return Err(TemplateError::NoComponents);
    }
    Ok(GaussianModel {
        path: model_name.clone(),
        model_name,
        code: code.ok_or(TemplateError::MissingKey("CODE"))?,
        nu_ref: nu_ref.ok_or(TemplateError::MissingKey("FREQ"))?,
        dc,
        tau,
        alpha,
        components,
    })
}
