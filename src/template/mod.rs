// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Templates: noiseless reference portraits that data are fit against.

mod archive;
mod error;
mod gaussian;

pub use archive::ArchiveTemplate;
pub use error::TemplateError;
pub use gaussian::{Evolution, GaussianComponent, GaussianModel};

use std::path::Path;

use ndarray::prelude::*;

use crate::{constants::SCATTERING_ALPHA, context::Observation, io::read::ArchiveRead};

/// A scattering timescale that a template was made with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemplateScattering {
    /// \[seconds\]
    pub tau: f64,
    /// The frequency that `tau` is referenced to \[MHz\].
    pub ref_freq: f64,
}

/// Values that a template supplies for seeding fits. These are always
/// populated; templates that know nothing about scattering use
/// [`SCATTERING_ALPHA`] and no scattering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemplateDefaults {
    /// The scattering index.
    pub alpha: f64,

    pub scattering: Option<TemplateScattering>,
}

impl Default for TemplateDefaults {
    fn default() -> Self {
        TemplateDefaults {
            alpha: SCATTERING_ALPHA,
            scattering: None,
        }
    }
}

/// Something that can supply template portraits.
pub trait TemplateProvider {
    /// The name written in the `tmplt` flag of TOAs.
    fn name(&self) -> &str;

    /// Generate a portrait of shape (`freqs.len()`, `nbin`). If `scattered` is
    /// false, any scattering the template carries is left out, because the
    /// fit will be modelling it.
    fn portrait(
        &self,
        nbin: usize,
        freqs: ArrayView1<f64>,
        period: f64,
        scattered: bool,
    ) -> Result<Array2<f64>, TemplateError>;

    fn defaults(&self) -> TemplateDefaults;

    /// Can this template be used for this observation? An error here means
    /// the observation should be skipped.
    fn check_compatible(&self, obs: &Observation) -> Result<(), TemplateError>;
}

/// Load a template. `.json` files are archive templates read with `reader`;
/// anything else is parsed as a Gaussian-component model.
pub fn load_template<P: AsRef<Path>>(
    path: P,
    reader: &dyn ArchiveRead,
) -> Result<Box<dyn TemplateProvider>, TemplateError> {
    let path = path.as_ref();
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => Ok(Box::new(ArchiveTemplate::new(path, reader)?)),
        _ => Ok(Box::new(GaussianModel::from_file(path)?)),
    }
}
