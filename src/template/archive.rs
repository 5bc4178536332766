// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Templates that are fixed portraits read from an archive.

use std::path::Path;

use log::warn;
use ndarray::prelude::*;

use super::{TemplateDefaults, TemplateError, TemplateProvider};
use crate::{
    context::Observation,
    io::read::{ArchiveRead, LoadOptions},
};

#[derive(Debug, Clone)]
pub struct ArchiveTemplate {
    path: String,
    /// Shape (nchan, nbin).
    portrait: Array2<f64>,
    freqs: Array1<f64>,
}

impl ArchiveTemplate {
    /// Read a template archive. Its subintegrations are averaged and each
    /// channel's baseline removed; the stored dispersion state is left alone.
    pub fn new(path: &Path, reader: &dyn ArchiveRead) -> Result<ArchiveTemplate, TemplateError> {
        let options = LoadOptions {
            tscrunch: true,
            remove_baseline: true,
            ..Default::default()
        };
        let obs = reader.load(path, &options)?;
        let subint = obs
            .subints
            .into_iter()
            .next()
            .ok_or_else(|| TemplateError::BadFile(path.to_path_buf()))?;
        // Masked channels contribute nothing.
        let mut portrait = subint.portrait;
        for (mut row, &w) in portrait.outer_iter_mut().zip(subint.weights.iter()) {
            if w <= 0.0 {
                row.fill(0.0);
            }
        }
        Ok(ArchiveTemplate {
            path: path.display().to_string(),
            portrait,
            freqs: subint.freqs,
        })
    }

    pub fn nbin(&self) -> usize {
        self.portrait.ncols()
    }

    pub fn nchan(&self) -> usize {
        self.portrait.nrows()
    }
}

impl TemplateProvider for ArchiveTemplate {
    fn name(&self) -> &str {
        &self.path
    }

    fn portrait(
        &self,
        nbin: usize,
        freqs: ArrayView1<f64>,
        _period: f64,
        _scattered: bool,
    ) -> Result<Array2<f64>, TemplateError> {
        if nbin != self.nbin() {
            return Err(TemplateError::NbinMismatch {
                template: self.nbin(),
                data: nbin,
            });
        }
        match self.nchan() {
            // A profile applies to every channel.
            1 => {
                let profile = self.portrait.row(0);
                Ok(Array2::from_shape_fn((freqs.len(), nbin), |(_, j)| profile[j]))
            }
            n if n == freqs.len() => {
                if self.freqs.iter().zip(freqs.iter()).any(|(a, b)| a != b) {
                    warn!("Frequency mismatch between template {} and data", self.path);
                }
                Ok(self.portrait.clone())
            }
            n => Err(TemplateError::NchanMismatch {
                template: n,
                data: freqs.len(),
            }),
        }
    }

    fn defaults(&self) -> TemplateDefaults {
        TemplateDefaults::default()
    }

    fn check_compatible(&self, obs: &Observation) -> Result<(), TemplateError> {
        if obs.nbin != self.nbin() {
            return Err(TemplateError::NbinMismatch {
                template: self.nbin(),
                data: obs.nbin,
            });
        }
        if self.nchan() != 1 && self.nchan() != obs.nchan {
            return Err(TemplateError::NchanMismatch {
                template: self.nchan(),
                data: obs.nchan,
            });
        }
        Ok(())
    }
}
