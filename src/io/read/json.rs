// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Archives stored as JSON.

use std::{fs::File, io::BufReader, path::Path};

use hifitime::{Duration, Epoch, Unit};
use log::trace;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

use super::{apply_load_options, derive_statistics, ArchiveRead, ArchiveReadError, LoadOptions};
use crate::{
    constants::SECONDS_PER_DAY,
    context::{Observation, Subint},
};

/// The on-disk layout of a JSON archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonArchive {
    pub source: String,
    pub telescope: String,
    #[serde(default)]
    pub telescope_code: Option<String>,
    #[serde(default)]
    pub backend: String,
    #[serde(default)]
    pub frontend: String,
    pub nbin: usize,
    pub nchan: usize,
    /// \[MHz\]
    pub bandwidth: f64,
    /// \[MHz\]
    pub centre_freq: f64,
    pub dm: f64,
    #[serde(default)]
    pub dedispersed: bool,
    /// \[seconds\]
    #[serde(default)]
    pub backend_delay: f64,
    pub subints: Vec<JsonSubint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonSubint {
    /// The integer part of the midpoint MJD (UTC).
    pub imjd: u32,
    /// The fractional part of the midpoint MJD.
    pub fmjd: f64,
    /// \[seconds\]
    pub period: f64,
    /// \[seconds\]
    pub duration: f64,
    pub freqs: Vec<f64>,
    pub weights: Vec<f64>,
    /// One row per channel.
    pub portrait: Vec<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub noise_stds: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snrs: Option<Vec<f64>>,
    #[serde(default = "default_doppler_factor")]
    pub doppler_factor: f64,
    #[serde(default)]
    pub parallactic_angle: f64,
}

fn default_doppler_factor() -> f64 {
    1.0
}

impl JsonArchive {
    /// Convert to an [`Observation`], checking array shapes against the
    /// header. Statistics are not derived here.
    pub(crate) fn into_observation(self, file: &str) -> Result<Observation, ArchiveReadError> {
        if self.subints.is_empty() {
            return Err(ArchiveReadError::NoSubints {
                file: file.to_string(),
            });
        }
        let (nbin, nchan) = (self.nbin, self.nchan);
        let bad_shape = |subint, what, expected, got| ArchiveReadError::BadShape {
            file: file.to_string(),
            subint,
            what,
            expected,
            got,
        };

        let mut subints = Vec::with_capacity(self.subints.len());
        for (i_subint, s) in self.subints.into_iter().enumerate() {
            for (what, got) in [
                ("frequencies", s.freqs.len()),
                ("weights", s.weights.len()),
                ("portrait rows", s.portrait.len()),
            ] {
                if got != nchan {
                    return Err(bad_shape(i_subint, what, nchan, got));
                }
            }
            let optional = |v: Option<Vec<f64>>, what| match v {
                Some(v) if v.len() != nchan => Err(bad_shape(i_subint, what, nchan, v.len())),
                Some(v) => Ok(Array1::from(v)),
                None => Ok(Array1::zeros(nchan)),
            };
            let noise_stds = optional(s.noise_stds, "noise levels")?;
            let snrs = optional(s.snrs, "SNRs")?;

            let mut portrait = Array2::zeros((nchan, nbin));
            for (mut row, values) in portrait.outer_iter_mut().zip(s.portrait.iter()) {
                if values.len() != nbin {
                    return Err(bad_shape(i_subint, "phase bins", nbin, values.len()));
                }
                row.assign(&ArrayView1::from(values.as_slice()));
            }

            let epoch = Epoch::from_mjd_utc(f64::from(s.imjd))
                + Duration::from_f64(s.fmjd * SECONDS_PER_DAY, Unit::Second);
            subints.push(Subint {
                epoch,
                period: s.period,
                duration: s.duration,
                freqs: Array1::from(s.freqs),
                weights: Array1::from(s.weights),
                portrait,
                noise_stds,
                snrs,
                ok_chans: vec![],
                doppler_factor: s.doppler_factor,
                parallactic_angle: s.parallactic_angle,
            });
        }

        Ok(Observation {
            telescope_code: self
                .telescope_code
                .unwrap_or_else(|| self.telescope.clone()),
            source: self.source,
            telescope: self.telescope,
            backend: self.backend,
            frontend: self.frontend,
            nbin,
            nchan,
            bandwidth: self.bandwidth,
            centre_freq: self.centre_freq,
            dm: self.dm,
            dedispersed: self.dedispersed,
            backend_delay: self.backend_delay,
            prof_snr: 0.0,
            subints,
        })
    }
}

impl From<&Observation> for JsonArchive {
    fn from(obs: &Observation) -> Self {
        JsonArchive {
            source: obs.source.clone(),
            telescope: obs.telescope.clone(),
            telescope_code: Some(obs.telescope_code.clone()),
            backend: obs.backend.clone(),
            frontend: obs.frontend.clone(),
            nbin: obs.nbin,
            nchan: obs.nchan,
            bandwidth: obs.bandwidth,
            centre_freq: obs.centre_freq,
            dm: obs.dm,
            dedispersed: obs.dedispersed,
            backend_delay: obs.backend_delay,
            subints: obs
                .subints
                .iter()
                .map(|s| {
                    let mjd = s.epoch.to_mjd_utc_days();
                    JsonSubint {
                        imjd: mjd.floor() as u32,
                        fmjd: mjd.fract(),
                        period: s.period,
                        duration: s.duration,
                        freqs: s.freqs.to_vec(),
                        weights: s.weights.to_vec(),
                        portrait: s.portrait.outer_iter().map(|r| r.to_vec()).collect(),
                        noise_stds: Some(s.noise_stds.to_vec()),
                        snrs: Some(s.snrs.to_vec()),
                        doppler_factor: s.doppler_factor,
                        parallactic_angle: s.parallactic_angle,
                    }
                })
                .collect(),
        }
    }
}

/// Reads [`JsonArchive`] files.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonArchiveReader;

impl ArchiveRead for JsonArchiveReader {
    fn load(&self, path: &Path, options: &LoadOptions) -> Result<Observation, ArchiveReadError> {
        let file = File::open(path).map_err(|_| ArchiveReadError::BadFile(path.to_path_buf()))?;
        let name = path.display().to_string();
        let archive: JsonArchive = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            ArchiveReadError::Parse {
                file: name.clone(),
                details: e.to_string(),
            }
        })?;
        trace!(
            "Read {name}: {} subints, {} channels, {} bins",
            archive.subints.len(),
            archive.nchan,
            archive.nbin
        );

        let mut obs = archive.into_observation(&name)?;
        let reshaped = apply_load_options(&mut obs, options);
        derive_statistics(&mut obs, reshaped);
        Ok(obs)
    }
}
