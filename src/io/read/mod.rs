// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Code to read pulsar archives.
//!
//! Readers produce an [`Observation`]; everything the TOA pipeline needs about
//! the data (noise levels, signal-to-noise ratios, good channels) is filled in
//! here so the rest of the crate can treat it as authoritative.

mod error;
mod json;
#[cfg(test)]
mod tests;

pub use error::ArchiveReadError;
pub use json::{JsonArchive, JsonArchiveReader, JsonSubint};

use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

use hifitime::{Duration, Unit};
use log::debug;
use ndarray::prelude::*;

use crate::{
    context::{Observation, Subint},
    math::{get_noise, get_snr, rotate_portrait, RealFft},
};

/// How an archive should be prepared when it is loaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Remove the dispersive delays of the stored DM.
    pub dedisperse: bool,

    /// Restore the dispersive delays of the stored DM if they have been
    /// removed.
    pub dededisperse: bool,

    /// Average all subintegrations into one.
    pub tscrunch: bool,

    /// Average all channels into one.
    pub fscrunch: bool,

    /// Subtract each channel's off-pulse mean.
    pub remove_baseline: bool,
}

/// Something that can load pulsar archives.
pub trait ArchiveRead {
    /// Load the archive at `path`. Failures are recoverable; callers are
    /// expected to skip the archive.
    fn load(&self, path: &Path, options: &LoadOptions) -> Result<Observation, ArchiveReadError>;
}

/// Expand a `-d` argument into archive paths. A `.json` file is a single
/// archive; anything else is a list of archive paths, one per line, with
/// blank lines and `#` comments ignored. Relative paths in a list are taken
/// as relative to the current directory.
pub fn get_data_files<P: AsRef<Path>>(path: P) -> Result<Vec<PathBuf>, ArchiveReadError> {
    let path = path.as_ref();
    if path.extension().and_then(|e| e.to_str()) == Some("json") {
        return Ok(vec![path.to_path_buf()]);
    }
    let file = File::open(path).map_err(|_| ArchiveReadError::BadFile(path.to_path_buf()))?;
    let mut files = vec![];
    for line in BufReader::new(file).lines() {
        let line = line?;
        let line = line.split('#').next().unwrap_or("").trim();
        if !line.is_empty() {
            files.push(PathBuf::from(line));
        }
    }
    if files.is_empty() {
        return Err(ArchiveReadError::EmptyFileList(path.to_path_buf()));
    }
    Ok(files)
}

/// Apply the dispersion and scrunching options to a freshly read observation.
/// Returns whether the portraits changed shape, in which case any stored
/// statistics no longer apply.
pub(crate) fn apply_load_options(obs: &mut Observation, options: &LoadOptions) -> bool {
    let fft = RealFft::new(obs.nbin);

    if options.dedisperse && !obs.dedispersed {
        redisperse(obs, &fft, obs.dm);
        obs.dedispersed = true;
    } else if options.dededisperse && obs.dedispersed {
        redisperse(obs, &fft, -obs.dm);
        obs.dedispersed = false;
    }

    let mut reshaped = false;
    if options.tscrunch && obs.subints.len() > 1 {
        tscrunch(obs);
        reshaped = true;
    }
    if options.fscrunch && obs.nchan > 1 {
        fscrunch(obs);
        reshaped = true;
    }
    if options.remove_baseline {
        for subint in obs.subints.iter_mut() {
            for mut row in subint.portrait.outer_iter_mut() {
                let baseline = off_pulse_mean(row.view());
                row -= baseline;
            }
        }
    }
    reshaped
}

/// Rotate every channel to remove (positive `dm`) or restore (negative `dm`)
/// the dispersive delays relative to the band centre.
fn redisperse(obs: &mut Observation, fft: &RealFft, dm: f64) {
    let centre_freq = obs.centre_freq;
    for subint in obs.subints.iter_mut() {
        subint.portrait = rotate_portrait(
            fft,
            subint.portrait.view(),
            0.0,
            dm,
            subint.period,
            subint.freqs.view(),
            centre_freq,
        );
    }
}

/// Average all subintegrations into one, weighting each channel by its
/// weight. The epoch is the duration-weighted mean epoch.
fn tscrunch(obs: &mut Observation) {
    let first = &obs.subints[0];
    let nchan = obs.nchan;
    let mut portrait = Array2::zeros(first.portrait.dim());
    let mut weights = Array1::<f64>::zeros(nchan);
    let total_duration: f64 = obs.integration_length();
    let mut offset = 0.0;
    let (mut period, mut doppler, mut par_angle) = (0.0, 0.0, 0.0);
    let num_subints = obs.subints.len() as f64;

    for subint in &obs.subints {
        for (n, (mut row, &w)) in portrait
            .outer_iter_mut()
            .zip(subint.weights.iter())
            .enumerate()
        {
            row.scaled_add(w, &subint.portrait.row(n));
            weights[n] += w;
        }
        let dt = (subint.epoch - first.epoch).to_seconds();
        offset += dt * subint.duration / total_duration.max(f64::MIN_POSITIVE);
        period += subint.period / num_subints;
        doppler += subint.doppler_factor / num_subints;
        par_angle += subint.parallactic_angle / num_subints;
    }
    for (mut row, &w) in portrait.outer_iter_mut().zip(weights.iter()) {
        if w > 0.0 {
            row /= w;
        }
    }

    let subint = Subint {
        epoch: first.epoch + Duration::from_f64(offset, Unit::Second),
        period,
        duration: total_duration,
        freqs: first.freqs.clone(),
        ok_chans: vec![],
        noise_stds: Array1::zeros(nchan),
        snrs: Array1::zeros(nchan),
        weights,
        portrait,
        doppler_factor: doppler,
        parallactic_angle: par_angle,
    };
    debug!("Averaged {} subints into one", obs.subints.len());
    obs.subints = vec![subint];
}

/// Average all channels of each subintegration into one.
fn fscrunch(obs: &mut Observation) {
    for subint in obs.subints.iter_mut() {
        let total_weight = subint.weights.sum();
        let (profile, freq) = if total_weight > 0.0 {
            (
                subint.weights.dot(&subint.portrait) / total_weight,
                subint.weights.dot(&subint.freqs) / total_weight,
            )
        } else {
            (
                subint.portrait.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(obs.nbin)),
                subint.freqs.mean().unwrap_or(obs.centre_freq),
            )
        };
        subint.portrait = profile.insert_axis(Axis(0));
        subint.freqs = array![freq];
        subint.weights = array![total_weight];
        subint.noise_stds = array![0.0];
        subint.snrs = array![0.0];
        subint.ok_chans = vec![];
    }
    obs.nchan = 1;
}

/// The mean of the lowest-mean contiguous window covering a tenth of the
/// profile.
fn off_pulse_mean(profile: ArrayView1<f64>) -> f64 {
    let nbin = profile.len();
    if nbin == 0 {
        return 0.0;
    }
    let width = (nbin / 10).max(1);
    (0..nbin)
        .map(|start| (0..width).map(|i| profile[(start + i) % nbin]).sum::<f64>() / width as f64)
        .fold(f64::INFINITY, f64::min)
}

/// Fill in noise levels, signal-to-noise ratios, good channels and the
/// archive signal-to-noise ratio. Noise levels and signal-to-noise ratios that
/// are already present (non-zero) are kept unless `recompute` is set.
pub(crate) fn derive_statistics(obs: &mut Observation, recompute: bool) {
    let fft = RealFft::new(obs.nbin);
    for subint in obs.subints.iter_mut() {
        for (n, row) in subint.portrait.outer_iter().enumerate() {
            if recompute || subint.noise_stds[n] == 0.0 {
                subint.noise_stds[n] = get_noise(&fft, row);
            }
            if recompute || subint.snrs[n] == 0.0 {
                subint.snrs[n] = get_snr(&fft, row, subint.noise_stds[n]);
            }
        }
        subint.ok_chans = subint
            .weights
            .iter()
            .enumerate()
            .filter(|(_, &w)| w > 0.0)
            .map(|(i, _)| i)
            .collect();
    }
    obs.prof_snr = obs
        .subints
        .iter()
        .flat_map(|s| s.ok_chans.iter().map(move |&i| s.snrs[i]))
        .filter(|s| s.is_finite())
        .map(|s| s * s)
        .sum::<f64>()
        .sqrt();
}
