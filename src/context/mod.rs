// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Data and metadata on a pulsar observation (an "archive").
 */


use hifitime::Epoch;
use ndarray::prelude::*;

/// A loaded pulsar archive.
///
/// Archive readers are the only things that construct these; the TOA pipeline
/// treats everything in here as authoritative.
#[derive(Debug, Clone)]
pub struct Observation {
    /// The name of the pulsar.
    pub source: String,

    /// The name of the telescope.
    pub telescope: String,

    /// The observatory code used in TOA files.
    pub telescope_code: String,

    pub backend: String,

    pub frontend: String,

    /// The number of phase bins in each profile.
    pub nbin: usize,

    /// The number of frequency channels in each subintegration.
    pub nchan: usize,

    /// The total bandwidth \[MHz\]. This is negative if channel frequencies
    /// decrease with channel index.
    pub bandwidth: f64,

    /// The centre frequency of the band \[MHz\].
    pub centre_freq: f64,

    /// The DM stored in the archive \[pc cm^-3\].
    pub dm: f64,

    /// Have the stored portraits already been dedispersed with `dm`?
    pub dedispersed: bool,

    /// A constant delay to add to all TOAs \[seconds\].
    pub backend_delay: f64,

    /// The signal-to-noise ratio of the whole archive.
    pub prof_snr: f64,

    pub subints: Vec<Subint>,
}

/// A single time segment of an observation.
#[derive(Debug, Clone)]
pub struct Subint {
    /// The midpoint of this subintegration.
    pub epoch: Epoch,

    /// The apparent (topocentric) spin period \[seconds\].
    pub period: f64,

    /// The integration length of this subintegration \[seconds\].
    pub duration: f64,

    /// The centre frequency of each channel \[MHz\].
    pub freqs: Array1<f64>,

    /// The statistical weight of each channel. Channels with zero weight are
    /// not good.
    pub weights: Array1<f64>,

    /// The intensity of each channel as a function of phase. Shape is
    /// (nchan, nbin).
    pub portrait: Array2<f64>,

    /// The time-domain noise level of each channel.
    pub noise_stds: Array1<f64>,

    /// The signal-to-noise ratio of each channel.
    pub snrs: Array1<f64>,

    /// The indices of the good channels, in ascending order.
    pub ok_chans: Vec<usize>,

    /// The ratio of the topocentric and barycentric observing frequencies.
    pub doppler_factor: f64,

    /// The parallactic angle at the midpoint \[degrees\].
    pub parallactic_angle: f64,
}

impl Observation {
    /// The indices of subintegrations that have at least one good channel.
    pub fn ok_subints(&self) -> Vec<usize> {
        self.subints
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_ok())
            .map(|(i, _)| i)
            .collect()
    }

    /// The number of good channels (over all subintegrations) that have NaN
    /// signal-to-noise ratios.
    pub fn num_nan_snr_channels(&self) -> usize {
        self.subints.iter().map(|s| s.nan_snr_channels().len()).sum()
    }

    /// Remove good channels with NaN signal-to-noise ratios from every
    /// subintegration. Returns the number of channels removed.
    pub fn drop_nan_snr_channels(&mut self) -> usize {
        self.subints
            .iter_mut()
            .map(|s| s.drop_nan_snr_channels())
            .sum()
    }

    /// The total observation length \[seconds\].
    pub fn integration_length(&self) -> f64 {
        self.subints.iter().map(|s| s.duration).sum()
    }
}

impl Subint {
    /// Does this subintegration have any good channels?
    pub fn is_ok(&self) -> bool {
        !self.ok_chans.is_empty()
    }

    fn nan_snr_channels(&self) -> Vec<usize> {
        self.ok_chans
            .iter()
            .copied()
            .filter(|&i| self.snrs[i].is_nan())
            .collect()
    }

    /// Remove good channels with NaN signal-to-noise ratios. Channels are
    /// never added back to the good set.
    pub fn drop_nan_snr_channels(&mut self) -> usize {
        let before = self.ok_chans.len();
        let snrs = &self.snrs;
        self.ok_chans.retain(|&i| !snrs[i].is_nan());
        before - self.ok_chans.len()
    }

    /// The frequencies of the good channels.
    pub fn ok_freqs(&self) -> Array1<f64> {
        self.freqs.select(Axis(0), &self.ok_chans)
    }

    /// The portrait rows of the good channels.
    pub fn ok_portrait(&self) -> Array2<f64> {
        self.portrait.select(Axis(0), &self.ok_chans)
    }
}
