// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Proposing channels to remove ("zap") after wideband fits.

use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_ZAP_RED_CHI2_THRESHOLD, DEFAULT_ZAP_SNR_THRESHOLD};

/// When a channel should be zapped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZapCriteria {
    /// The signal-to-noise ratio that the retained channels should reach
    /// together. Each channel must exceed this divided by the square root of
    /// the number of retained channels. Zero disables the cut.
    pub snr_threshold: f64,

    /// Channels with a larger reduced chi-squared are zapped.
    pub red_chi2_threshold: f64,

    /// Repeat the SNR cut with the shrunken channel count until nothing more
    /// is zapped.
    pub iterate: bool,
}

impl Default for ZapCriteria {
    fn default() -> Self {
        ZapCriteria {
            snr_threshold: DEFAULT_ZAP_SNR_THRESHOLD,
            red_chi2_threshold: DEFAULT_ZAP_RED_CHI2_THRESHOLD,
            iterate: true,
        }
    }
}

/// Channels proposed for zapping in one subintegration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZapProposal {
    pub subint: usize,
    /// Channel indices into the archive, in the order they were marked bad.
    pub channels: Vec<usize>,
}

fn channel_snr_threshold(snr_threshold: f64, num_chans: usize) -> f64 {
    (snr_threshold.powi(2) / num_chans as f64).sqrt()
}

/// Find the channels of a subintegration that should be zapped. `ok_chans`
/// are the channels that were fit; `channel_snrs` and `channel_red_chi2s`
/// are aligned with them.
pub fn channels_to_zap(
    ok_chans: &[usize],
    channel_snrs: ArrayView1<f64>,
    channel_red_chi2s: ArrayView1<f64>,
    criteria: &ZapCriteria,
) -> Vec<usize> {
    let snr_cut = criteria.snr_threshold != 0.0;
    let threshold = channel_snr_threshold(criteria.snr_threshold, ok_chans.len());
    let mut bad: Vec<usize> = ok_chans
        .iter()
        .zip(channel_snrs.iter().zip(channel_red_chi2s.iter()))
        .filter(|(_, (&snr, &red_chi2))| {
            red_chi2 > criteria.red_chi2_threshold
                || red_chi2.is_nan()
                || (snr_cut && snr < threshold)
        })
        .map(|(&chan, _)| chan)
        .collect();

    if criteria.iterate && snr_cut && !bad.is_empty() {
        loop {
            let num_left = ok_chans.len() - bad.len();
            if num_left == 0 {
                break;
            }
            let threshold = channel_snr_threshold(criteria.snr_threshold, num_left);
            let newly_bad: Vec<usize> = ok_chans
                .iter()
                .zip(channel_snrs.iter())
                .filter(|(chan, &snr)| !bad.contains(chan) && snr < threshold)
                .map(|(&chan, _)| chan)
                .collect();
            if newly_bad.is_empty() {
                break;
            }
            bad.extend(newly_bad);
        }
    }
    bad
}
