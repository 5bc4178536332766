// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Archive-level results and the run-wide collection of TOAs.

use std::time::Duration;

use indexmap::IndexMap;
use log::debug;

use super::{ArchiveOutcome, ZapProposal};
use crate::toa::Toa;

/// The weighted-mean DM offset (from DM0) of an archive's subintegrations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeltaDmSummary {
    /// \[pc cm^-3\]
    pub mean: f64,
    pub err: f64,
    /// The reduced chi-squared of the offsets about their mean, which the
    /// variance has been multiplied by. This is 1 for a single offset.
    pub inflation: f64,
}

/// Combine per-subintegration DMs into a single offset from `dm0`. Offsets
/// are weighted by their inverse variances if every uncertainty is nonzero,
/// otherwise they're weighted equally. With more than one offset, the
/// variance of the mean is inflated by the reduced chi-squared of the
/// offsets. Returns `None` if there are no DMs.
pub fn aggregate_delta_dm(dms: &[f64], dm_errs: &[f64], dm0: f64) -> Option<DeltaDmSummary> {
    if dms.is_empty() {
        return None;
    }
    let delta_dms: Vec<f64> = dms.iter().map(|dm| dm - dm0).collect();
    let weights: Vec<f64> = if dm_errs.iter().all(|&e| e != 0.0) {
        dm_errs.iter().map(|e| e.powi(-2)).collect()
    } else {
        vec![1.0; dms.len()]
    };
    let sum_w: f64 = weights.iter().sum();
    let mean = delta_dms
        .iter()
        .zip(weights.iter())
        .map(|(d, w)| d * w)
        .sum::<f64>()
        / sum_w;
    let mut var = sum_w.recip();
    let inflation = if delta_dms.len() > 1 {
        delta_dms
            .iter()
            .zip(weights.iter())
            .map(|(d, w)| (d - mean).powi(2) * w)
            .sum::<f64>()
            / (delta_dms.len() - 1) as f64
    } else {
        1.0
    };
    var *= inflation;
    Some(DeltaDmSummary {
        mean,
        err: var.sqrt(),
        inflation,
    })
}

/// What the accumulator keeps about each archive.
#[derive(Debug, Clone)]
pub struct ArchiveSummary {
    /// The reference DM of the archive \[pc cm^-3\].
    pub dm0: f64,
    pub delta_dm: Option<DeltaDmSummary>,
    pub zap: Vec<ZapProposal>,
}

/// All TOAs of a run, in the order they were made, plus the summaries of the
/// archives they came from. Records are only appended.
#[derive(Debug, Default)]
pub struct ToaAccumulator {
    toas: Vec<Toa>,
    archives: IndexMap<String, ArchiveSummary>,
    fit_duration: Duration,
}

impl ToaAccumulator {
    pub fn new() -> ToaAccumulator {
        ToaAccumulator::default()
    }

    /// Take the results of an archive.
    pub fn merge(&mut self, outcome: ArchiveOutcome) {
        debug!(
            "Adding {} TOAs from {}",
            outcome.toas.len(),
            outcome.archive
        );
        self.toas.extend(outcome.toas);
        self.fit_duration += outcome.fit_duration;
        self.archives.insert(
            outcome.archive,
            ArchiveSummary {
                dm0: outcome.dm0,
                delta_dm: outcome.delta_dm,
                zap: outcome.zap,
            },
        );
    }

    pub fn toas(&self) -> &[Toa] {
        &self.toas
    }

    pub fn len(&self) -> usize {
        self.toas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.toas.is_empty()
    }

    pub fn archives(&self) -> &IndexMap<String, ArchiveSummary> {
        &self.archives
    }

    /// The reference DM of each archive.
    pub fn dm0s(&self) -> IndexMap<String, f64> {
        self.archives
            .iter()
            .map(|(name, summary)| (name.clone(), summary.dm0))
            .collect()
    }

    /// The total time spent fitting.
    pub fn fit_duration(&self) -> Duration {
        self.fit_duration
    }

    /// Copies of the TOAs with each archive's DM replaced by its mean
    /// (DM0 plus the mean offset) and flagged with `DM_mean`. TOAs from
    /// archives without a DM summary are unchanged.
    pub fn one_dm_toas(&self) -> Vec<Toa> {
        self.toas
            .iter()
            .cloned()
            .map(|mut toa| {
                if let Some(ArchiveSummary {
                    dm0,
                    delta_dm: Some(delta_dm),
                    ..
                }) = self.archives.get(&toa.archive)
                {
                    toa.dm = Some(delta_dm.mean + dm0);
                    toa.dm_error = Some(delta_dm.err);
                    toa.flags.dm_mean = true;
                }
                toa
            })
            .collect()
    }
}
