// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Time-of-arrival records.


use std::fmt::Display;

use hifitime::Epoch;
use indexmap::IndexMap;

use crate::constants::SECONDS_PER_DAY;

/// A single TOA. Records are created once and only changed by the one-DM
/// rewrite.
#[derive(Debug, Clone)]
pub struct Toa {
    /// The archive this TOA came from.
    pub archive: String,

    /// The frequency that the TOA is referenced to \[MHz\]. May be infinite.
    pub frequency: f64,

    pub epoch: Epoch,

    /// \[microseconds\]
    pub error: f64,

    pub telescope: String,
    pub telescope_code: String,

    /// \[pc cm^-3\]
    pub dm: Option<f64>,
    pub dm_error: Option<f64>,

    pub flags: ToaFlags,
}

impl Toa {
    /// The integer and fractional parts of this TOA's MJD (UTC).
    pub fn mjd_parts(&self) -> (i64, f64) {
        mjd_parts(self.epoch)
    }
}

/// Split an epoch into integer and fractional MJD (UTC) without losing
/// sub-microsecond precision.
pub(crate) fn mjd_parts(epoch: Epoch) -> (i64, f64) {
    let mut imjd = epoch.to_mjd_utc_days().floor() as i64;
    let mut seconds = (epoch - Epoch::from_mjd_utc(imjd as f64)).to_seconds();
    if seconds < 0.0 {
        imjd -= 1;
        seconds += SECONDS_PER_DAY;
    } else if seconds >= SECONDS_PER_DAY {
        imjd += 1;
        seconds -= SECONDS_PER_DAY;
    }
    (imjd, seconds / SECONDS_PER_DAY)
}

/// The value of a TOA flag.
#[derive(Debug, Clone, PartialEq)]
pub enum FlagValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

impl Display for FlagValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlagValue::Int(i) => write!(f, "{i}"),
            FlagValue::Float(x) => write!(f, "{x}"),
            FlagValue::Str(s) => write!(f, "{s}"),
            FlagValue::Bool(true) => write!(f, "True"),
            FlagValue::Bool(false) => write!(f, "False"),
        }
    }
}

/// Auxiliary TOA metadata. Every computed flag has a fixed place in the
/// output order; see [`ToaFlags::entries`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToaFlags {
    /// \[pc^2 cm^-6\]
    pub gm: Option<f64>,
    pub gm_err: Option<f64>,
    /// \[microseconds\]
    pub scat_time: Option<f64>,
    /// log10 \[seconds\]
    pub log10_scat_time: Option<f64>,
    pub log10_scat_time_err: Option<f64>,
    /// \[microseconds\]
    pub scat_time_err: Option<f64>,
    /// \[MHz\]
    pub scat_ref_freq: Option<f64>,
    pub scat_ind: Option<f64>,
    pub scat_ind_err: Option<f64>,
    pub backend: String,
    pub frontend: String,
    pub nbin: usize,
    /// The number of channels in the archive.
    pub nch: Option<usize>,
    /// The number of channels used.
    pub nchx: Option<usize>,
    /// \[MHz\]
    pub bw: f64,
    /// \[MHz\]
    pub chbw: Option<f64>,
    pub subint: usize,
    pub chan: Option<usize>,
    /// \[seconds\]
    pub tobs: f64,
    pub fratio: Option<f64>,
    pub template: String,
    pub snr: f64,
    pub phi_dm_cov: Option<f64>,
    /// The reduced chi-squared of the fit.
    pub gof: f64,
    pub phase: Option<f64>,
    pub phase_err: Option<f64>,
    /// \[mJy\]
    pub flux: Option<f64>,
    pub flux_err: Option<f64>,
    pub flux_ref_freq: Option<f64>,
    /// \[degrees\]
    pub par_angle: Option<f64>,
    /// Caller-supplied flags. A key matching a computed flag replaces its
    /// value.
    pub extra: IndexMap<String, String>,
    /// Set by the one-DM rewrite.
    pub dm_mean: bool,
}

impl ToaFlags {
    /// All flags, in output order.
    pub fn entries(&self) -> Vec<(String, FlagValue)> {
        use FlagValue::*;

        let f = |v: Option<f64>| v.map(Float);
        let u = |v: Option<usize>| v.map(|v| Int(v as i64));
        let computed: [(&str, Option<FlagValue>); 31] = [
            ("gm", f(self.gm)),
            ("gm_err", f(self.gm_err)),
            ("scat_time", f(self.scat_time)),
            ("log10_scat_time", f(self.log10_scat_time)),
            ("log10_scat_time_err", f(self.log10_scat_time_err)),
            ("scat_time_err", f(self.scat_time_err)),
            ("scat_ref_freq", f(self.scat_ref_freq)),
            ("scat_ind", f(self.scat_ind)),
            ("scat_ind_err", f(self.scat_ind_err)),
            ("be", Some(Str(self.backend.clone()))),
            ("fe", Some(Str(self.frontend.clone()))),
            ("f", Some(Str(format!("{}_{}", self.frontend, self.backend)))),
            ("nbin", Some(Int(self.nbin as i64))),
            ("nch", u(self.nch)),
            ("nchx", u(self.nchx)),
            ("bw", Some(Float(self.bw))),
            ("chbw", f(self.chbw)),
            ("subint", Some(Int(self.subint as i64))),
            ("chan", u(self.chan)),
            ("tobs", Some(Float(self.tobs))),
            ("fratio", f(self.fratio)),
            ("tmplt", Some(Str(self.template.clone()))),
            ("snr", Some(Float(self.snr))),
            ("phi_DM_cov", f(self.phi_dm_cov)),
            ("gof", Some(Float(self.gof))),
            ("phs", f(self.phase)),
            ("phs_err", f(self.phase_err)),
            ("flux", f(self.flux)),
            ("flux_err", f(self.flux_err)),
            ("flux_ref_freq", f(self.flux_ref_freq)),
            ("par_angle", f(self.par_angle)),
        ];

        let mut entries = Vec::with_capacity(computed.len() + self.extra.len() + 1);
        for (key, value) in computed {
            match (self.extra.get(key), value) {
                (Some(v), _) => entries.push((key.to_string(), Str(v.clone()))),
                (None, Some(v)) => entries.push((key.to_string(), v)),
                (None, None) => (),
            }
        }
        let computed_keys: Vec<&str> = entries.iter().map(|(k, _)| k.as_str()).collect();
        let extras: Vec<(String, FlagValue)> = self
            .extra
            .iter()
            .filter(|(k, _)| !computed_keys.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), Str(v.clone())))
            .collect();
        entries.extend(extras);
        if self.dm_mean {
            entries.push(("DM_mean".to_string(), Bool(true)));
        }
        entries
    }

    /// The SNR as written: a numeric caller-supplied `snr` flag wins over the
    /// computed one.
    pub fn emitted_snr(&self) -> f64 {
        self.extra
            .get("snr")
            .and_then(|v| v.parse().ok())
            .unwrap_or(self.snr)
    }

    /// Is a flag with this key present?
    pub fn contains(&self, key: &str) -> bool {
        self.entries().iter().any(|(k, _)| k == key)
    }
}
