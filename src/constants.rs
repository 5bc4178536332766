// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Useful constants.

All constants *must* be double precision. Frequencies are in MHz, times are in
seconds, and DMs are in pc cm^-3 unless otherwise noted.
 */

pub use std::f64::consts::{LN_10, PI, TAU};

/// The dispersion constant \[s MHz^2 pc^-1 cm^3\]. This is the conventional
/// pulsar-timing value (1 / 2.41e-4) rather than the one derived from
/// fundamental constants.
pub const DCONST: f64 = 1.0 / 2.41e-4;

/// The number of seconds in a day.
pub const SECONDS_PER_DAY: f64 = 86400.0;

/// The maximum number of archives that may be processed in a single run.
pub const MAX_NUM_ARCHIVES: usize = 999;

/// Archives with more than this many channels with NaN signal-to-noise ratios
/// are skipped.
pub const MAX_NAN_SNR_CHANNELS: usize = 10;

/// The scattering index used when neither a template nor the user supplies
/// one (Kolmogorov-ish thin screen).
pub const SCATTERING_ALPHA: f64 = -4.0;

/// The number of trial phases used by the phase-only cross-correlation search.
pub const NUM_PHASE_TRIALS: usize = 100;

/// The default bounds on the scattering index when using the bounded fitter.
pub const ALPHA_BOUNDS: (f64, f64) = (-10.0, 10.0);

/// The default aggregate signal-to-noise ratio that retained channels should
/// reach when proposing channels to zap.
pub const DEFAULT_ZAP_SNR_THRESHOLD: f64 = 8.0;

/// Channels with reduced chi-squared values above this are proposed for
/// zapping.
pub const DEFAULT_ZAP_RED_CHI2_THRESHOLD: f64 = 1.3;

/// TOAs with an `snr` flag below this aren't written.
pub const DEFAULT_SNR_CUT: f64 = 0.0;
