// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Wideband pulse times-of-arrival (TOAs) and interstellar-medium parameters from
frequency-resolved pulsar observations.

Each subintegration of an archive is fit against a reference template portrait
for phase, dispersion measure (DM), a nu^-4 delay term (GM) and a scattering
timescale and index. The results are turned into TOA records which are written
out in `tempo2`-friendly formats.
 */

mod cli;
pub mod constants;
pub mod context;
pub mod fit;
pub mod io;
pub(crate) mod math;
pub mod pipeline;
pub mod scattering;
pub mod template;
pub mod toa;

#[cfg(test)]
pub(crate) mod tests;

// Re-exports.
pub use cli::{Wbtoas, WbtoasError};
pub use context::{Observation, Subint};
pub use fit::{FitEngine, FitMask, FitMethod, FitResult, PortraitFitter};
pub use io::{
    read::{ArchiveRead, JsonArchiveReader, LoadOptions},
    write::{write_toas, TimFormat, TimOptions},
};
pub use pipeline::{process_archive, ToaAccumulator, ToaOptions, ToaOutput, ToaParams};
pub use template::{TemplateDefaults, TemplateProvider};
pub use toa::{Toa, ToaFlags};

use crossbeam_utils::atomic::AtomicCell;

pub(crate) use num_complex::Complex64 as c64;

/// Should progress bars be drawn? This is switched on by the binary unless the
/// user asks for no progress bars.
pub static PROGRESS_BARS: AtomicCell<bool> = AtomicCell::new(false);
