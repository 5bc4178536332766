// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Code to write TOAs (.tim files).

mod error;

pub use error::TimWriteError;

use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::Path,
};

use indexmap::IndexMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

use crate::toa::Toa;

#[derive(Debug, Display, EnumIter, EnumString, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
/// All supported TOA formats.
pub enum TimFormat {
    /// tempo2 "FORMAT 1" lines with flags.
    #[strum(serialize = "ipta")]
    #[serde(rename = "ipta")]
    Ipta,

    /// Fixed-column tempo lines.
    #[strum(serialize = "princeton")]
    #[serde(rename = "princeton")]
    Princeton,
}

lazy_static::lazy_static! {
    pub(crate) static ref TIM_FORMATS: String = TimFormat::iter().join(", ");
}

/// How TOAs should be written.
#[derive(Debug, Clone, Copy)]
pub struct TimOptions {
    pub format: TimFormat,

    /// TOAs with an `snr` flag below this aren't written.
    pub snr_cut: f64,

    /// Write the "FORMAT 1" line before IPTA TOAs.
    pub header: bool,
}

/// Open a file for appending. The returned flag says whether the file is
/// empty (i.e. a header should be written).
pub fn open_for_append(path: &Path) -> Result<(BufWriter<File>, bool), TimWriteError> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| TimWriteError::Open {
            path: path.to_path_buf(),
            err,
        })?;
    let empty = file.metadata()?.len() == 0;
    Ok((BufWriter::new(file), empty))
}

/// The MJD of a TOA as text with 15 decimal places.
fn format_mjd(toa: &Toa, decimals: usize) -> (i64, String) {
    let (mut imjd, fmjd) = toa.mjd_parts();
    let mut frac = format!("{fmjd:.decimals$}");
    // Rounding may carry into the integer part.
    if frac.starts_with('1') {
        imjd += 1;
        frac = format!("{:.decimals$}", 0.0);
    }
    (imjd, frac[1..].to_string())
}

/// Infinite frequencies are written as 0, following tempo convention.
fn tim_frequency(freq: f64) -> f64 {
    if freq.is_finite() {
        freq
    } else {
        0.0
    }
}

fn ipta_line(toa: &Toa) -> String {
    let (imjd, frac) = format_mjd(toa, 15);
    let mut line = format!(
        "{} {:.8} {imjd}{frac} {:.3} {}",
        toa.archive,
        tim_frequency(toa.frequency),
        toa.error,
        toa.telescope_code
    );
    if let Some(dm) = toa.dm {
        line.push_str(&format!(" -pp_dm {dm:.7}"));
    }
    if let Some(dme) = toa.dm_error {
        line.push_str(&format!(" -pp_dme {dme:.7}"));
    }
    for (key, value) in toa.flags.entries() {
        line.push_str(&format!(" -{key} {value}"));
    }
    line
}

fn princeton_line(toa: &Toa, dm_offset: f64) -> String {
    let (imjd, frac) = format_mjd(toa, 14);
    // Columns: 1 site, 16-24 frequency, 25-44 TOA (decimal point in column
    // 30), 45-53 error, 69-78 DM offset.
    format!(
        "{:<1}{:14}{:>9.3}{:>5}{}{:>9.2}{:15}{:>10.5}",
        toa.telescope_code,
        "",
        tim_frequency(toa.frequency),
        imjd,
        frac,
        toa.error,
        "",
        dm_offset
    )
}

/// Write TOAs. `dm0s` holds the reference DM of each archive; Princeton lines
/// carry DM offsets from it. If `dm_errfile` is given, the DM uncertainty of
/// each written TOA that has one is written to it, one per line. Returns the
/// number of TOAs written.
pub fn write_toas<W: Write>(
    toas: &[Toa],
    dm0s: &IndexMap<String, f64>,
    writer: &mut W,
    mut dm_errfile: Option<&mut dyn Write>,
    options: &TimOptions,
) -> Result<usize, TimWriteError> {
    if options.header && options.format == TimFormat::Ipta {
        writeln!(writer, "FORMAT 1")?;
    }
    // A zero cut keeps everything, including NaN SNRs.
    let keep = |t: &&Toa| options.snr_cut == 0.0 || t.flags.emitted_snr() >= options.snr_cut;
    let mut num_written = 0;
    for toa in toas.iter().filter(keep) {
        match options.format {
            TimFormat::Ipta => writeln!(writer, "{}", ipta_line(toa))?,
            TimFormat::Princeton => {
                let dm_offset = match (toa.dm, dm0s.get(&toa.archive)) {
                    (Some(dm), Some(dm0)) => dm - dm0,
                    _ => 0.0,
                };
                writeln!(writer, "{}", princeton_line(toa, dm_offset))?
            }
        }
        if let (Some(errfile), Some(dme)) = (dm_errfile.as_mut(), toa.dm_error) {
            writeln!(errfile, "{dme:.7}")?;
        }
        num_written += 1;
    }
    writer.flush()?;
    Ok(num_written)
}
