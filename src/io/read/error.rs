// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors from reading archives.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiveReadError {
    #[error("Supplied file path {0} does not exist or is not readable!")]
    BadFile(PathBuf),

    #[error("Couldn't parse archive {file}: {details}")]
    Parse { file: String, details: String },

    #[error("Archive {file}: subint {subint} has {got} {what}, but the header says {expected}")]
    BadShape {
        file: String,
        subint: usize,
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Archive {file} has no subintegrations")]
    NoSubints { file: String },

    #[error("Data-file list {0} doesn't name any archives")]
    EmptyFileList(PathBuf),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
