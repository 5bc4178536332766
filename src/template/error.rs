// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors from reading templates or generating template portraits.

use std::path::PathBuf;

use thiserror::Error;

use crate::io::read::ArchiveReadError;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Supplied template path {0} does not exist or is not readable!")]
    BadFile(PathBuf),

    #[error("Template line {line_num}: couldn't parse '{string}' as a number")]
    ParseFloat { line_num: u32, string: String },

    #[error("Template line {line_num}: expected {expected} values after {key}, got {got}")]
    IncompleteLine {
        line_num: u32,
        key: String,
        expected: usize,
        got: usize,
    },

    #[error("Template line {line_num}: unrecognised key '{key}'")]
    UnknownKey { line_num: u32, key: String },

    #[error("Template CODE '{0}' is invalid; expected three digits, each 0 (power law) or 1 (linear)")]
    BadCode(String),

    #[error("Template has no {0} line")]
    MissingKey(&'static str),

    #[error("Template has no Gaussian components")]
    NoComponents,

    #[error("Template has {template} phase bins, but the data have {data}")]
    NbinMismatch { template: usize, data: usize },

    #[error("Template has {template} channels, but the data have {data}")]
    NchanMismatch { template: usize, data: usize },

    #[error(transparent)]
    Archive(#[from] ArchiveReadError),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
