// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error type for all wbtoas-related errors. This should be the *only* error
//! enum that is publicly visible.

use thiserror::Error;

use super::toas::ToaArgsError;
use crate::{
    io::{read::ArchiveReadError, write::TimWriteError},
    pipeline::ToaRunError,
    template::TemplateError,
};

/// The *only* publicly visible error from wbtoas. Each variant carries an
/// already-formatted message.
#[derive(Error, Debug)]
pub enum WbtoasError {
    /// Required arguments are missing; the message includes the usage string.
    #[error("{0}")]
    Usage(String),

    /// An error related to turning arguments into TOA parameters.
    #[error("{0}")]
    ToaArgs(String),

    /// An error that ended a run of the TOA pipeline.
    #[error("{0}")]
    Toas(String),

    /// An error related to reading archives or data-file lists.
    #[error("{0}\n\nArchives are expected to be wbtoas JSON portraits.")]
    ArchiveRead(String),

    /// An error related to reading templates.
    #[error("{0}\n\nTemplates are either .gmodel text files or JSON portraits.")]
    Template(String),

    /// An error related to writing TOAs.
    #[error("{0}")]
    TimWrite(String),

    /// An error related to argument files.
    #[error("{0}")]
    ArgFile(String),

    /// A generic error that can't be clarified further, e.g. IO errors.
    #[error("{0}")]
    Generic(String),
}

// When changing the error propagation below, ensure `Self::from(e)` uses the
// correct `e`!

impl From<ToaArgsError> for WbtoasError {
    fn from(e: ToaArgsError) -> Self {
        match e {
            ToaArgsError::NoData | ToaArgsError::NoModel => Self::Usage(e.to_string()),
            ToaArgsError::ArchiveRead(e) => Self::from(e),
            ToaArgsError::Template(e) => Self::from(e),
            ToaArgsError::IO(e) => Self::from(e),
            _ => Self::ToaArgs(e.to_string()),
        }
    }
}

impl From<ToaRunError> for WbtoasError {
    fn from(e: ToaRunError) -> Self {
        match e {
            ToaRunError::TooManyArchives { .. } => Self::Toas(e.to_string()),
            ToaRunError::Write(e) => Self::from(e),
            ToaRunError::IO(e) => Self::from(e),
        }
    }
}

impl From<ArchiveReadError> for WbtoasError {
    fn from(e: ArchiveReadError) -> Self {
        Self::ArchiveRead(e.to_string())
    }
}

impl From<TemplateError> for WbtoasError {
    fn from(e: TemplateError) -> Self {
        Self::Template(e.to_string())
    }
}

impl From<TimWriteError> for WbtoasError {
    fn from(e: TimWriteError) -> Self {
        Self::TimWrite(e.to_string())
    }
}

impl From<std::io::Error> for WbtoasError {
    fn from(e: std::io::Error) -> Self {
        Self::Generic(e.to_string())
    }
}
