// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Reasons why parts of the pipeline give up. None of these are fatal to a
//! run; the unit of work concerned is skipped.

use thiserror::Error;

use crate::{fit::FitError, io::read::ArchiveReadError, template::TemplateError};

/// Why a subintegration (or narrowband channel) produced no TOA.
#[derive(Error, Debug)]
pub enum SubintError {
    #[error(transparent)]
    Fit(#[from] FitError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("Fit returned a {got}x{got} covariance matrix but {expected} parameters were free")]
    CovarianceShape { expected: usize, got: usize },
}

/// Why a whole archive was skipped.
#[derive(Error, Debug)]
pub enum ArchiveSkip {
    #[error("Cannot load archive: {0}")]
    Unloadable(#[from] ArchiveReadError),

    #[error("Profile has a NaN or zero SNR")]
    ZeroSnr,

    #[error("{count} frequency channels have a NaN SNR")]
    TooManyNanChannels { count: usize },

    #[error("No subintegrations to fit")]
    NoGoodSubints,

    #[error("Template doesn't match the data: {0}")]
    TemplateMismatch(#[from] TemplateError),
}

/// Errors that end a run.
#[derive(Error, Debug)]
pub enum ToaRunError {
    #[error("{num} archives were given, but at most {max} can be processed in one run")]
    TooManyArchives { num: usize, max: usize },

    #[error(transparent)]
    Write(#[from] crate::io::write::TimWriteError),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
