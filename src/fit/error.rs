// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FitError {
    #[error("The data portrait has shape {data:?} but the template has shape {model:?}")]
    ShapeMismatch {
        data: (usize, usize),
        model: (usize, usize),
    },

    #[error("Expected {expected} channel {what}, but got {got}")]
    ChannelCountMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("There are no channels to fit")]
    NoChannels,

    #[error("Profiles with {0} phase bins have no harmonics to fit")]
    TooFewBins(usize),

    #[error("Channel {chan} has an unusable noise level ({noise})")]
    BadNoise { chan: usize, noise: f64 },

    #[error("The template for channel {chan} has no power")]
    ZeroTemplate { chan: usize },
}
