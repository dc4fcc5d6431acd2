// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Encoder-side counterpart of the decoder state machine: produces the frame header syntax
//! elements a decoder resolves back into the intended state.

pub mod av1;

use thiserror::Error;

use crate::codec::av1::synthesizer::SynthesizerError;

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("unsupported")]
    Unsupported,
    #[error("invalid encoder configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid internal state. This is likely a bug.")]
    InvalidInternalState,
    #[error(transparent)]
    SynthesizerError(#[from] SynthesizerError),
}

pub type EncodeResult<T> = Result<T, EncodeError>;
