// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Stateless decoders.
//!
//! Stateless here refers to the backend API targeted by these decoders. The decoders themselves do
//! hold the decoding state so the backend doesn't need to.
//!
//! The [`StatelessDecoder`] struct is the basis of all stateless decoders. It is created by
//! combining a codec to a backend, after which parsed bitstream units can be submitted through the
//! codec-specific `decode` method.

pub mod av1;

use thiserror::Error;

use crate::decoder::DecoderConfig;
use crate::decoder::DecoderEvent;
use crate::decoder::EventQueue;
use crate::DecodedFormat;
use crate::Resolution;

/// Error returned by stateless backend methods.
#[derive(Error, Debug)]
pub enum StatelessBackendError {
    #[error("not enough resources to proceed with the operation now")]
    OutOfResources,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type returned by stateless backend methods.
pub type StatelessBackendResult<T> = Result<T, StatelessBackendError>;

/// Decoder implementations can use this struct to represent their decoding state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum DecodingState {
    /// Decoder will refuse all frames until format and resolution information passes by.
    #[default]
    AwaitingStreamInfo,
    /// Decoder is currently decoding input.
    Decoding,
    /// Decoder has been reset after a flush, and can resume with the current parameters after
    /// seeing a key frame.
    Reset,
    /// The stream requires a format the backend cannot decode into.
    Unsupported(DecodedFormat),
}

/// Error returned by the `decode` method of stateless decoders.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("not enough output buffers available to continue, need {0} more")]
    NotEnoughOutputBuffers(usize),
    #[error("failed to parse frame: {0}")]
    ParseFrameError(String),
    #[error("unsupported stream: {0}")]
    UnsupportedStream(String),
    #[error("the hardware cannot decode into {0:?}")]
    NoHardwareSupport(DecodedFormat),
    #[error(transparent)]
    DecoderError(#[from] anyhow::Error),
    #[error(transparent)]
    BackendError(#[from] StatelessBackendError),
}

/// Common trait shared by all stateless video decoder backends, providing codec-independent
/// methods.
pub trait StatelessDecoderBackend {
    /// Memory the decoded frames are written into. Surfaces are provided by the client when a
    /// frame starts, and are kept alive by the decoder for as long as they serve as reference.
    type Surface;

    /// Returns whether the hardware can produce frames in `format`.
    fn supports_format(&self, format: DecodedFormat) -> bool;
}

pub trait StatelessCodec {
    /// State that needs to be kept during a decoding operation, typed by backend.
    type DecoderState<B: StatelessDecoderBackend>;
}

/// A struct that serves as a basis to implement a stateless decoder.
///
/// A stateless decoder is defined by two generic parameters:
///
/// * A codec, represented by a type that implements [`StatelessCodec`]. This type defines the
/// codec-specific decoder state and other codec properties.
/// * A backend, i.e. an interface to talk to the hardware that accelerates decoding.
///
/// This struct just manages the high-level decoder state as well as the queue of pending events.
/// All the rest is left to codec-specific code.
pub struct StatelessDecoder<C, B>
where
    C: StatelessCodec,
    B: StatelessDecoderBackend,
{
    config: DecoderConfig,

    /// The current coded resolution
    coded_resolution: Resolution,

    event_queue: EventQueue<DecoderEvent<B::Surface>>,

    decoding_state: DecodingState,

    /// The backend used for hardware acceleration.
    backend: B,

    /// Codec-specific state.
    codec: C::DecoderState<B>,
}

impl<C, B> StatelessDecoder<C, B>
where
    C: StatelessCodec,
    B: StatelessDecoderBackend,
    C::DecoderState<B>: Default,
{
    pub fn new(backend: B, config: DecoderConfig) -> Self {
        Self {
            config,
            backend,
            coded_resolution: Default::default(),
            decoding_state: Default::default(),
            event_queue: Default::default(),
            codec: Default::default(),
        }
    }
}

impl<C, B> StatelessDecoder<C, B>
where
    C: StatelessCodec,
    B: StatelessDecoderBackend,
{
    /// Returns the next event, if there is any pending.
    pub fn next_event(&mut self) -> Option<DecoderEvent<B::Surface>> {
        (&mut self.event_queue).next()
    }

    /// Number of events waiting to be retrieved with [`StatelessDecoder::next_event`].
    pub fn num_pending_events(&self) -> usize {
        self.event_queue.len()
    }

    /// Largest frame size of the current stream, or zero if no stream information has been seen
    /// yet.
    pub fn coded_resolution(&self) -> Resolution {
        self.coded_resolution
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}
