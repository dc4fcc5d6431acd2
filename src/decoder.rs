// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

pub mod stateless;

use std::collections::VecDeque;
use std::rc::Rc;

use crate::codec::av1::obu::SequenceHeaderObu;
use crate::DecodedFormat;
use crate::Resolution;

/// Parameters of the stream currently being decoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamInfo {
    /// The sequence header the parameters are derived from.
    pub sequence: Rc<SequenceHeaderObu>,
    /// Format of the decoded frames.
    pub format: DecodedFormat,
    /// Largest frame size in the sequence.
    pub coded_resolution: Resolution,
}

/// A decoded frame, ready to be displayed.
pub struct DecodedFrame<S> {
    /// Surface holding the decoded pixels. The decoder may keep it as a reference.
    pub surface: Rc<S>,
    /// Presentation timestamp of the packet that triggered the output.
    pub pts: u64,
    /// Decode timestamp of the packet that triggered the output.
    pub dts: u64,
    pub spatial_id: u32,
    pub resolution: Resolution,
}

impl<S> std::fmt::Debug for DecodedFrame<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedFrame")
            .field("pts", &self.pts)
            .field("dts", &self.dts)
            .field("spatial_id", &self.spatial_id)
            .field("resolution", &self.resolution)
            .finish()
    }
}

/// Events that can be retrieved using the `next_event` method of a decoder.
#[derive(Debug)]
pub enum DecoderEvent<S> {
    /// The next frame has been decoded.
    FrameReady(DecodedFrame<S>),
    /// The format of the stream has changed. Frames emitted after this event use the new format.
    FormatChanged(StreamInfo),
}

/// Decoder-wide settings.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DecoderConfig {
    /// Operating point to decode, for streams with several of them. Out of range values select
    /// the last operating point of the stream.
    pub operating_point: usize,
}

/// A queue where events wait until the client retrieves them.
struct EventQueue<T> {
    queue: VecDeque<T>,
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        Self {
            queue: Default::default(),
        }
    }
}

impl<T> EventQueue<T> {
    /// Push `event` to the back of the queue.
    fn push(&mut self, event: T) {
        self.queue.push_back(event)
    }

    fn len(&self) -> usize {
        self.queue.len()
    }
}

/// Allows us to manipulate the event list like an iterator without consuming it.
impl<'a, T> Iterator for &'a mut EventQueue<T> {
    type Item = T;

    /// Returns the next event (if any) waiting to be dequeued.
    fn next(&mut self) -> Option<T> {
        self.queue.pop_front()
    }
}
