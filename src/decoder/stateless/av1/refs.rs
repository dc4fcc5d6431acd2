// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::rc::Rc;

use crate::codec::av1::obu::FrameType;
use crate::codec::av1::obu::NUM_REF_FRAMES;
use crate::codec::av1::state::ResolvedFrameState;
use crate::Resolution;

/// A decoded frame along with the state later frames can inherit from it.
pub struct Av1Frame<S> {
    pub surface: Rc<S>,
    pub state: ResolvedFrameState,
    pub frame_type: FrameType,
    pub spatial_id: u32,
    /// Upscaled width and frame height.
    pub resolution: Resolution,
}

// Not derived, as that would require `S: Clone`.
impl<S> Clone for Av1Frame<S> {
    fn clone(&self) -> Self {
        Self {
            surface: Rc::clone(&self.surface),
            state: self.state.clone(),
            frame_type: self.frame_type,
            spatial_id: self.spatial_id,
            resolution: self.resolution,
        }
    }
}

/// The eight reference slots of the decoder.
///
/// A frame may live in several slots at once. Its surface is released once no slot and no client
/// holds it anymore.
pub struct ReferenceFrames<S> {
    slots: [Option<Av1Frame<S>>; NUM_REF_FRAMES],
}

impl<S> Default for ReferenceFrames<S> {
    fn default() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }
}

impl<S> ReferenceFrames<S> {
    pub fn get(&self, slot: usize) -> Option<&Av1Frame<S>> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Stores `frame` into every slot whose bit is set in `refresh_frame_flags`.
    pub fn update(&mut self, frame: &Av1Frame<S>, refresh_frame_flags: u32) {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if (refresh_frame_flags >> i) & 1 == 1 {
                log::debug!("Replacing reference frame {}", i);
                *slot = Some(frame.clone());
            }
        }
    }

    /// The resolved state of the frame in each slot.
    pub fn resolved_states(&self) -> [Option<&ResolvedFrameState>; NUM_REF_FRAMES] {
        std::array::from_fn(|i| self.slots[i].as_ref().map(|frame| &frame.state))
    }

    pub fn clear(&mut self) {
        self.slots = std::array::from_fn(|_| None);
    }
}
