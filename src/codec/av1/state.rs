// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Per-frame state that has to be carried from a reference frame to the frames predicting from
//! it: loop filter deltas, global motion warp models, order hints and film grain parameters.

use anyhow::anyhow;
use anyhow::Context;

use crate::codec::av1::helpers;
use crate::codec::av1::obu::FilmGrainParams;
use crate::codec::av1::obu::FrameHeaderObu;
use crate::codec::av1::obu::ReferenceFrameType;
use crate::codec::av1::obu::SequenceHeaderObu;
use crate::codec::av1::obu::WarpModelType;
use crate::codec::av1::obu::DEFAULT_LOOP_FILTER_REF_DELTAS;
use crate::codec::av1::obu::GM_ABS_ALPHA_BITS;
use crate::codec::av1::obu::GM_ABS_TRANS_BITS;
use crate::codec::av1::obu::GM_ABS_TRANS_ONLY_BITS;
use crate::codec::av1::obu::GM_ALPHA_PREC_BITS;
use crate::codec::av1::obu::GM_TRANS_ONLY_PREC_BITS;
use crate::codec::av1::obu::GM_TRANS_PREC_BITS;
use crate::codec::av1::obu::NUM_REF_FRAMES;
use crate::codec::av1::obu::PRIMARY_REF_NONE;
use crate::codec::av1::obu::REFS_PER_FRAME;
use crate::codec::av1::obu::TOTAL_REFS_PER_FRAME;
use crate::codec::av1::obu::WARPEDMODEL_PREC_BITS;

/// The identity warp matrix.
pub const IDENTITY_GM_PARAMS: [i32; 6] = [
    0,
    0,
    1 << WARPEDMODEL_PREC_BITS,
    0,
    0,
    1 << WARPEDMODEL_PREC_BITS,
];

/// State resolved for a frame, stored alongside it in the reference slots it refreshes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedFrameState {
    pub loop_filter_delta_enabled: bool,
    pub loop_filter_ref_deltas: [i8; TOTAL_REFS_PER_FRAME],
    pub loop_filter_mode_deltas: [i8; 2],
    /// Warp model per reference frame type, INTRA_FRAME included but always identity.
    pub gm_type: [WarpModelType; NUM_REF_FRAMES],
    pub gm_params: [[i32; 6]; NUM_REF_FRAMES],
    pub order_hint: u32,
    /// OrderHints[], the order hint of each LAST_FRAME..ALTREF_FRAME reference.
    pub order_hints: [u32; TOTAL_REFS_PER_FRAME],
    pub ref_frame_sign_bias: [bool; TOTAL_REFS_PER_FRAME],
    /// SkipModeFrame[], if skip mode is allowed for this frame.
    pub skip_mode_frame: Option<[ReferenceFrameType; 2]>,
    /// Film grain to apply on output. `apply_grain` is unset if there is none.
    pub film_grain_params: FilmGrainParams,
}

impl Default for ResolvedFrameState {
    /// The state set by setup_past_independence().
    fn default() -> Self {
        Self {
            loop_filter_delta_enabled: true,
            loop_filter_ref_deltas: DEFAULT_LOOP_FILTER_REF_DELTAS,
            loop_filter_mode_deltas: [0; 2],
            gm_type: [WarpModelType::Identity; NUM_REF_FRAMES],
            gm_params: [IDENTITY_GM_PARAMS; NUM_REF_FRAMES],
            order_hint: 0,
            order_hints: [0; TOTAL_REFS_PER_FRAME],
            ref_frame_sign_bias: [false; TOTAL_REFS_PER_FRAME],
            skip_mode_frame: None,
            film_grain_params: Default::default(),
        }
    }
}

/// Resolves the state of the frame described by `header`.
///
/// `references` holds the state of the frames currently in each reference slot. The slot
/// pointed to by `primary_ref_frame` must not be empty.
pub fn derive_frame_state(
    sequence: &SequenceHeaderObu,
    header: &FrameHeaderObu,
    references: &[Option<&ResolvedFrameState>; NUM_REF_FRAMES],
) -> anyhow::Result<ResolvedFrameState> {
    let primary = primary_reference(header, references)?;

    let mut state = ResolvedFrameState {
        order_hint: header.order_hint,
        ..Default::default()
    };

    if let Some(primary) = primary {
        load_previous_and_update(&mut state, primary, header);
    }

    global_motion_params(&mut state, header, primary);

    if !header.frame_is_intra() {
        order_hint_info(&mut state, sequence, header, references);
        state.skip_mode_frame = skip_mode_params(sequence, header, references);
    }

    state.film_grain_params = load_grain_params(sequence, header, references)?;

    Ok(state)
}

/// The state of the frame in the slot used by `primary_ref_frame`, if any.
fn primary_reference<'a>(
    header: &FrameHeaderObu,
    references: &[Option<&'a ResolvedFrameState>; NUM_REF_FRAMES],
) -> anyhow::Result<Option<&'a ResolvedFrameState>> {
    if header.primary_ref_frame == PRIMARY_REF_NONE {
        return Ok(None);
    }

    let slot = *header
        .ref_frame_idx
        .get(header.primary_ref_frame as usize)
        .ok_or(anyhow!(
            "Invalid primary_ref_frame {}",
            header.primary_ref_frame
        ))?;

    references
        .get(usize::from(slot))
        .copied()
        .flatten()
        .map(Some)
        .ok_or(anyhow!(
            "Primary reference frame {} points to empty slot {}",
            header.primary_ref_frame,
            slot
        ))
}

/// Implements load_previous() for the loop filter deltas, then applies the deltas coded in the
/// frame header.
fn load_previous_and_update(
    state: &mut ResolvedFrameState,
    primary: &ResolvedFrameState,
    header: &FrameHeaderObu,
) {
    let lf = &header.loop_filter_params;

    state.loop_filter_ref_deltas = primary.loop_filter_ref_deltas;
    state.loop_filter_mode_deltas = primary.loop_filter_mode_deltas;

    if lf.loop_filter_delta_update {
        for i in 0..TOTAL_REFS_PER_FRAME {
            if lf.update_ref_delta[i] {
                state.loop_filter_ref_deltas[i] = lf.loop_filter_ref_deltas[i];
            }
        }

        for i in 0..2 {
            if lf.update_mode_delta[i] {
                state.loop_filter_mode_deltas[i] = lf.loop_filter_mode_deltas[i];
            }
        }
    }

    state.loop_filter_delta_enabled = lf.loop_filter_delta_enabled;
}

/// Bit widths used to code one global motion parameter, see 5.9.25.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct GlobalParamPrecision {
    /// Codes lie in `-mx..=mx`.
    pub mx: i32,
    pub prec_diff: u32,
    pub round: i32,
    pub sub: i32,
}

impl GlobalParamPrecision {
    pub fn new(gm_type: WarpModelType, idx: usize, allow_high_precision_mv: bool) -> Self {
        let mut abs_bits = GM_ABS_ALPHA_BITS;
        let mut prec_bits = GM_ALPHA_PREC_BITS;

        if idx < 2 {
            if gm_type == WarpModelType::Translation {
                let hp = u32::from(!allow_high_precision_mv);
                abs_bits = GM_ABS_TRANS_ONLY_BITS - hp;
                prec_bits = GM_TRANS_ONLY_PREC_BITS - hp;
            } else {
                abs_bits = GM_ABS_TRANS_BITS;
                prec_bits = GM_TRANS_PREC_BITS;
            }
        }

        let diagonal = idx % 3 == 2;

        Self {
            mx: 1 << abs_bits,
            prec_diff: WARPEDMODEL_PREC_BITS - prec_bits,
            round: if diagonal { 1 << WARPEDMODEL_PREC_BITS } else { 0 },
            sub: if diagonal { 1 << prec_bits } else { 0 },
        }
    }

    /// The reference the parameter is coded against, given the parameter of the previous frame.
    pub fn reference(&self, prev: i32) -> i32 {
        (prev >> self.prec_diff) - self.sub
    }

    /// Resolves a subexponential code read by decode_subexp().
    pub fn decode(&self, sub_exp: i32, prev: i32) -> i32 {
        let value = helpers::decode_signed_subexp_with_ref(
            sub_exp,
            -self.mx,
            self.mx + 1,
            self.reference(prev),
        );

        (value << self.prec_diff) + self.round
    }
}

/// Implements the derivation side of 5.9.24 and 5.9.25.
fn global_motion_params(
    state: &mut ResolvedFrameState,
    header: &FrameHeaderObu,
    primary: Option<&ResolvedFrameState>,
) {
    if header.frame_is_intra() {
        return;
    }

    let prev_gm_params = match primary {
        Some(primary) => primary.gm_params,
        None => [IDENTITY_GM_PARAMS; NUM_REF_FRAMES],
    };

    let gm = &header.global_motion_params;

    for ref_ in ReferenceFrameType::Last as usize..=ReferenceFrameType::AltRef as usize {
        let gm_type = gm.gm_type(ref_);
        state.gm_type[ref_] = gm_type;

        let read_global_param = |idx: usize| {
            GlobalParamPrecision::new(gm_type, idx, header.allow_high_precision_mv)
                .decode(gm.gm_params[ref_][idx], prev_gm_params[ref_][idx])
        };

        let params = &mut state.gm_params[ref_];

        if gm_type >= WarpModelType::RotZoom {
            params[2] = read_global_param(2);
            params[3] = read_global_param(3);

            if gm_type == WarpModelType::Affine {
                params[4] = read_global_param(4);
                params[5] = read_global_param(5);
            } else {
                params[4] = -params[3];
                params[5] = params[2];
            }
        }

        if gm_type >= WarpModelType::Translation {
            params[0] = read_global_param(0);
            params[1] = read_global_param(1);
        }

        if gm_type != WarpModelType::Identity {
            log::trace!("Global motion for reference {}: {:?} {:?}", ref_, gm_type, params);
        }
    }
}

/// Fills OrderHints[] and RefFrameSignBias[], see 7.20.
fn order_hint_info(
    state: &mut ResolvedFrameState,
    sequence: &SequenceHeaderObu,
    header: &FrameHeaderObu,
    references: &[Option<&ResolvedFrameState>; NUM_REF_FRAMES],
) {
    for i in 0..REFS_PER_FRAME {
        let ref_name = ReferenceFrameType::Last as usize + i;

        let Some(reference) = references
            .get(usize::from(header.ref_frame_idx[i]))
            .copied()
            .flatten()
        else {
            continue;
        };

        state.order_hints[ref_name] = reference.order_hint;

        if sequence.enable_order_hint {
            state.ref_frame_sign_bias[ref_name] = helpers::get_relative_dist(
                sequence.enable_order_hint,
                sequence.order_hint_bits,
                reference.order_hint as i32,
                header.order_hint as i32,
            ) > 0;
        }
    }
}

/// Derives SkipModeFrame[] as in 5.9.22. Returns `None` if skip mode is not allowed.
fn skip_mode_params(
    sequence: &SequenceHeaderObu,
    header: &FrameHeaderObu,
    references: &[Option<&ResolvedFrameState>; NUM_REF_FRAMES],
) -> Option<[ReferenceFrameType; 2]> {
    if header.frame_is_intra() || !header.reference_select || !sequence.enable_order_hint {
        return None;
    }

    let dist = |a: u32, b: u32| {
        helpers::get_relative_dist(
            sequence.enable_order_hint,
            sequence.order_hint_bits,
            a as i32,
            b as i32,
        )
    };

    let mut ref_hints = [0u32; REFS_PER_FRAME];
    for (i, hint) in ref_hints.iter_mut().enumerate() {
        *hint = references
            .get(usize::from(header.ref_frame_idx[i]))
            .copied()
            .flatten()?
            .order_hint;
    }

    let mut forward: Option<(usize, u32)> = None;
    let mut backward: Option<(usize, u32)> = None;

    for (i, &ref_hint) in ref_hints.iter().enumerate() {
        let d = dist(ref_hint, header.order_hint);

        if d < 0 {
            if forward.map_or(true, |(_, hint)| dist(ref_hint, hint) > 0) {
                forward = Some((i, ref_hint));
            }
        } else if d > 0 && backward.map_or(true, |(_, hint)| dist(ref_hint, hint) < 0) {
            backward = Some((i, ref_hint));
        }
    }

    let (forward_idx, forward_hint) = forward?;

    let other_idx = match backward {
        Some((backward_idx, _)) => backward_idx,
        None => {
            let mut second_forward: Option<(usize, u32)> = None;

            for (i, &ref_hint) in ref_hints.iter().enumerate() {
                if dist(ref_hint, forward_hint) < 0
                    && second_forward.map_or(true, |(_, hint)| dist(ref_hint, hint) > 0)
                {
                    second_forward = Some((i, ref_hint));
                }
            }

            second_forward?.0
        }
    };

    let ref_frame = |i: usize| ReferenceFrameType::n(ReferenceFrameType::Last as u32 + i as u32);

    Some([
        ref_frame(forward_idx.min(other_idx))?,
        ref_frame(forward_idx.max(other_idx))?,
    ])
}

/// Implements load_grain_params() as used by 5.9.30.
fn load_grain_params(
    sequence: &SequenceHeaderObu,
    header: &FrameHeaderObu,
    references: &[Option<&ResolvedFrameState>; NUM_REF_FRAMES],
) -> anyhow::Result<FilmGrainParams> {
    let params = &header.film_grain_params;

    if !sequence.film_grain_params_present || !params.apply_grain {
        return Ok(Default::default());
    }

    if params.update_grain {
        return Ok(params.clone());
    }

    let reference = references
        .get(usize::from(params.film_grain_params_ref_idx))
        .copied()
        .flatten()
        .with_context(|| {
            format!(
                "Film grain parameters reference empty slot {}",
                params.film_grain_params_ref_idx
            )
        })?;

    Ok(FilmGrainParams {
        grain_seed: params.grain_seed,
        ..reference.film_grain_params.clone()
    })
}
