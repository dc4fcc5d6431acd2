// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

pub mod helpers;
pub mod obu;
pub mod reader;
pub mod state;
pub mod synthesizer;
pub mod tiles;
pub mod writer;
