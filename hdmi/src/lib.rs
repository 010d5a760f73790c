// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Core of an HDMI output fed by a scanout DMA engine.
//!
//! An `HdmiPipeline` ties together the mode resolver (EDID over DDC, or a fallback table), the
//! pixel clock and timing generator sequencing, and the interleaved DMA that streams the
//! framebuffer to the transmitter. The hardware itself is reached through the traits in `hw`.

pub mod edid;
pub mod fakes;
pub mod hw;
pub mod mode;
pub mod modedb;
pub mod parameters;
pub mod pipeline;
pub mod resolver;
pub mod scanout;
pub mod timing;

pub use mode::Mode;
pub use mode::ModeFlags;
pub use mode::ModeStatus;
pub use parameters::HardwareLimits;
pub use pipeline::Commit;
pub use pipeline::DisplayPipe;
pub use pipeline::HdmiPipeline;
pub use pipeline::PipelineState;
pub use resolver::ConnectorStatus;
