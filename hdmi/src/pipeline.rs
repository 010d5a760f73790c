// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The entry points the commit orchestrator drives: mode checks, enable, disable, frame commits and
//! teardown of one HDMI output.
//!
//! The orchestrator serializes calls on a pipeline, so `PipelineState` is not locked. Only vblank
//! event delivery takes a lock, the one shared with the vblank interrupt side.

use std::cmp::Reverse;
use std::sync::Arc;

use base::debug;
use base::info;
use base::warn;
use base::Delay;
use remain::sorted;
use sync::Mutex;
use thiserror::Error;

use crate::hw;
use crate::hw::DdcBus;
use crate::hw::DmaChannel;
use crate::hw::Lookup;
use crate::hw::PendingVblankEvent;
use crate::hw::PixelClock;
use crate::hw::ResourceProvider;
use crate::hw::TimingGenerator;
use crate::hw::VblankEvents;
use crate::mode::Mode;
use crate::mode::ModeStatus;
use crate::parameters::HardwareLimits;
use crate::resolver::ConnectorStatus;
use crate::resolver::ModeResolver;
use crate::scanout;
use crate::scanout::FrameGeometry;
use crate::scanout::PlaneState;
use crate::scanout::ScanoutDescriptor;
use crate::scanout::ScanoutEngine;
use crate::scanout::SCANOUT_CHANNEL;
use crate::timing;
use crate::timing::TimingController;

#[sorted]
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to get pixel clock: {0}")]
    AcquireClock(hw::Error),
    #[error("failed to request {name} DMA channel: {source}")]
    AcquireDma {
        name: &'static str,
        source: hw::Error,
    },
    #[error("mode not supported: {0}")]
    BadMode(String),
    #[error("plane does not fit the mode: {0}")]
    PlaneOutsideMode(String),
    #[error("{0} is referenced but not registered yet")]
    ProbeDefer(&'static str),
    #[error("failed to enable timing: {0}")]
    Timing(timing::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Run time state of one output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineState {
    pub(crate) clock_enabled: bool,
    pub(crate) active_mode: Option<Mode>,
    pub(crate) dma_in_flight: bool,
}

impl PipelineState {
    pub fn clock_enabled(&self) -> bool {
        self.clock_enabled
    }

    pub fn active_mode(&self) -> Option<&Mode> {
        self.active_mode.as_ref()
    }

    pub fn dma_in_flight(&self) -> bool {
        self.dma_in_flight
    }

    pub fn is_active(&self) -> bool {
        self.clock_enabled && self.active_mode.is_some()
    }
}

/// What one atomic commit asks of the pipeline.
#[derive(Debug, Default)]
pub struct Commit {
    /// The mode the CRTC will run. `None` keeps the current one.
    pub mode: Option<Mode>,
    pub plane: PlaneState,
    /// Signalled once the commit has been handed to the hardware.
    pub event: Option<PendingVblankEvent>,
}

/// Hooks of a single plane, single CRTC display pipe.
pub trait DisplayPipe {
    fn mode_valid(&self, mode: &Mode) -> ModeStatus;
    /// Rejects commits the hardware cannot show. Changes nothing.
    fn atomic_check(&self, commit: &Commit) -> Result<()>;
    /// Blocks for one frame period once the link is up.
    fn on_enable(&mut self, mode: &Mode) -> Result<()>;
    fn on_disable(&mut self);
    fn on_mode_set(&mut self, mode: &Mode) -> Result<()>;
    /// Points scanout at the commit's plane and delivers its vblank event, whatever the outcome.
    fn on_frame_commit(&mut self, commit: &mut Commit) -> scanout::Result<ScanoutDescriptor>;
    fn destroy(&mut self);
}

/// Hardware handles of one output.
///
/// Declared in reverse acquisition order so an unused set is released ddc first, clock last.
pub struct Resources {
    pub ddc: Option<Box<dyn DdcBus>>,
    pub vtc: Option<Box<dyn TimingGenerator>>,
    pub dma: Box<dyn DmaChannel>,
    pub clock: Box<dyn PixelClock>,
}

pub struct HdmiPipeline {
    state: PipelineState,
    resolver: ModeResolver,
    scanout: ScanoutEngine,
    timing: TimingController,
    events: Arc<Mutex<dyn VblankEvents>>,
    modes: Vec<Mode>,
}

impl HdmiPipeline {
    pub fn new(
        resources: Resources,
        limits: HardwareLimits,
        events: Arc<Mutex<dyn VblankEvents>>,
        delay: Arc<dyn Delay>,
    ) -> HdmiPipeline {
        let Resources {
            ddc,
            vtc,
            dma,
            clock,
        } = resources;
        HdmiPipeline {
            state: PipelineState::default(),
            resolver: ModeResolver::new(limits, ddc),
            scanout: ScanoutEngine::new(dma),
            timing: TimingController::new(clock, vtc, delay),
            events,
            modes: Vec::new(),
        }
    }

    /// Acquires the output's hardware and builds the pipeline.
    ///
    /// The pixel clock and the scanout DMA channel are required. The timing generator and the DDC
    /// bus are optional: when the hardware description does not reference them the pipeline runs
    /// without them, but a referenced one that is not registered yet defers the whole probe. On
    /// failure the handles acquired so far are released, newest first.
    pub fn probe(
        provider: &mut dyn ResourceProvider,
        limits: HardwareLimits,
        events: Arc<Mutex<dyn VblankEvents>>,
        delay: Arc<dyn Delay>,
    ) -> Result<HdmiPipeline> {
        let clock = provider.clock().map_err(Error::AcquireClock)?;
        let dma = provider
            .dma_channel(SCANOUT_CHANNEL)
            .map_err(|source| Error::AcquireDma {
                name: SCANOUT_CHANNEL,
                source,
            })?;
        let vtc = match provider.timing_generator() {
            Lookup::Found(vtc) => Some(vtc),
            Lookup::Absent => {
                warn!("no timing generator, using the transmitter's free running timing");
                None
            }
            Lookup::NotReady => return Err(Error::ProbeDefer("timing generator")),
        };
        let ddc = match provider.ddc_bus() {
            Lookup::Found(ddc) => Some(ddc),
            Lookup::Absent => {
                warn!("no DDC bus, offering modes up to {}x{}", limits.max_h, limits.max_v);
                None
            }
            Lookup::NotReady => return Err(Error::ProbeDefer("DDC bus")),
        };

        info!(
            "probed HDMI output: timing generator {}, DDC {}, limits {:?}",
            vtc.is_some(),
            ddc.is_some(),
            limits
        );
        Ok(HdmiPipeline::new(
            Resources {
                ddc,
                vtc,
                dma,
                clock,
            },
            limits,
            events,
            delay,
        ))
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn limits(&self) -> &HardwareLimits {
        self.resolver.limits()
    }

    /// Modes found by the last `fill_modes`.
    pub fn modes(&self) -> &[Mode] {
        &self.modes
    }

    /// Refreshes the connector's mode list: every enumerated mode that passes `mode_valid`,
    /// preferred first, then largest and fastest first.
    ///
    /// A sink that has a DDC bus but reports nothing usable gets the fallback list.
    pub fn fill_modes(&mut self) -> &[Mode] {
        let mut modes = self.resolver.enumerate_modes();
        if modes.is_empty() && self.resolver.has_ddc() {
            warn!("no modes from EDID, offering the fallback list");
            modes = self.resolver.fallback_modes();
        }
        modes.retain(|m| self.resolver.validate(m) == ModeStatus::Ok);
        modes.sort_by_key(|m| {
            (
                !m.preferred,
                Reverse(m.hdisplay * m.vdisplay),
                Reverse(m.vrefresh()),
            )
        });
        debug!("{} usable modes", modes.len());
        self.modes = modes;
        &self.modes
    }

    pub fn detect(&mut self) -> ConnectorStatus {
        self.resolver.detect()
    }

    // A mode the transmitter cannot drive never reaches the clock or the generator.
    fn check_mode(&self, mode: &Mode) -> Result<()> {
        match self.resolver.validate(mode) {
            ModeStatus::Ok => Ok(()),
            ModeStatus::Bad => Err(Error::BadMode(mode.to_string())),
        }
    }
}

impl DisplayPipe for HdmiPipeline {
    fn mode_valid(&self, mode: &Mode) -> ModeStatus {
        self.resolver.validate(mode)
    }

    fn atomic_check(&self, commit: &Commit) -> Result<()> {
        if let Some(mode) = &commit.mode {
            self.check_mode(mode)?;
        }
        let mode = match commit.mode.as_ref().or(self.state.active_mode.as_ref()) {
            Some(mode) => mode,
            None => return Ok(()),
        };
        if let Some(geometry) = FrameGeometry::from_plane(&commit.plane) {
            if geometry.crtc_w > mode.hdisplay || geometry.crtc_h > mode.vdisplay {
                return Err(Error::PlaneOutsideMode(format!(
                    "{}x{} plane, {} mode",
                    geometry.crtc_w,
                    geometry.crtc_h,
                    mode.name()
                )));
            }
            if (geometry.src_stride_bytes as u64) < geometry.row_bytes() {
                return Err(Error::PlaneOutsideMode(format!(
                    "stride {} shorter than {} byte row",
                    geometry.src_stride_bytes,
                    geometry.row_bytes()
                )));
            }
        }
        Ok(())
    }

    fn on_enable(&mut self, mode: &Mode) -> Result<()> {
        self.check_mode(mode)?;
        self.timing
            .enable(&mut self.state, mode)
            .map_err(Error::Timing)
    }

    fn on_disable(&mut self) {
        self.timing.disable(&mut self.state);
        self.scanout.terminate(&mut self.state);
    }

    fn on_mode_set(&mut self, mode: &Mode) -> Result<()> {
        self.check_mode(mode)?;
        self.timing
            .set_mode(&mut self.state, mode)
            .map_err(Error::Timing)
    }

    fn on_frame_commit(&mut self, commit: &mut Commit) -> scanout::Result<ScanoutDescriptor> {
        let result = self.scanout.update(&mut self.state, &commit.plane);
        if let Err(e) = &result {
            debug!("frame not queued: {}", e);
        }
        if let Some(event) = commit.event.take() {
            self.events.lock().send_vblank_event(event);
        }
        result
    }

    fn destroy(&mut self) {
        self.scanout.destroy();
    }
}

impl Drop for HdmiPipeline {
    fn drop(&mut self) {
        self.on_disable();
        self.destroy();
    }
}
