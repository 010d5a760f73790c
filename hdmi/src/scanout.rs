// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Streams the visible part of the framebuffer to the transmitter.
//!
//! The DMA engine reads one chunk per scanline, `crtc_w * cpp` bytes long, and skips the rest of
//! the stride before the next one. The destination is the transmitter's pixel FIFO, so it is never
//! incremented. Every update cancels whatever is on the channel before submitting the new frame,
//! so the channel never holds two transfers for this pipeline.

use base::debug;
use base::error;
use base::warn;
use remain::sorted;
use thiserror::Error;

use crate::hw;
use crate::hw::Cookie;
use crate::hw::DmaChannel;
use crate::hw::InterleavedTemplate;
use crate::hw::PrepFlags;
use crate::hw::TransferDirection;
use crate::pipeline::PipelineState;

/// Name of the DMA channel feeding the transmitter.
pub const SCANOUT_CHANNEL: &str = "video";

#[sorted]
#[derive(Error, Debug)]
pub enum Error {
    #[error("scanout engine has been destroyed")]
    Detached,
    #[error("pipeline is not enabled")]
    Inactive,
    #[error("stride of {stride} bytes is shorter than a {row} byte row")]
    InvalidStride { stride: u32, row: u64 },
    #[error("plane has no CRTC or no framebuffer")]
    NoTarget,
    #[error("{width}x{height} plane does not fit the {hdisplay}x{vdisplay} mode")]
    PlaneExceedsMode {
        width: u32,
        height: u32,
        hdisplay: u32,
        vdisplay: u32,
    },
    #[error("failed to prepare interleaved DMA: {0}")]
    PrepareDescriptor(hw::Error),
    #[error("failed to submit interleaved DMA: {0}")]
    Submit(hw::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PixelFormat {
    #[default]
    Xrgb8888,
}

impl PixelFormat {
    /// Bytes per pixel.
    pub fn cpp(&self) -> u32 {
        match self {
            PixelFormat::Xrgb8888 => 4,
        }
    }
}

/// A framebuffer in physically contiguous memory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Framebuffer {
    pub paddr: u64,
    pub width: u32,
    pub height: u32,
    /// Bytes from the start of one line to the next.
    pub pitch: u32,
    pub format: PixelFormat,
}

/// The plane as the commit wants it. The source rectangle starts at (`crtc_x`, `crtc_y`) in the
/// framebuffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlaneState {
    pub crtc: Option<u32>,
    pub fb: Option<Framebuffer>,
    pub crtc_x: u32,
    pub crtc_y: u32,
    pub crtc_w: u32,
    pub crtc_h: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameGeometry {
    pub src_address: u64,
    pub src_stride_bytes: u32,
    pub crtc_x: u32,
    pub crtc_y: u32,
    pub crtc_w: u32,
    pub crtc_h: u32,
    pub bytes_per_pixel: u32,
}

impl FrameGeometry {
    /// `None` when the plane is bound to no CRTC or shows no framebuffer.
    pub fn from_plane(plane: &PlaneState) -> Option<FrameGeometry> {
        plane.crtc?;
        let fb = plane.fb.as_ref()?;
        Some(FrameGeometry {
            src_address: fb.paddr,
            src_stride_bytes: fb.pitch,
            crtc_x: plane.crtc_x,
            crtc_y: plane.crtc_y,
            crtc_w: plane.crtc_w,
            crtc_h: plane.crtc_h,
            bytes_per_pixel: fb.format.cpp(),
        })
    }

    pub fn row_bytes(&self) -> u64 {
        self.crtc_w as u64 * self.bytes_per_pixel as u64
    }

    pub fn descriptor(&self) -> Result<ScanoutDescriptor> {
        let row = self.row_bytes();
        let stride = self.src_stride_bytes as u64;
        if stride < row {
            return Err(Error::InvalidStride {
                stride: self.src_stride_bytes,
                row,
            });
        }
        Ok(ScanoutDescriptor {
            src_start: self.src_address
                + self.crtc_x as u64 * self.bytes_per_pixel as u64
                + self.crtc_y as u64 * stride,
            chunk_size: row,
            icg: stride - row,
            numf: self.crtc_h as u64,
        })
    }
}

/// One frame's worth of interleaved transfer: `numf` chunks of `chunk_size` bytes, `icg` bytes
/// apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScanoutDescriptor {
    pub src_start: u64,
    pub chunk_size: u64,
    pub icg: u64,
    pub numf: u64,
}

impl ScanoutDescriptor {
    fn fill(&self, template: &mut InterleavedTemplate) {
        template.dir = TransferDirection::MemToDev;
        template.src_start = self.src_start;
        template.frame_size = 1;
        template.numf = self.numf;
        template.src_inc = true;
        template.src_sgl = true;
        template.dst_inc = false;
        template.dst_sgl = false;
        template.sgl[0].size = self.chunk_size;
        template.sgl[0].icg = self.icg;
    }
}

pub struct ScanoutEngine {
    dma: Option<Box<dyn DmaChannel>>,
    template: Option<Box<InterleavedTemplate>>,
    last_cookie: Option<Cookie>,
}

impl ScanoutEngine {
    pub fn new(dma: Box<dyn DmaChannel>) -> ScanoutEngine {
        ScanoutEngine {
            dma: Some(dma),
            template: Some(Box::new(InterleavedTemplate::with_chunks(1))),
            last_cookie: None,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.dma.is_some()
    }

    /// Cookie of the transfer currently on the channel.
    pub fn last_cookie(&self) -> Option<Cookie> {
        self.last_cookie
    }

    /// Replaces the transfer on the channel with one for `plane`.
    ///
    /// A plane without CRTC or framebuffer is `Error::NoTarget` and leaves the running transfer
    /// alone. So does a plane that is rejected before anything is cancelled. Once the old transfer
    /// is cancelled, a failure to queue the new one leaves the channel idle until the next update.
    pub fn update(
        &mut self,
        state: &mut PipelineState,
        plane: &PlaneState,
    ) -> Result<ScanoutDescriptor> {
        let geometry = FrameGeometry::from_plane(plane).ok_or(Error::NoTarget)?;
        let (dma, template) = match (self.dma.as_mut(), self.template.as_mut()) {
            (Some(dma), Some(template)) => (dma, template),
            _ => return Err(Error::Detached),
        };
        let mode = match state.active_mode {
            Some(mode) if state.clock_enabled => mode,
            _ => return Err(Error::Inactive),
        };
        if geometry.crtc_w > mode.hdisplay || geometry.crtc_h > mode.vdisplay {
            return Err(Error::PlaneExceedsMode {
                width: geometry.crtc_w,
                height: geometry.crtc_h,
                hdisplay: mode.hdisplay,
                vdisplay: mode.vdisplay,
            });
        }
        let desc = geometry.descriptor()?;

        terminate_channel(dma.as_mut());
        state.dma_in_flight = false;
        self.last_cookie = None;

        desc.fill(template);
        let tx = dma
            .prep_interleaved(template, PrepFlags::CTRL_ACK | PrepFlags::PREP_INTERRUPT)
            .map_err(|e| {
                error!("failed to prepare DMA descriptor: {}", e);
                Error::PrepareDescriptor(e)
            })?;
        let cookie = dma.submit(tx).map_err(|e| {
            error!("failed to submit DMA descriptor: {}", e);
            Error::Submit(e)
        })?;
        dma.issue_pending();

        state.dma_in_flight = true;
        self.last_cookie = Some(cookie);
        debug!("scanout {:?} as {:?}", desc, cookie);
        Ok(desc)
    }

    /// Cancels every transfer on the channel.
    pub fn terminate(&mut self, state: &mut PipelineState) {
        if let Some(dma) = self.dma.as_mut() {
            terminate_channel(dma.as_mut());
        }
        state.dma_in_flight = false;
        self.last_cookie = None;
    }

    /// Frees the transfer template and releases the channel. Safe to call repeatedly.
    pub fn destroy(&mut self) {
        self.template = None;
        self.last_cookie = None;
        if self.dma.take().is_some() {
            debug!("released {} DMA channel", SCANOUT_CHANNEL);
        }
    }
}

fn terminate_channel(dma: &mut dyn DmaChannel) {
    if let Err(e) = dma.terminate_all() {
        warn!("failed to terminate DMA transfers: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeDmaChannel;
    use crate::hw::DataChunk;
    use crate::mode::Mode;
    use crate::modedb::DMT_MODES;

    const MODE_1080P: Mode = DMT_MODES[22];
    const FB_ADDR: u64 = 0x1000_0000;

    fn enabled_state() -> PipelineState {
        PipelineState {
            clock_enabled: true,
            active_mode: Some(MODE_1080P),
            dma_in_flight: false,
        }
    }

    fn plane(pitch: u32) -> PlaneState {
        PlaneState {
            crtc: Some(0),
            fb: Some(Framebuffer {
                paddr: FB_ADDR,
                width: pitch / 4,
                height: 1080,
                pitch,
                format: PixelFormat::Xrgb8888,
            }),
            crtc_x: 0,
            crtc_y: 0,
            crtc_w: 1920,
            crtc_h: 1080,
        }
    }

    #[test]
    fn packed_stride_has_no_gap() {
        let dma = FakeDmaChannel::new();
        let stats = dma.stats();
        let mut engine = ScanoutEngine::new(Box::new(dma));
        let mut state = enabled_state();

        let desc = engine.update(&mut state, &plane(7680)).unwrap();
        assert_eq!(desc.chunk_size, 7680);
        assert_eq!(desc.icg, 0);
        assert_eq!(desc.numf, 1080);

        let template = stats.lock().templates[0].clone();
        assert_eq!(template.dir, TransferDirection::MemToDev);
        assert_eq!(template.src_start, FB_ADDR);
        assert!(template.src_inc && template.src_sgl);
        assert!(!template.dst_inc && !template.dst_sgl);
        assert_eq!(template.frame_size, 1);
        assert_eq!(template.numf, 1080);
        assert_eq!(
            template.sgl,
            vec![DataChunk {
                size: 7680,
                icg: 0
            }]
        );
        assert_eq!(
            stats.lock().flags,
            vec![PrepFlags::CTRL_ACK | PrepFlags::PREP_INTERRUPT]
        );
    }

    #[test]
    fn padded_stride_gap() {
        let mut engine = ScanoutEngine::new(Box::new(FakeDmaChannel::new()));
        let mut state = enabled_state();
        let desc = engine.update(&mut state, &plane(8192)).unwrap();
        assert_eq!(desc.chunk_size, 7680);
        assert_eq!(desc.icg, 512);
    }

    #[test]
    fn source_offset() {
        let mut engine = ScanoutEngine::new(Box::new(FakeDmaChannel::new()));
        let mut state = enabled_state();
        let plane = PlaneState {
            crtc_x: 16,
            crtc_y: 2,
            crtc_w: 640,
            crtc_h: 480,
            ..plane(8192)
        };
        let desc = engine.update(&mut state, &plane).unwrap();
        assert_eq!(desc.src_start, FB_ADDR + 16 * 4 + 2 * 8192);
        assert_eq!(desc.chunk_size, 2560);
        assert_eq!(desc.icg, 8192 - 2560);
    }

    #[test]
    fn successive_updates_keep_one_transfer() {
        let dma = FakeDmaChannel::new();
        let stats = dma.stats();
        let mut engine = ScanoutEngine::new(Box::new(dma));
        let mut state = enabled_state();

        const UPDATES: usize = 5;
        for _ in 0..UPDATES {
            engine.update(&mut state, &plane(7680)).unwrap();
            assert_eq!(stats.lock().active, 1);
        }
        let stats = stats.lock();
        assert_eq!(stats.submitted, UPDATES);
        assert_eq!(stats.cancelled, UPDATES - 1);
        assert_eq!(stats.max_active, 1);
        assert!(state.dma_in_flight());
        assert_eq!(engine.last_cookie(), Some(Cookie(UPDATES as i32)));
    }

    #[test]
    fn no_target_touches_nothing() {
        let dma = FakeDmaChannel::new();
        let stats = dma.stats();
        let mut engine = ScanoutEngine::new(Box::new(dma));
        let mut state = enabled_state();
        engine.update(&mut state, &plane(7680)).unwrap();

        let no_fb = PlaneState {
            fb: None,
            ..plane(7680)
        };
        let no_crtc = PlaneState {
            crtc: None,
            ..plane(7680)
        };
        assert!(matches!(
            engine.update(&mut state, &no_fb),
            Err(Error::NoTarget)
        ));
        assert!(matches!(
            engine.update(&mut state, &no_crtc),
            Err(Error::NoTarget)
        ));

        let stats = stats.lock();
        assert_eq!(stats.submitted, 1);
        assert_eq!(stats.terminate_calls, 1);
        assert_eq!(stats.cancelled, 0);
        assert_eq!(stats.active, 1);
        assert!(state.dma_in_flight());
    }

    #[test]
    fn disabled_pipeline_submits_nothing() {
        let dma = FakeDmaChannel::new();
        let stats = dma.stats();
        let mut engine = ScanoutEngine::new(Box::new(dma));
        let mut state = PipelineState::default();

        assert!(matches!(
            engine.update(&mut state, &plane(7680)),
            Err(Error::Inactive)
        ));
        assert_eq!(stats.lock().submitted, 0);
        assert_eq!(stats.lock().terminate_calls, 0);
    }

    #[test]
    fn oversized_plane_rejected() {
        let dma = FakeDmaChannel::new();
        let stats = dma.stats();
        let mut engine = ScanoutEngine::new(Box::new(dma));
        let mut state = PipelineState {
            active_mode: Some(DMT_MODES[12]),
            ..enabled_state()
        };

        assert!(matches!(
            engine.update(&mut state, &plane(7680)),
            Err(Error::PlaneExceedsMode {
                width: 1920,
                hdisplay: 1280,
                ..
            })
        ));
        assert_eq!(stats.lock().terminate_calls, 0);
    }

    #[test]
    fn short_stride_rejected() {
        let mut engine = ScanoutEngine::new(Box::new(FakeDmaChannel::new()));
        let mut state = enabled_state();
        assert!(matches!(
            engine.update(&mut state, &plane(4096)),
            Err(Error::InvalidStride {
                stride: 4096,
                row: 7680
            })
        ));
    }

    #[test]
    fn prepare_failure_is_reported_once() {
        let dma = FakeDmaChannel::new();
        let stats = dma.stats();
        let mut engine = ScanoutEngine::new(Box::new(dma));
        let mut state = enabled_state();
        engine.update(&mut state, &plane(7680)).unwrap();

        stats.lock().fail_prep = true;
        assert!(matches!(
            engine.update(&mut state, &plane(7680)),
            Err(Error::PrepareDescriptor(_))
        ));
        assert!(!state.dma_in_flight());
        assert_eq!(stats.lock().active, 0);
        assert_eq!(stats.lock().submitted, 1);

        stats.lock().fail_prep = false;
        stats.lock().fail_submit = true;
        assert!(matches!(
            engine.update(&mut state, &plane(7680)),
            Err(Error::Submit(_))
        ));
        assert_eq!(stats.lock().active, 0);
        assert_eq!(engine.last_cookie(), None);
    }

    #[test]
    fn destroy_detaches() {
        let dma = FakeDmaChannel::new();
        let stats = dma.stats();
        let mut engine = ScanoutEngine::new(Box::new(dma));
        let mut state = enabled_state();

        engine.destroy();
        engine.destroy();
        assert!(!engine.is_attached());
        assert!(stats.lock().released);
        assert!(matches!(
            engine.update(&mut state, &plane(7680)),
            Err(Error::Detached)
        ));
        engine.terminate(&mut state);
    }
}
