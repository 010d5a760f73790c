// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Interfaces to the hardware blocks the pipeline drives but does not own the implementation of:
//! the pixel clock, the external timing generator, the scanout DMA channel, the DDC bus and the
//! vblank event sink. Production code implements these on top of the platform's drivers; tests use
//! the recording fakes in `crate::fakes`.

use bitflags::bitflags;
use remain::sorted;
use thiserror::Error;

use crate::mode::VideoMode;

#[sorted]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid argument")]
    Invalid,
    #[error("I/O error: {0}")]
    Io(String),
    #[error("no such device")]
    NoDevice,
    #[error("out of memory")]
    NoMemory,
}

pub type Result<T> = std::result::Result<T, Error>;

/// I2C address of the EDID EEPROM on the DDC bus.
pub const DDC_ADDR: u16 = 0x50;
/// I2C address of the E-DDC segment pointer.
pub const DDC_SEGMENT_ADDR: u16 = 0x30;

/// The clock feeding pixels to the transmitter.
pub trait PixelClock: Send {
    /// Sets the rate in Hz. May be called while the clock is running.
    fn set_rate(&mut self, hz: u64) -> Result<()>;
    fn prepare_enable(&mut self) -> Result<()>;
    fn disable_unprepare(&mut self);
}

/// An external video timing controller producing sync and blanking.
pub trait TimingGenerator: Send {
    fn set_timing(&mut self, timing: &VideoMode) -> Result<()>;
    fn enable(&mut self) -> Result<()>;
    fn disable(&mut self);
}

/// Reads from the EDID EEPROM of whatever is plugged into the connector.
pub trait DdcBus: Send {
    /// Reads `buf.len()` bytes starting at `offset` of EDID segment `segment`.
    ///
    /// A segment is 256 bytes, i.e. two EDID blocks. The segment pointer is only written for
    /// segments other than 0.
    fn read(&mut self, segment: u8, offset: u8, buf: &mut [u8]) -> Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferDirection {
    MemToMem,
    MemToDev,
    DevToMem,
    DevToDev,
}

/// One chunk of an interleaved frame: `size` bytes transferred, then `icg` bytes skipped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DataChunk {
    pub size: u64,
    pub icg: u64,
}

/// Describes a transfer of `numf` frames of `frame_size` chunks each.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterleavedTemplate {
    pub src_start: u64,
    pub dst_start: u64,
    pub dir: TransferDirection,
    /// Source address increments after each byte.
    pub src_inc: bool,
    pub dst_inc: bool,
    /// Source honors the chunk gaps.
    pub src_sgl: bool,
    pub dst_sgl: bool,
    pub numf: u64,
    pub frame_size: usize,
    pub sgl: Vec<DataChunk>,
}

impl InterleavedTemplate {
    /// An empty template with room for `chunks` chunks.
    pub fn with_chunks(chunks: usize) -> InterleavedTemplate {
        InterleavedTemplate {
            src_start: 0,
            dst_start: 0,
            dir: TransferDirection::MemToMem,
            src_inc: false,
            dst_inc: false,
            src_sgl: false,
            dst_sgl: false,
            numf: 0,
            frame_size: 0,
            sgl: vec![DataChunk::default(); chunks],
        }
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct PrepFlags: u32 {
        /// Raise the completion interrupt for this descriptor.
        const PREP_INTERRUPT = 1 << 0;
        /// The client acknowledges the descriptor at submission.
        const CTRL_ACK = 1 << 1;
    }
}

/// A prepared, not yet submitted transfer. Ownership moves to the channel on submission.
#[derive(Debug, PartialEq, Eq)]
pub struct TxDescriptor {
    id: u64,
}

impl TxDescriptor {
    pub fn new(id: u64) -> TxDescriptor {
        TxDescriptor { id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Identifies a submitted transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cookie(pub i32);

/// A slave DMA channel capable of interleaved transfers.
pub trait DmaChannel: Send {
    fn prep_interleaved(
        &mut self,
        template: &InterleavedTemplate,
        flags: PrepFlags,
    ) -> Result<TxDescriptor>;
    fn submit(&mut self, desc: TxDescriptor) -> Result<Cookie>;
    /// Starts every submitted transfer.
    fn issue_pending(&mut self);
    /// Aborts every transfer on the channel, active or queued. Succeeds when nothing is queued.
    fn terminate_all(&mut self) -> Result<()>;
}

/// Completion token carried by a commit, to be signalled once the commit has been applied.
#[derive(Debug, PartialEq, Eq)]
pub struct PendingVblankEvent {
    pub id: u64,
}

/// Receives completed vblank events. Shared with the vblank interrupt side, so callers reach it
/// through a `sync::Mutex` and keep the lock only for the delivery itself.
pub trait VblankEvents: Send {
    fn send_vblank_event(&mut self, event: PendingVblankEvent);
}

/// Result of looking up an optional hardware handle.
#[derive(Debug)]
pub enum Lookup<T> {
    /// The hardware description does not reference the device.
    Absent,
    /// The device is referenced but its driver has not registered it yet.
    NotReady,
    Found(T),
}

/// Hands out the hardware handles a pipeline needs. Every handle is released by dropping it.
pub trait ResourceProvider {
    fn clock(&mut self) -> Result<Box<dyn PixelClock>>;
    fn dma_channel(&mut self, name: &str) -> Result<Box<dyn DmaChannel>>;
    fn timing_generator(&mut self) -> Lookup<Box<dyn TimingGenerator>>;
    fn ddc_bus(&mut self) -> Lookup<Box<dyn DdcBus>>;
}
