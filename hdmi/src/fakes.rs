// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Recording stand-ins for the hardware interfaces in `crate::hw`, for tests and for running the
//! pipeline on a host.

use std::sync::Arc;

use sync::Mutex;

use crate::hw;
use crate::hw::Cookie;
use crate::hw::DdcBus;
use crate::hw::DmaChannel;
use crate::hw::InterleavedTemplate;
use crate::hw::Lookup;
use crate::hw::PendingVblankEvent;
use crate::hw::PixelClock;
use crate::hw::PrepFlags;
use crate::hw::ResourceProvider;
use crate::hw::TimingGenerator;
use crate::hw::TxDescriptor;
use crate::hw::VblankEvents;
use crate::mode::VideoMode;

/// Something a fake was asked to do.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Acquire(&'static str),
    ClockDisable,
    ClockEnable,
    Release(&'static str),
    SetRate(u64),
    SetTiming(VideoMode),
    TimingDisable,
    TimingEnable,
}

/// Ordered record of calls, shared by every fake of one test.
#[derive(Clone, Debug, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    pub fn push(&self, call: Call) {
        self.0.lock().push(call);
    }

    /// Returns the calls so far and clears the log.
    pub fn take(&self) -> Vec<Call> {
        std::mem::take(&mut *self.0.lock())
    }
}

pub struct FakePixelClock {
    log: CallLog,
    pub fail_enable: bool,
    /// Rates above this are refused.
    pub max_rate: Option<u64>,
}

impl FakePixelClock {
    pub fn new(log: CallLog) -> FakePixelClock {
        FakePixelClock {
            log,
            fail_enable: false,
            max_rate: None,
        }
    }
}

impl PixelClock for FakePixelClock {
    fn set_rate(&mut self, hz: u64) -> hw::Result<()> {
        if self.max_rate.map_or(false, |max| hz > max) {
            return Err(hw::Error::Invalid);
        }
        self.log.push(Call::SetRate(hz));
        Ok(())
    }

    fn prepare_enable(&mut self) -> hw::Result<()> {
        if self.fail_enable {
            return Err(hw::Error::Io(String::from("clock stuck")));
        }
        self.log.push(Call::ClockEnable);
        Ok(())
    }

    fn disable_unprepare(&mut self) {
        self.log.push(Call::ClockDisable);
    }
}

impl Drop for FakePixelClock {
    fn drop(&mut self) {
        self.log.push(Call::Release("clock"));
    }
}

pub struct FakeTimingGenerator {
    log: CallLog,
    pub fail_set_timing: bool,
}

impl FakeTimingGenerator {
    pub fn new(log: CallLog) -> FakeTimingGenerator {
        FakeTimingGenerator {
            log,
            fail_set_timing: false,
        }
    }
}

impl TimingGenerator for FakeTimingGenerator {
    fn set_timing(&mut self, timing: &VideoMode) -> hw::Result<()> {
        if self.fail_set_timing {
            return Err(hw::Error::Invalid);
        }
        self.log.push(Call::SetTiming(*timing));
        Ok(())
    }

    fn enable(&mut self) -> hw::Result<()> {
        self.log.push(Call::TimingEnable);
        Ok(())
    }

    fn disable(&mut self) {
        self.log.push(Call::TimingDisable);
    }
}

impl Drop for FakeTimingGenerator {
    fn drop(&mut self) {
        self.log.push(Call::Release("timing generator"));
    }
}

/// What happened on a `FakeDmaChannel`.
#[derive(Debug, Default)]
pub struct DmaStats {
    /// Every template handed to `prep_interleaved`, oldest first.
    pub templates: Vec<InterleavedTemplate>,
    pub flags: Vec<PrepFlags>,
    pub submitted: usize,
    pub issued: usize,
    pub terminate_calls: usize,
    /// Transfers that were live when the channel was terminated.
    pub cancelled: usize,
    /// Transfers submitted and not terminated.
    pub active: usize,
    /// Highest `active` ever reached.
    pub max_active: usize,
    pub fail_prep: bool,
    pub fail_submit: bool,
    pub released: bool,
}

pub struct FakeDmaChannel {
    stats: Arc<Mutex<DmaStats>>,
    log: Option<CallLog>,
    next_desc: u64,
}

impl FakeDmaChannel {
    pub fn new() -> FakeDmaChannel {
        FakeDmaChannel {
            stats: Arc::new(Mutex::new(DmaStats::default())),
            log: None,
            next_desc: 0,
        }
    }

    /// Also records the channel's release in `log`.
    pub fn with_log(log: CallLog) -> FakeDmaChannel {
        let mut dma = FakeDmaChannel::new();
        dma.log = Some(log);
        dma
    }

    /// Handle to the statistics, still valid after the channel is boxed or dropped.
    pub fn stats(&self) -> Arc<Mutex<DmaStats>> {
        self.stats.clone()
    }
}

impl Default for FakeDmaChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl DmaChannel for FakeDmaChannel {
    fn prep_interleaved(
        &mut self,
        template: &InterleavedTemplate,
        flags: PrepFlags,
    ) -> hw::Result<TxDescriptor> {
        let mut stats = self.stats.lock();
        if stats.fail_prep {
            return Err(hw::Error::NoMemory);
        }
        stats.templates.push(template.clone());
        stats.flags.push(flags);
        self.next_desc += 1;
        Ok(TxDescriptor::new(self.next_desc))
    }

    fn submit(&mut self, desc: TxDescriptor) -> hw::Result<Cookie> {
        let mut stats = self.stats.lock();
        if stats.fail_submit {
            return Err(hw::Error::NoMemory);
        }
        // Only the most recently prepared descriptor is still owned by the caller.
        if desc.id() != self.next_desc {
            return Err(hw::Error::Invalid);
        }
        stats.submitted += 1;
        stats.active += 1;
        let active = stats.active;
        stats.max_active = stats.max_active.max(active);
        Ok(Cookie(stats.submitted as i32))
    }

    fn issue_pending(&mut self) {
        self.stats.lock().issued += 1;
    }

    fn terminate_all(&mut self) -> hw::Result<()> {
        let mut stats = self.stats.lock();
        stats.terminate_calls += 1;
        let active = std::mem::take(&mut stats.active);
        stats.cancelled += active;
        Ok(())
    }
}

impl Drop for FakeDmaChannel {
    fn drop(&mut self) {
        self.stats.lock().released = true;
        if let Some(log) = &self.log {
            log.push(Call::Release("dma"));
        }
    }
}

/// An EEPROM of `data`, or no sink at all.
#[derive(Clone, Debug)]
pub struct FakeDdcBus {
    data: Option<Vec<u8>>,
    reads: Arc<Mutex<Vec<(u8, u8, usize)>>>,
    log: Option<CallLog>,
}

impl FakeDdcBus {
    pub fn new(data: Vec<u8>) -> FakeDdcBus {
        FakeDdcBus {
            data: Some(data),
            reads: Arc::new(Mutex::new(Vec::new())),
            log: None,
        }
    }

    /// Nothing answers on the bus.
    pub fn disconnected() -> FakeDdcBus {
        let mut bus = FakeDdcBus::new(Vec::new());
        bus.data = None;
        bus
    }

    pub fn with_log(mut self, log: CallLog) -> FakeDdcBus {
        self.log = Some(log);
        self
    }

    /// `(segment, offset, length)` of every read so far.
    pub fn reads(&self) -> Vec<(u8, u8, usize)> {
        self.reads.lock().clone()
    }
}

impl DdcBus for FakeDdcBus {
    fn read(&mut self, segment: u8, offset: u8, buf: &mut [u8]) -> hw::Result<()> {
        self.reads.lock().push((segment, offset, buf.len()));
        let data = self
            .data
            .as_ref()
            .ok_or_else(|| hw::Error::Io(format!("no ACK from {:#x}", hw::DDC_ADDR)))?;
        // Sinks without E-DDC have no segment pointer.
        if segment > 0 && data.len() <= 256 {
            return Err(hw::Error::Io(format!(
                "no ACK from {:#x}",
                hw::DDC_SEGMENT_ADDR
            )));
        }
        let start = segment as usize * 256 + offset as usize;
        let src = data
            .get(start..start + buf.len())
            .ok_or_else(|| hw::Error::Io(format!("read past end of EEPROM at {}", start)))?;
        buf.copy_from_slice(src);
        Ok(())
    }
}

impl Drop for FakeDdcBus {
    fn drop(&mut self) {
        if let Some(log) = &self.log {
            log.push(Call::Release("ddc"));
        }
    }
}

/// Collects the ids of delivered vblank events.
#[derive(Debug, Default)]
pub struct RecordingVblank {
    pub delivered: Vec<u64>,
}

impl VblankEvents for RecordingVblank {
    fn send_vblank_event(&mut self, event: PendingVblankEvent) {
        self.delivered.push(event.id);
    }
}

/// Whether an optional handle is described and registered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Presence {
    Absent,
    NotReady,
    Present,
}

/// Hands out fakes and logs every acquisition and release to one `CallLog`.
pub struct FakeProvider {
    pub log: CallLog,
    pub fail_clock: bool,
    pub fail_dma: bool,
    pub vtc: Presence,
    pub ddc: Presence,
    /// Contents of the EEPROM behind the DDC bus. `None` is a bus without sink.
    pub edid: Option<Vec<u8>>,
    dma_stats: Option<Arc<Mutex<DmaStats>>>,
}

impl FakeProvider {
    pub fn new(log: CallLog) -> FakeProvider {
        FakeProvider {
            log,
            fail_clock: false,
            fail_dma: false,
            vtc: Presence::Present,
            ddc: Presence::Absent,
            edid: None,
            dma_stats: None,
        }
    }

    /// Statistics of the last DMA channel handed out.
    pub fn dma_stats(&self) -> Option<Arc<Mutex<DmaStats>>> {
        self.dma_stats.clone()
    }
}

impl ResourceProvider for FakeProvider {
    fn clock(&mut self) -> hw::Result<Box<dyn PixelClock>> {
        if self.fail_clock {
            return Err(hw::Error::NoDevice);
        }
        self.log.push(Call::Acquire("clock"));
        Ok(Box::new(FakePixelClock::new(self.log.clone())))
    }

    fn dma_channel(&mut self, name: &str) -> hw::Result<Box<dyn DmaChannel>> {
        if self.fail_dma || name != crate::scanout::SCANOUT_CHANNEL {
            return Err(hw::Error::NoDevice);
        }
        self.log.push(Call::Acquire("dma"));
        let dma = FakeDmaChannel::with_log(self.log.clone());
        self.dma_stats = Some(dma.stats());
        Ok(Box::new(dma))
    }

    fn timing_generator(&mut self) -> Lookup<Box<dyn TimingGenerator>> {
        match self.vtc {
            Presence::Absent => Lookup::Absent,
            Presence::NotReady => Lookup::NotReady,
            Presence::Present => {
                self.log.push(Call::Acquire("timing generator"));
                Lookup::Found(Box::new(FakeTimingGenerator::new(self.log.clone())))
            }
        }
    }

    fn ddc_bus(&mut self) -> Lookup<Box<dyn DdcBus>> {
        match self.ddc {
            Presence::Absent => Lookup::Absent,
            Presence::NotReady => Lookup::NotReady,
            Presence::Present => {
                self.log.push(Call::Acquire("ddc"));
                let bus = match &self.edid {
                    Some(edid) => FakeDdcBus::new(edid.clone()),
                    None => FakeDdcBus::disconnected(),
                };
                Lookup::Found(Box::new(bus.with_log(self.log.clone())))
            }
        }
    }
}
