// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Extended Display Identification Data, as read from the sink over DDC.
//! EDID standard: <https://glenwing.github.io/docs/VESA-EEDID-A2.pdf>
//!
//! `Edid` parses what the sink reports into `Mode`s. `EdidBytes` goes the other way and builds an
//! EDID for a list of modes, which is what the tests and the `hdmi_tx modes --edid` tool feed in.

use std::fmt;
use std::fmt::Debug;

use base::debug;
use base::warn;
use remain::sorted;
use thiserror::Error;

use crate::hw::DdcBus;
use crate::mode::Mode;
use crate::mode::ModeFlags;
use crate::modedb;

pub const EDID_BLOCK_LEN: usize = 128;

const EDID_HEADER: [u8; 8] = [0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00];
const DESCRIPTOR_OFFSETS: [usize; 4] = [54, 72, 90, 108];
const DESCRIPTOR_LEN: usize = 18;
const DESCRIPTOR_MONITOR_NAME: u8 = 0xFC;
const ESTABLISHED_TIMINGS: usize = 0x23;
const STANDARD_TIMINGS: usize = 0x26;
const STANDARD_TIMING_COUNT: usize = 8;
const FEATURES: usize = 24;
const FEATURE_PREFERRED_TIMING: u8 = 0x02;
const EXTENSION_COUNT: usize = 126;
const CEA_EXT: u8 = 0x02;
const CEA_MAX_DETAILED_TIMINGS: usize = 6;
const MONITOR_NAME_LEN: usize = 13;

#[sorted]
#[derive(Error, Debug)]
pub enum Error {
    #[error("bad EDID checksum in block {block}: sum is {sum:#04x}")]
    BadChecksum { block: usize, sum: u8 },
    #[error("bad EDID header")]
    BadHeader,
    #[error("unsupported EDID version {0}")]
    BadVersion(u8),
    #[error("DDC read failed: {0}")]
    Ddc(crate::hw::Error),
    #[error("timing does not fit a detailed timing descriptor: {0}")]
    TimingOutOfRange(String),
    #[error("too many {kind} timings: {count}, at most {max} fit")]
    TooManyTimings {
        kind: &'static str,
        count: usize,
        max: usize,
    },
    #[error("EDID truncated: {0} bytes")]
    Truncated(usize),
    #[error("unsupported aspect ratio: {0} {1}")]
    UnsupportedAspectRatio(u32, u32),
    #[error("unsupported standard timing {width}x{height}@{refresh}")]
    UnsupportedStandardTiming { width: u32, height: u32, refresh: u32 },
}

pub type Result<T> = std::result::Result<T, Error>;

fn block_sum(block: &[u8]) -> u8 {
    block.iter().fold(0u8, |sum, byte| sum.wrapping_add(*byte))
}

fn calculate_checksum(block: &mut [u8], length: usize) {
    let mut checksum = block_sum(&block[..length]);
    if checksum != 0 {
        checksum = 255 - checksum + 1;
    }
    block[length] = checksum;
}

/// A validated EDID: the base block followed by every extension block with a good checksum.
#[derive(Clone, PartialEq, Eq)]
pub struct Edid {
    bytes: Vec<u8>,
}

impl Edid {
    /// Validates the base block and keeps the extensions whose checksum is correct.
    ///
    /// Dropping an extension rewrites the extension count and the base block checksum so the
    /// result is self-consistent.
    pub fn parse(raw: &[u8]) -> Result<Edid> {
        if raw.len() < EDID_BLOCK_LEN {
            return Err(Error::Truncated(raw.len()));
        }
        let base = &raw[..EDID_BLOCK_LEN];
        if base[..8] != EDID_HEADER {
            return Err(Error::BadHeader);
        }
        let sum = block_sum(base);
        if sum != 0 {
            return Err(Error::BadChecksum { block: 0, sum });
        }
        if base[18] != 1 {
            return Err(Error::BadVersion(base[18]));
        }

        let declared = base[EXTENSION_COUNT] as usize;
        let mut bytes = base.to_vec();
        for (i, block) in raw[EDID_BLOCK_LEN..]
            .chunks(EDID_BLOCK_LEN)
            .take(declared)
            .enumerate()
        {
            let index = i + 1;
            if block.len() < EDID_BLOCK_LEN {
                warn!("EDID extension {} truncated, ignoring it", index);
                break;
            }
            let sum = block_sum(block);
            if sum != 0 {
                warn!(
                    "EDID extension {} has a bad checksum ({:#04x}), ignoring it",
                    index, sum
                );
                continue;
            }
            bytes.extend_from_slice(block);
        }

        let kept = bytes.len() / EDID_BLOCK_LEN - 1;
        if kept != declared {
            bytes[EXTENSION_COUNT] = kept as u8;
            calculate_checksum(&mut bytes, EDID_BLOCK_LEN - 1);
        }
        Ok(Edid { bytes })
    }

    /// Reads the base block and every extension it announces from `ddc`.
    ///
    /// Only one attempt is made. The caller retries on the next hotplug poll.
    pub fn read(ddc: &mut dyn DdcBus) -> Result<Edid> {
        let mut raw = vec![0u8; EDID_BLOCK_LEN];
        ddc.read(0, 0, &mut raw).map_err(Error::Ddc)?;
        if raw[..8] != EDID_HEADER {
            return Err(Error::BadHeader);
        }

        let extensions = raw[EXTENSION_COUNT] as usize;
        raw.resize(EDID_BLOCK_LEN * (extensions + 1), 0);
        for index in 1..=extensions {
            let segment = (index / 2) as u8;
            let offset = ((index % 2) * EDID_BLOCK_LEN) as u8;
            let block = &mut raw[index * EDID_BLOCK_LEN..(index + 1) * EDID_BLOCK_LEN];
            ddc.read(segment, offset, block).map_err(Error::Ddc)?;
        }
        Edid::parse(&raw)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn version(&self) -> (u8, u8) {
        (self.bytes[18], self.bytes[19])
    }

    /// Number of valid extension blocks.
    pub fn extension_count(&self) -> usize {
        self.bytes[EXTENSION_COUNT] as usize
    }

    /// Contents of the display product name descriptor, if there is one.
    pub fn monitor_name(&self) -> Option<String> {
        DESCRIPTOR_OFFSETS
            .iter()
            .map(|&off| &self.bytes[off..off + DESCRIPTOR_LEN])
            .find(|d| d[0] == 0 && d[1] == 0 && d[3] == DESCRIPTOR_MONITOR_NAME)
            .map(|d| {
                let text = &d[5..];
                let end = text.iter().position(|&c| c == 0x0A).unwrap_or(text.len());
                String::from_utf8_lossy(&text[..end]).trim_end().to_string()
            })
    }

    fn first_timing_preferred(&self) -> bool {
        let (version, revision) = self.version();
        (version == 1 && revision >= 4) || self.bytes[FEATURES] & FEATURE_PREFERRED_TIMING != 0
    }

    /// Every mode the sink advertises, detailed timings first. Duplicates are merged.
    pub fn modes(&self) -> Vec<Mode> {
        let mut modes = Vec::new();

        let base = &self.bytes[..EDID_BLOCK_LEN];
        for (i, &off) in DESCRIPTOR_OFFSETS.iter().enumerate() {
            if let Some(mut mode) = decode_detailed_timing(&base[off..off + DESCRIPTOR_LEN]) {
                mode.preferred = i == 0 && self.first_timing_preferred();
                modes.push(mode);
            }
        }

        let mut established = [0u8; 3];
        established.copy_from_slice(&base[ESTABLISHED_TIMINGS..ESTABLISHED_TIMINGS + 3]);
        modes.extend(modedb::established_modes(established));

        for i in 0..STANDARD_TIMING_COUNT {
            let off = STANDARD_TIMINGS + i * 2;
            if let Some(mode) = self.decode_standard_timing(base[off], base[off + 1]) {
                modes.push(mode);
            }
        }

        for block in self.bytes[EDID_BLOCK_LEN..].chunks(EDID_BLOCK_LEN) {
            if block[0] == CEA_EXT {
                modes.extend(cea_detailed_timings(block));
            }
        }

        let mut merged: Vec<Mode> = Vec::with_capacity(modes.len());
        for mode in modes {
            match merged.iter_mut().find(|m| m.same_timing(&mode)) {
                Some(existing) => existing.preferred |= mode.preferred,
                None => merged.push(mode),
            }
        }
        debug!("EDID advertises {} modes", merged.len());
        merged
    }

    fn decode_standard_timing(&self, b0: u8, b1: u8) -> Option<Mode> {
        if (b0 == 0x01 && b1 == 0x01) || b0 == 0 {
            return None;
        }
        let width = (b0 as u32 + 31) * 8;
        let height = match b1 >> 6 {
            0 if self.version() < (1, 3) => width,
            0 => width * 10 / 16,
            1 => width * 3 / 4,
            2 => width * 4 / 5,
            _ => width * 9 / 16,
        };
        let refresh = (b1 & 0x3f) as u32 + 60;
        let mode = modedb::find_dmt(width, height, refresh);
        if mode.is_none() {
            debug!(
                "no DMT timing for standard timing {}x{}@{}",
                width, height, refresh
            );
        }
        mode
    }
}

impl Debug for Edid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Edid")
            .field("version", &self.version())
            .field("extensions", &self.extension_count())
            .field("name", &self.monitor_name())
            .finish()
    }
}

fn cea_detailed_timings(block: &[u8]) -> Vec<Mode> {
    // Byte 2 is the offset of the first detailed timing, 0 when there are none. Data blocks
    // (video, audio, vendor specific) sit between byte 4 and that offset.
    let start = block[2] as usize;
    if start < 4 {
        return Vec::new();
    }
    let mut modes = Vec::new();
    let mut off = start;
    while off + DESCRIPTOR_LEN < EDID_BLOCK_LEN {
        match decode_detailed_timing(&block[off..off + DESCRIPTOR_LEN]) {
            Some(mode) => modes.push(mode),
            None => break,
        }
        off += DESCRIPTOR_LEN;
    }
    modes
}

/// Decodes an 18 byte detailed timing descriptor. Returns `None` for display descriptors.
fn decode_detailed_timing(d: &[u8]) -> Option<Mode> {
    let clock = u16::from_le_bytes([d[0], d[1]]) as u32 * 10;
    if clock == 0 {
        return None;
    }

    let hactive = d[2] as u32 | (d[4] as u32 & 0xf0) << 4;
    let hblank = d[3] as u32 | (d[4] as u32 & 0x0f) << 8;
    let vactive = d[5] as u32 | (d[7] as u32 & 0xf0) << 4;
    let vblank = d[6] as u32 | (d[7] as u32 & 0x0f) << 8;
    let hsync_offset = d[8] as u32 | (d[11] as u32 & 0xc0) << 2;
    let hsync_width = d[9] as u32 | (d[11] as u32 & 0x30) << 4;
    let vsync_offset = (d[10] as u32 >> 4) | (d[11] as u32 & 0x0c) << 2;
    let vsync_width = (d[10] as u32 & 0x0f) | (d[11] as u32 & 0x03) << 4;

    let features = d[17];
    let mut flags = ModeFlags::empty();
    flags |= if features & 0x02 != 0 {
        ModeFlags::PHSYNC
    } else {
        ModeFlags::NHSYNC
    };
    flags |= if features & 0x04 != 0 {
        ModeFlags::PVSYNC
    } else {
        ModeFlags::NVSYNC
    };
    if features & 0x60 != 0 {
        flags |= ModeFlags::STEREO_3D;
    }

    let hsync_start = hactive + hsync_offset;
    let hsync_end = hsync_start + hsync_width;
    let vsync_start = vactive + vsync_offset;
    let vsync_end = vsync_start + vsync_width;
    // Some sinks report sync pulses that run past the blanking period.
    let mut htotal = hactive + hblank;
    if hsync_end > htotal {
        htotal = hsync_end + 1;
    }
    let mut vtotal = vactive + vblank;
    if vsync_end > vtotal {
        vtotal = vsync_end + 1;
    }
    let mut mode = Mode::new(
        clock,
        hactive,
        hsync_start,
        hsync_end,
        htotal,
        vactive,
        vsync_start,
        vsync_end,
        vtotal,
        flags,
    );

    if features & 0x80 != 0 {
        // Interlaced descriptors give field timings.
        mode.flags |= ModeFlags::INTERLACE;
        mode.vdisplay *= 2;
        mode.vsync_start *= 2;
        mode.vsync_end *= 2;
        mode.vtotal = mode.vtotal * 2 | 1;
    }
    Some(mode)
}

fn encode_detailed_timing(mode: &Mode, d: &mut [u8]) -> Result<()> {
    let out_of_range = || Error::TimingOutOfRange(mode.to_string());

    let interlaced = mode.flags.contains(ModeFlags::INTERLACE);
    let field = |lines: u32| if interlaced { lines / 2 } else { lines };
    let vactive = field(mode.vdisplay);
    let vsync_start = field(mode.vsync_start);
    let vsync_end = field(mode.vsync_end);
    let vtotal = field(mode.vtotal);

    let clock = mode.clock_khz / 10;
    let hblank = mode.htotal.checked_sub(mode.hdisplay).ok_or_else(out_of_range)?;
    let hso = mode.hsync_start.checked_sub(mode.hdisplay).ok_or_else(out_of_range)?;
    let hsw = mode.hsync_end.checked_sub(mode.hsync_start).ok_or_else(out_of_range)?;
    let vblank = vtotal.checked_sub(vactive).ok_or_else(out_of_range)?;
    let vso = vsync_start.checked_sub(vactive).ok_or_else(out_of_range)?;
    let vsw = vsync_end.checked_sub(vsync_start).ok_or_else(out_of_range)?;
    if clock == 0
        || clock > 0xffff
        || mode.hdisplay > 0xfff
        || hblank > 0xfff
        || vactive > 0xfff
        || vblank > 0xfff
        || hso > 0x3ff
        || hsw > 0x3ff
        || vso > 0x3f
        || vsw > 0x3f
    {
        return Err(out_of_range());
    }

    d[0..2].copy_from_slice(&(clock as u16).to_le_bytes());
    d[2] = mode.hdisplay as u8;
    d[3] = hblank as u8;
    d[4] = ((mode.hdisplay >> 8) << 4 | hblank >> 8) as u8;
    d[5] = vactive as u8;
    d[6] = vblank as u8;
    d[7] = ((vactive >> 8) << 4 | vblank >> 8) as u8;
    d[8] = hso as u8;
    d[9] = hsw as u8;
    d[10] = ((vso & 0x0f) << 4 | (vsw & 0x0f)) as u8;
    d[11] = ((hso >> 8) << 6 | (hsw >> 8) << 4 | (vso >> 4) << 2 | vsw >> 4) as u8;

    // Digital separate sync.
    let mut features = 0x18;
    if mode.flags.contains(ModeFlags::PVSYNC) {
        features |= 0x04;
    }
    if mode.flags.contains(ModeFlags::PHSYNC) {
        features |= 0x02;
    }
    if interlaced {
        features |= 0x80;
    }
    if mode.flags.contains(ModeFlags::STEREO_3D) {
        features |= 0x20;
    }
    d[17] = features;
    Ok(())
}

/// A standard timing: resolution and refresh rate, with the full timing implied by the DMT.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StandardTiming {
    pub width: u32,
    pub height: u32,
    pub refresh: u32,
}

impl StandardTiming {
    pub fn new(width: u32, height: u32, refresh: u32) -> StandardTiming {
        StandardTiming {
            width,
            height,
            refresh,
        }
    }

    fn aspect_ratio(&self) -> (u32, u32) {
        let divisor = gcd(self.width, self.height);
        (self.width / divisor, self.height / divisor)
    }

    fn encode(&self) -> Result<[u8; 2]> {
        let unsupported = || Error::UnsupportedStandardTiming {
            width: self.width,
            height: self.height,
            refresh: self.refresh,
        };
        if self.width % 8 != 0 || !(256..=2288).contains(&self.width) {
            return Err(unsupported());
        }
        if !(60..=123).contains(&self.refresh) {
            return Err(unsupported());
        }
        let ar_bits = match self.aspect_ratio() {
            (8, 5) => 0x0,
            (4, 3) => 0x1,
            (5, 4) => 0x2,
            (16, 9) => 0x3,
            (x, y) => return Err(Error::UnsupportedAspectRatio(x, y)),
        };
        Ok([
            (self.width / 8 - 31) as u8,
            ar_bits << 6 | (self.refresh - 60) as u8,
        ])
    }
}

fn gcd(x: u32, y: u32) -> u32 {
    match y {
        0 => x,
        _ => gcd(y, x % y),
    }
}

/// What to put in a generated EDID.
#[derive(Clone, Debug, Default)]
pub struct DisplayInfo {
    /// Monitor name, cut to 13 characters.
    pub name: String,
    /// Detailed timings for the base block. The first one is the preferred mode.
    pub detailed: Vec<Mode>,
    pub standard: Vec<StandardTiming>,
    /// Established timings bitmap, bytes 0x23 to 0x25.
    pub established: [u8; 3],
    /// Detailed timings placed in a CEA-861 extension block. No extension when empty.
    pub extension_modes: Vec<Mode>,
}

/// A generated EDID, base block plus optional CEA extension.
pub struct EdidBytes {
    bytes: Vec<u8>,
}

impl EdidBytes {
    pub fn new(info: &DisplayInfo) -> Result<EdidBytes> {
        // One descriptor slot is kept for the monitor name.
        let max_detailed = DESCRIPTOR_OFFSETS.len() - 1;
        if info.detailed.len() > max_detailed {
            return Err(Error::TooManyTimings {
                kind: "detailed",
                count: info.detailed.len(),
                max: max_detailed,
            });
        }
        if info.standard.len() > STANDARD_TIMING_COUNT {
            return Err(Error::TooManyTimings {
                kind: "standard",
                count: info.standard.len(),
                max: STANDARD_TIMING_COUNT,
            });
        }
        if info.extension_modes.len() > CEA_MAX_DETAILED_TIMINGS {
            return Err(Error::TooManyTimings {
                kind: "extension",
                count: info.extension_modes.len(),
                max: CEA_MAX_DETAILED_TIMINGS,
            });
        }

        let mut edid = vec![0u8; EDID_BLOCK_LEN];
        populate_header(&mut edid);
        populate_edid_version(&mut edid);
        // Digital input, preferred timing in the first descriptor.
        edid[20] = 0x80;
        edid[FEATURES] = FEATURE_PREFERRED_TIMING;
        edid[ESTABLISHED_TIMINGS..ESTABLISHED_TIMINGS + 3].copy_from_slice(&info.established);
        populate_standard_timings(&mut edid, &info.standard)?;

        for (mode, &off) in info.detailed.iter().zip(DESCRIPTOR_OFFSETS.iter()) {
            encode_detailed_timing(mode, &mut edid[off..off + DESCRIPTOR_LEN])?;
        }
        let name_off = DESCRIPTOR_OFFSETS[max_detailed];
        populate_display_name(&mut edid[name_off..name_off + DESCRIPTOR_LEN], &info.name);

        if !info.extension_modes.is_empty() {
            edid[EXTENSION_COUNT] = 1;
            edid.extend_from_slice(&cea_extension(&info.extension_modes)?);
        }
        calculate_checksum(&mut edid, EDID_BLOCK_LEN - 1);

        Ok(EdidBytes { bytes: edid })
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Debug for EdidBytes {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.bytes[..].fmt(f)
    }
}

impl PartialEq for EdidBytes {
    fn eq(&self, other: &EdidBytes) -> bool {
        self.bytes[..] == other.bytes[..]
    }
}

fn populate_header(edid: &mut [u8]) {
    edid[..8].copy_from_slice(&EDID_HEADER);

    let manufacturer_name: [char; 3] = ['H', 'D', 'X'];
    // 00001 -> A, 00010 -> B, etc
    let manufacturer_id: u16 = manufacturer_name
        .iter()
        .map(|c| (*c as u8 - b'A' + 1) & 0x1F)
        .fold(0u16, |res, lsb| (res << 5) | (lsb as u16));
    edid[8..10].copy_from_slice(&manufacturer_id.to_be_bytes());

    let product_id: u16 = 1;
    edid[10..12].copy_from_slice(&product_id.to_le_bytes());

    let serial_id: u32 = 1;
    edid[12..16].copy_from_slice(&serial_id.to_le_bytes());

    edid[16] = 1;
    edid[17] = (2024u32 - 1990) as u8;
}

fn populate_edid_version(edid: &mut [u8]) {
    edid[18] = 1;
    edid[19] = 4;
}

fn populate_standard_timings(edid: &mut [u8], timings: &[StandardTiming]) -> Result<()> {
    for i in 0..STANDARD_TIMING_COUNT {
        let off = STANDARD_TIMINGS + i * 2;
        let bytes = match timings.get(i) {
            Some(timing) => timing.encode()?,
            // Unused
            None => [0x01, 0x01],
        };
        edid[off..off + 2].copy_from_slice(&bytes);
    }
    Ok(())
}

fn populate_display_name(descriptor: &mut [u8], name: &str) {
    descriptor[0..5].clone_from_slice(&[0x00, 0x00, 0x00, DESCRIPTOR_MONITOR_NAME, 0x00]);
    let text = &mut descriptor[5..];
    text.fill(0x20);
    let name = name.as_bytes();
    let len = name.len().min(MONITOR_NAME_LEN);
    text[..len].copy_from_slice(&name[..len]);
    if len < MONITOR_NAME_LEN {
        text[len] = 0x0A;
    }
}

fn cea_extension(modes: &[Mode]) -> Result<Vec<u8>> {
    let mut block = vec![0u8; EDID_BLOCK_LEN];
    block[0] = CEA_EXT;
    block[1] = 3;
    // No data blocks, detailed timings start right after the header.
    block[2] = 4;
    for (i, mode) in modes.iter().enumerate() {
        let off = 4 + i * DESCRIPTOR_LEN;
        encode_detailed_timing(mode, &mut block[off..off + DESCRIPTOR_LEN])?;
    }
    calculate_checksum(&mut block, EDID_BLOCK_LEN - 1);
    Ok(block)
}
