// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Display timings as negotiated with the sink, and their timing generator representation.

use std::fmt;
use std::fmt::Display;

use bitflags::bitflags;

bitflags! {
    /// Signal properties of a `Mode`.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ModeFlags: u32 {
        const PHSYNC = 1 << 0;
        const NHSYNC = 1 << 1;
        const PVSYNC = 1 << 2;
        const NVSYNC = 1 << 3;
        const INTERLACE = 1 << 4;
        const DBLSCAN = 1 << 5;
        const DBLCLK = 1 << 12;
        /// Any stereoscopic 3D layout.
        const STEREO_3D = 1 << 14;

        /// Properties the transmitter cannot produce.
        const UNSUPPORTED = Self::INTERLACE.bits() | Self::DBLCLK.bits() | Self::STEREO_3D.bits();
    }
}

/// A complete display timing. Clock is in kHz, everything else in pixels or lines.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Mode {
    pub clock_khz: u32,
    pub hdisplay: u32,
    pub hsync_start: u32,
    pub hsync_end: u32,
    pub htotal: u32,
    pub vdisplay: u32,
    pub vsync_start: u32,
    pub vsync_end: u32,
    pub vtotal: u32,
    pub flags: ModeFlags,
    /// The sink (or the fallback configuration) prefers this mode.
    pub preferred: bool,
}

impl Mode {
    #[allow(clippy::too_many_arguments)]
    pub const fn new(
        clock_khz: u32,
        hdisplay: u32,
        hsync_start: u32,
        hsync_end: u32,
        htotal: u32,
        vdisplay: u32,
        vsync_start: u32,
        vsync_end: u32,
        vtotal: u32,
        flags: ModeFlags,
    ) -> Mode {
        Mode {
            clock_khz,
            hdisplay,
            hsync_start,
            hsync_end,
            htotal,
            vdisplay,
            vsync_start,
            vsync_end,
            vtotal,
            flags,
            preferred: false,
        }
    }

    /// Vertical refresh rate in Hz, rounded to the closest integer.
    pub fn vrefresh(&self) -> u32 {
        let mut num = self.clock_khz as u64 * 1000;
        let mut den = self.htotal as u64 * self.vtotal as u64;
        if den == 0 {
            return 0;
        }
        if self.flags.contains(ModeFlags::INTERLACE) {
            num *= 2;
        }
        if self.flags.contains(ModeFlags::DBLSCAN) {
            den *= 2;
        }
        ((num + den / 2) / den) as u32
    }

    /// Checks that the sync and blanking positions are ordered and the mode has a clock.
    pub fn has_sane_timings(&self) -> bool {
        self.clock_khz != 0
            && self.hdisplay != 0
            && self.vdisplay != 0
            && self.hdisplay <= self.hsync_start
            && self.hsync_start <= self.hsync_end
            && self.hsync_end <= self.htotal
            && self.vdisplay <= self.vsync_start
            && self.vsync_start <= self.vsync_end
            && self.vsync_end <= self.vtotal
    }

    /// Compares timings and flags, ignoring the preferred marker.
    pub fn same_timing(&self, other: &Mode) -> bool {
        Mode {
            preferred: false,
            ..*self
        } == Mode {
            preferred: false,
            ..*other
        }
    }

    pub fn name(&self) -> String {
        let scan = if self.flags.contains(ModeFlags::INTERLACE) {
            "i"
        } else {
            ""
        };
        format!("{}x{}{}", self.hdisplay, self.vdisplay, scan)
    }
}

impl Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "\"{}\" {}Hz {} {} {} {} {} {} {} {} {} {:#x}",
            self.name(),
            self.vrefresh(),
            self.clock_khz,
            self.hdisplay,
            self.hsync_start,
            self.hsync_end,
            self.htotal,
            self.vdisplay,
            self.vsync_start,
            self.vsync_end,
            self.vtotal,
            self.flags.bits()
        )
    }
}

/// Result of checking a mode against the transmitter's limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeStatus {
    Ok,
    Bad,
}

bitflags! {
    /// Signal properties in the form the timing generator consumes them.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct DisplayFlags: u32 {
        const HSYNC_LOW = 1 << 0;
        const HSYNC_HIGH = 1 << 1;
        const VSYNC_LOW = 1 << 2;
        const VSYNC_HIGH = 1 << 3;
        const INTERLACED = 1 << 8;
        const DOUBLESCAN = 1 << 9;
        const DOUBLECLK = 1 << 10;
    }
}

/// Porch and sync lengths rather than positions; the timing generator's native format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VideoMode {
    pub pixelclock_hz: u64,
    pub hactive: u32,
    pub hfront_porch: u32,
    pub hback_porch: u32,
    pub hsync_len: u32,
    pub vactive: u32,
    pub vfront_porch: u32,
    pub vback_porch: u32,
    pub vsync_len: u32,
    pub flags: DisplayFlags,
}

impl From<&Mode> for VideoMode {
    fn from(mode: &Mode) -> Self {
        let mut flags = DisplayFlags::empty();
        if mode.flags.contains(ModeFlags::PHSYNC) {
            flags |= DisplayFlags::HSYNC_HIGH;
        } else if mode.flags.contains(ModeFlags::NHSYNC) {
            flags |= DisplayFlags::HSYNC_LOW;
        }
        if mode.flags.contains(ModeFlags::PVSYNC) {
            flags |= DisplayFlags::VSYNC_HIGH;
        } else if mode.flags.contains(ModeFlags::NVSYNC) {
            flags |= DisplayFlags::VSYNC_LOW;
        }
        if mode.flags.contains(ModeFlags::INTERLACE) {
            flags |= DisplayFlags::INTERLACED;
        }
        if mode.flags.contains(ModeFlags::DBLSCAN) {
            flags |= DisplayFlags::DOUBLESCAN;
        }
        if mode.flags.contains(ModeFlags::DBLCLK) {
            flags |= DisplayFlags::DOUBLECLK;
        }

        VideoMode {
            pixelclock_hz: mode.clock_khz as u64 * 1000,
            hactive: mode.hdisplay,
            hfront_porch: mode.hsync_start.saturating_sub(mode.hdisplay),
            hback_porch: mode.htotal.saturating_sub(mode.hsync_end),
            hsync_len: mode.hsync_end.saturating_sub(mode.hsync_start),
            vactive: mode.vdisplay,
            vfront_porch: mode.vsync_start.saturating_sub(mode.vdisplay),
            vback_porch: mode.vtotal.saturating_sub(mode.vsync_end),
            vsync_len: mode.vsync_end.saturating_sub(mode.vsync_start),
            flags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODE_1080P: Mode = Mode::new(
        148500,
        1920,
        2008,
        2052,
        2200,
        1080,
        1084,
        1089,
        1125,
        ModeFlags::PHSYNC.union(ModeFlags::PVSYNC),
    );

    #[test]
    fn vrefresh_rounds_to_closest() {
        assert_eq!(MODE_1080P.vrefresh(), 60);
        let vga = Mode::new(
            25175,
            640,
            656,
            752,
            800,
            480,
            490,
            492,
            525,
            ModeFlags::NHSYNC.union(ModeFlags::NVSYNC),
        );
        // 59.94 Hz
        assert_eq!(vga.vrefresh(), 60);
    }

    #[test]
    fn vrefresh_of_empty_mode_is_zero() {
        let mode = Mode::new(0, 0, 0, 0, 0, 0, 0, 0, 0, ModeFlags::empty());
        assert_eq!(mode.vrefresh(), 0);
        assert!(!mode.has_sane_timings());
    }

    #[test]
    fn videomode_porches() {
        let vm = VideoMode::from(&MODE_1080P);
        assert_eq!(vm.pixelclock_hz, 148_500_000);
        assert_eq!(vm.hfront_porch, 88);
        assert_eq!(vm.hsync_len, 44);
        assert_eq!(vm.hback_porch, 148);
        assert_eq!(vm.vfront_porch, 4);
        assert_eq!(vm.vsync_len, 5);
        assert_eq!(vm.vback_porch, 36);
        assert_eq!(vm.flags, DisplayFlags::HSYNC_HIGH | DisplayFlags::VSYNC_HIGH);
    }

    #[test]
    fn same_timing_ignores_preferred() {
        let preferred = Mode {
            preferred: true,
            ..MODE_1080P
        };
        assert!(preferred.same_timing(&MODE_1080P));
        assert_ne!(preferred, MODE_1080P);
    }

    #[test]
    fn display_names_interlaced_modes() {
        let mode = Mode {
            flags: ModeFlags::INTERLACE,
            ..MODE_1080P
        };
        assert_eq!(mode.name(), "1920x1080i");
        assert!(MODE_1080P.to_string().starts_with("\"1920x1080\" 60Hz 148500"));
    }
}
