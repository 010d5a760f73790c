// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Finds out which modes the connected sink supports and which of those the transmitter can drive.

use base::debug;
use base::error;

use crate::edid::Edid;
use crate::hw::DdcBus;
use crate::mode::Mode;
use crate::mode::ModeFlags;
use crate::mode::ModeStatus;
use crate::modedb;
use crate::parameters::HardwareLimits;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectorStatus {
    Connected,
    Disconnected,
    /// No DDC bus, so presence cannot be told.
    Unknown,
}

pub struct ModeResolver {
    limits: HardwareLimits,
    ddc: Option<Box<dyn DdcBus>>,
}

impl ModeResolver {
    pub fn new(limits: HardwareLimits, ddc: Option<Box<dyn DdcBus>>) -> ModeResolver {
        ModeResolver { limits, ddc }
    }

    pub fn limits(&self) -> &HardwareLimits {
        &self.limits
    }

    pub fn has_ddc(&self) -> bool {
        self.ddc.is_some()
    }

    /// Lists the sink's modes.
    ///
    /// With a DDC bus this is whatever the EDID advertises, or nothing when the EDID cannot be read
    /// or is malformed. Without one it is the static fallback list.
    pub fn enumerate_modes(&mut self) -> Vec<Mode> {
        let ddc = match self.ddc.as_mut() {
            Some(ddc) => ddc,
            None => return self.fallback_modes(),
        };
        match Edid::read(ddc.as_mut()) {
            Ok(edid) => {
                debug!("read EDID: {:?}", edid);
                edid.modes()
            }
            Err(e) => {
                error!("failed to read EDID: {}", e);
                Vec::new()
            }
        }
    }

    /// DMT modes within the size limits at no more than 61 Hz, with the preferred size marked.
    pub fn fallback_modes(&self) -> Vec<Mode> {
        let mut modes = modedb::noedid_modes(self.limits.max_h, self.limits.max_v);
        modedb::set_preferred(&mut modes, self.limits.preferred_h, self.limits.preferred_v);
        modes
    }

    pub fn validate(&self, mode: &Mode) -> ModeStatus {
        if mode.flags.intersects(ModeFlags::UNSUPPORTED)
            || mode.clock_khz > self.limits.max_pixel_clock_khz
            || mode.hdisplay > self.limits.max_h
            || mode.vdisplay > self.limits.max_v
        {
            return ModeStatus::Bad;
        }
        ModeStatus::Ok
    }

    /// Probes the EDID EEPROM with a one byte read.
    pub fn detect(&mut self) -> ConnectorStatus {
        let ddc = match self.ddc.as_mut() {
            Some(ddc) => ddc,
            None => return ConnectorStatus::Unknown,
        };
        let mut probe = [0u8; 1];
        match ddc.read(0, 0, &mut probe) {
            Ok(()) => ConnectorStatus::Connected,
            Err(e) => {
                debug!("DDC probe failed: {}", e);
                ConnectorStatus::Disconnected
            }
        }
    }
}
