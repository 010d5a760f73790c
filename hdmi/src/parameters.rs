// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Transmitter limits, normally taken from the hardware description.

use std::fs;
use std::path::Path;

use remain::sorted;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

pub const DEFAULT_MAX_PIXEL_CLOCK_KHZ: u32 = 150000;
pub const DEFAULT_MAX_H: u32 = 1920;
pub const DEFAULT_MAX_V: u32 = 1080;
pub const DEFAULT_PREFERRED_H: u32 = 1280;
pub const DEFAULT_PREFERRED_V: u32 = 720;

#[sorted]
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to parse limits: {0}")]
    Parse(serde_json::Error),
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

fn default_max_pixel_clock_khz() -> u32 {
    DEFAULT_MAX_PIXEL_CLOCK_KHZ
}

fn default_max_h() -> u32 {
    DEFAULT_MAX_H
}

fn default_max_v() -> u32 {
    DEFAULT_MAX_V
}

fn default_preferred_h() -> u32 {
    DEFAULT_PREFERRED_H
}

fn default_preferred_v() -> u32 {
    DEFAULT_PREFERRED_V
}

/// What the transmitter can drive, and the mode to offer first when the sink cannot tell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct HardwareLimits {
    #[serde(rename = "fmax", default = "default_max_pixel_clock_khz")]
    pub max_pixel_clock_khz: u32,
    #[serde(rename = "hmax", default = "default_max_h")]
    pub max_h: u32,
    #[serde(rename = "vmax", default = "default_max_v")]
    pub max_v: u32,
    #[serde(rename = "hpref", default = "default_preferred_h")]
    pub preferred_h: u32,
    #[serde(rename = "vpref", default = "default_preferred_v")]
    pub preferred_v: u32,
}

impl Default for HardwareLimits {
    fn default() -> Self {
        HardwareLimits {
            max_pixel_clock_khz: DEFAULT_MAX_PIXEL_CLOCK_KHZ,
            max_h: DEFAULT_MAX_H,
            max_v: DEFAULT_MAX_V,
            preferred_h: DEFAULT_PREFERRED_H,
            preferred_v: DEFAULT_PREFERRED_V,
        }
    }
}

impl HardwareLimits {
    pub fn from_json_str(s: &str) -> Result<HardwareLimits> {
        serde_json::from_str(s).map_err(Error::Parse)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<HardwareLimits> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| Error::Read {
            path: path.display().to_string(),
            source,
        })?;
        HardwareLimits::from_json_str(&contents)
    }
}
