// Copyright 2020 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Small host-side facilities shared by the display pipeline crates: logging and time.

mod clock;
pub mod syslog;

pub use clock::Clock;
pub use clock::Delay;
pub use clock::FakeClock;
pub use log::debug;
pub use log::error;
pub use log::info;
pub use log::trace;
pub use log::warn;
