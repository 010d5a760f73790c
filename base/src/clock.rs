// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

// Time sources for code that has to wait on hardware, plus a fake clock whose sleeps only advance
// a counter so tests can observe how long a caller would have blocked.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use sync::Mutex;

/// Something that can block the calling thread for a period of time.
pub trait Delay: Send + Sync {
    /// Blocks the caller for at least `duration`.
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Copy, Clone)]
pub struct Clock {}

impl Clock {
    pub fn new() -> Self {
        Clock {}
    }

    pub fn now(&self) -> Instant {
        Instant::now()
    }
}

impl Delay for Clock {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// A fake clock that can be used in tests to give exact control over the time.
///
/// Sleeping on a `FakeClock` returns immediately and advances its time by the requested amount.
/// Every requested sleep is recorded in order.
#[derive(Debug)]
pub struct FakeClock {
    epoch: Instant,
    ns_since_epoch: AtomicU64,
    sleeps: Mutex<Vec<Duration>>,
}

impl FakeClock {
    pub fn new() -> Self {
        FakeClock {
            epoch: Instant::now(),
            ns_since_epoch: AtomicU64::new(0),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    /// Get the current time, according to this clock.
    pub fn now(&self) -> Instant {
        self.epoch + Duration::from_nanos(self.nanos())
    }

    ///  Get the current time in ns, according to this clock.
    pub fn nanos(&self) -> u64 {
        self.ns_since_epoch.load(Ordering::SeqCst)
    }

    pub fn add_ns(&self, ns: u64) {
        self.ns_since_epoch.fetch_add(ns, Ordering::SeqCst);
    }

    /// Returns every sleep requested so far, oldest first.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Delay for FakeClock {
    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        self.add_ns(duration.as_nanos() as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_sleep_advances_time() {
        let clock = FakeClock::new();
        let start = clock.now();
        clock.sleep(Duration::from_millis(17));
        clock.sleep(Duration::from_millis(3));

        assert_eq!(clock.nanos(), 20_000_000);
        assert_eq!(clock.now() - start, Duration::from_millis(20));
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(17), Duration::from_millis(3)]
        );
    }

    #[test]
    fn real_clock_sleeps_at_least_requested() {
        let clock = Clock::new();
        let start = clock.now();
        clock.sleep(Duration::from_millis(2));
        assert!(clock.now() - start >= Duration::from_millis(2));
    }
}
