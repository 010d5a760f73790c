// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Brings the pixel clock and the timing generator up and down around a mode.

use std::sync::Arc;
use std::time::Duration;

use base::debug;
use base::info;
use base::Delay;
use remain::sorted;
use thiserror::Error;

use crate::hw;
use crate::hw::PixelClock;
use crate::hw::TimingGenerator;
use crate::mode::Mode;
use crate::mode::VideoMode;
use crate::pipeline::PipelineState;

#[sorted]
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to enable pixel clock: {0}")]
    ClockEnable(hw::Error),
    #[error("failed to set pixel clock to {rate} Hz: {source}")]
    ClockRate { rate: u64, source: hw::Error },
    #[error("mode has no usable frame rate: {0}")]
    InvalidTiming(String),
    #[error("timing generator failed: {0}")]
    TimingGenerator(hw::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimingState {
    Disabled,
    Enabled,
}

/// Frames per second of `mode`, truncated. 0 when the mode has no totals.
pub fn refresh_hz(mode: &Mode) -> u64 {
    let frame = mode.htotal as u64 * mode.vtotal as u64;
    if frame == 0 {
        return 0;
    }
    mode.clock_khz as u64 * 1000 / frame
}

/// How long the link needs after enabling before it carries a stable picture: one frame, rounded up
/// to whole milliseconds.
pub fn settle_delay(mode: &Mode) -> Option<Duration> {
    match refresh_hz(mode) {
        0 => None,
        refresh => Some(Duration::from_millis((1000 + refresh - 1) / refresh)),
    }
}

// The generator is released before the clock that feeds it.
pub struct TimingController {
    vtc: Option<Box<dyn TimingGenerator>>,
    clock: Box<dyn PixelClock>,
    delay: Arc<dyn Delay>,
    state: TimingState,
}

impl TimingController {
    pub fn new(
        clock: Box<dyn PixelClock>,
        vtc: Option<Box<dyn TimingGenerator>>,
        delay: Arc<dyn Delay>,
    ) -> TimingController {
        TimingController {
            vtc,
            clock,
            delay,
            state: TimingState::Disabled,
        }
    }

    pub fn state(&self) -> TimingState {
        self.state
    }

    /// Programs the generator and the clock for `mode`, starts both, then blocks for one frame.
    ///
    /// Does nothing when already enabled. On failure everything started so far is stopped again
    /// and the state is left disabled.
    pub fn enable(&mut self, state: &mut PipelineState, mode: &Mode) -> Result<()> {
        if self.state == TimingState::Enabled {
            debug!("timing already enabled");
            return Ok(());
        }
        let settle = settle_delay(mode).ok_or_else(|| Error::InvalidTiming(mode.to_string()))?;

        state.active_mode = Some(*mode);
        if let Err(e) = self.start(state, mode) {
            self.stop(state);
            return Err(e);
        }
        self.state = TimingState::Enabled;
        info!("enabled {}, settling for {:?}", mode, settle);

        self.delay.sleep(settle);
        Ok(())
    }

    fn start(&mut self, state: &mut PipelineState, mode: &Mode) -> Result<()> {
        if let Some(vtc) = self.vtc.as_mut() {
            let timing = VideoMode::from(mode);
            vtc.set_timing(&timing).map_err(Error::TimingGenerator)?;
            vtc.enable().map_err(Error::TimingGenerator)?;
        }
        self.set_rate(mode)?;
        if !state.clock_enabled {
            self.clock.prepare_enable().map_err(Error::ClockEnable)?;
            state.clock_enabled = true;
        }
        Ok(())
    }

    fn stop(&mut self, state: &mut PipelineState) {
        if let Some(vtc) = self.vtc.as_mut() {
            vtc.disable();
        }
        if state.clock_enabled {
            self.clock.disable_unprepare();
            state.clock_enabled = false;
        }
        state.active_mode = None;
    }

    fn set_rate(&mut self, mode: &Mode) -> Result<()> {
        let rate = mode.clock_khz as u64 * 1000;
        self.clock
            .set_rate(rate)
            .map_err(|source| Error::ClockRate { rate, source })
    }

    /// Stops the generator and the clock. Does nothing when already disabled.
    pub fn disable(&mut self, state: &mut PipelineState) {
        if self.state == TimingState::Disabled {
            debug!("timing already disabled");
            return;
        }
        self.stop(state);
        self.state = TimingState::Disabled;
        info!("disabled");
    }

    /// Switches a running pipeline to `mode` by changing the pixel clock rate.
    ///
    /// The timing generator keeps the timings it was enabled with and there is no settle delay.
    /// Ignored while disabled, the next `enable` programs the mode in full.
    pub fn set_mode(&mut self, state: &mut PipelineState, mode: &Mode) -> Result<()> {
        if self.state == TimingState::Disabled {
            debug!("ignoring mode set while disabled");
            return Ok(());
        }
        self.set_rate(mode)?;
        state.active_mode = Some(*mode);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use base::FakeClock;

    use super::*;
    use crate::fakes::Call;
    use crate::fakes::CallLog;
    use crate::fakes::FakePixelClock;
    use crate::fakes::FakeTimingGenerator;
    use crate::modedb::DMT_MODES;

    const MODE_720P: Mode = DMT_MODES[12];
    const MODE_1080P: Mode = DMT_MODES[22];

    struct Harness {
        timing: TimingController,
        state: PipelineState,
        log: CallLog,
        delay: Arc<FakeClock>,
    }

    fn harness(with_vtc: bool) -> Harness {
        let log = CallLog::default();
        let delay = Arc::new(FakeClock::new());
        let vtc = if with_vtc {
            Some(Box::new(FakeTimingGenerator::new(log.clone())) as Box<dyn TimingGenerator>)
        } else {
            None
        };
        Harness {
            timing: TimingController::new(
                Box::new(FakePixelClock::new(log.clone())),
                vtc,
                delay.clone(),
            ),
            state: PipelineState::default(),
            log,
            delay,
        }
    }

    #[test]
    fn settle_delay_720p() {
        assert_eq!(MODE_720P.clock_khz, 74250);
        assert_eq!((MODE_720P.htotal, MODE_720P.vtotal), (1650, 750));
        assert_eq!(refresh_hz(&MODE_720P), 60);
        assert_eq!(settle_delay(&MODE_720P), Some(Duration::from_millis(17)));
    }

    #[test]
    fn settle_delay_rounds_up() {
        // 75.03 Hz truncates to 75, 1000 / 75 is 13.3 ms.
        let mode = DMT_MODES[10];
        assert_eq!(refresh_hz(&mode), 75);
        assert_eq!(settle_delay(&mode), Some(Duration::from_millis(14)));

        let empty = Mode::new(74250, 1280, 0, 0, 0, 720, 0, 0, 0, Default::default());
        assert_eq!(settle_delay(&empty), None);
    }

    #[test]
    fn enable_sequence() {
        let mut h = harness(true);
        h.timing.enable(&mut h.state, &MODE_720P).unwrap();

        assert_eq!(
            h.log.take(),
            vec![
                Call::SetTiming(VideoMode::from(&MODE_720P)),
                Call::TimingEnable,
                Call::SetRate(74_250_000),
                Call::ClockEnable,
            ]
        );
        assert_eq!(h.delay.sleeps(), vec![Duration::from_millis(17)]);
        assert!(h.state.clock_enabled());
        assert_eq!(h.state.active_mode(), Some(&MODE_720P));
        assert_eq!(h.timing.state(), TimingState::Enabled);
    }

    #[test]
    fn enable_twice_is_noop() {
        let mut h = harness(false);
        h.timing.enable(&mut h.state, &MODE_720P).unwrap();
        h.log.take();
        h.timing.enable(&mut h.state, &MODE_1080P).unwrap();
        assert!(h.log.take().is_empty());
        assert_eq!(h.state.active_mode(), Some(&MODE_720P));
        assert_eq!(h.delay.sleeps().len(), 1);
    }

    #[test]
    fn enable_then_disable() {
        let mut h = harness(true);
        h.timing.enable(&mut h.state, &MODE_720P).unwrap();
        h.log.take();

        h.timing.disable(&mut h.state);
        assert!(!h.state.clock_enabled());
        assert_eq!(h.state.active_mode(), None);
        assert_eq!(h.log.take(), vec![Call::TimingDisable, Call::ClockDisable]);

        h.timing.disable(&mut h.state);
        assert!(h.log.take().is_empty());
        assert_eq!(h.timing.state(), TimingState::Disabled);
    }

    #[test]
    fn disable_before_enable_is_noop() {
        let mut h = harness(true);
        h.timing.disable(&mut h.state);
        assert!(h.log.take().is_empty());
    }

    #[test]
    fn failed_clock_enable_rolls_back() {
        let log = CallLog::default();
        let mut clock = FakePixelClock::new(log.clone());
        clock.fail_enable = true;
        let mut timing = TimingController::new(
            Box::new(clock),
            Some(Box::new(FakeTimingGenerator::new(log.clone()))),
            Arc::new(FakeClock::new()),
        );
        let mut state = PipelineState::default();

        assert!(matches!(
            timing.enable(&mut state, &MODE_720P),
            Err(Error::ClockEnable(_))
        ));
        assert_eq!(timing.state(), TimingState::Disabled);
        assert!(!state.clock_enabled());
        assert_eq!(state.active_mode(), None);
        assert_eq!(log.take().last(), Some(&Call::TimingDisable));
    }

    #[test]
    fn refused_rate_rolls_back() {
        let log = CallLog::default();
        let mut clock = FakePixelClock::new(log.clone());
        clock.max_rate = Some(100_000_000);
        let delay = Arc::new(FakeClock::new());
        let mut timing = TimingController::new(
            Box::new(clock),
            Some(Box::new(FakeTimingGenerator::new(log.clone()))),
            delay.clone(),
        );
        let mut state = PipelineState::default();

        assert!(matches!(
            timing.enable(&mut state, &MODE_1080P),
            Err(Error::ClockRate {
                rate: 148_500_000,
                ..
            })
        ));
        assert_eq!(
            log.take(),
            vec![
                Call::SetTiming(VideoMode::from(&MODE_1080P)),
                Call::TimingEnable,
                Call::TimingDisable,
            ]
        );
        assert_eq!(timing.state(), TimingState::Disabled);
        assert!(!state.clock_enabled());
        assert_eq!(state.active_mode(), None);
        assert!(delay.sleeps().is_empty());

        // The controller is usable again with a rate the clock accepts.
        timing.enable(&mut state, &MODE_720P).unwrap();
        assert_eq!(timing.state(), TimingState::Enabled);
    }

    #[test]
    fn rejected_timing_disables_generator() {
        let log = CallLog::default();
        let mut vtc = FakeTimingGenerator::new(log.clone());
        vtc.fail_set_timing = true;
        let mut timing = TimingController::new(
            Box::new(FakePixelClock::new(log.clone())),
            Some(Box::new(vtc)),
            Arc::new(FakeClock::new()),
        );
        let mut state = PipelineState::default();

        assert!(matches!(
            timing.enable(&mut state, &MODE_720P),
            Err(Error::TimingGenerator(_))
        ));
        assert_eq!(log.take(), vec![Call::TimingDisable]);
        assert_eq!(timing.state(), TimingState::Disabled);
        assert!(!state.clock_enabled());
        assert_eq!(state.active_mode(), None);
    }

    #[test]
    fn refused_mode_set_keeps_mode() {
        let log = CallLog::default();
        let mut clock = FakePixelClock::new(log.clone());
        clock.max_rate = Some(100_000_000);
        let mut timing = TimingController::new(Box::new(clock), None, Arc::new(FakeClock::new()));
        let mut state = PipelineState::default();
        timing.enable(&mut state, &MODE_720P).unwrap();
        log.take();

        assert!(matches!(
            timing.set_mode(&mut state, &MODE_1080P),
            Err(Error::ClockRate { .. })
        ));
        assert!(log.take().is_empty());
        assert_eq!(state.active_mode(), Some(&MODE_720P));
        assert!(state.clock_enabled());
        assert_eq!(timing.state(), TimingState::Enabled);
    }

    #[test]
    fn invalid_timing_touches_nothing() {
        let mut h = harness(true);
        let mode = Mode {
            htotal: 0,
            ..MODE_720P
        };
        assert!(matches!(
            h.timing.enable(&mut h.state, &mode),
            Err(Error::InvalidTiming(_))
        ));
        assert!(h.log.take().is_empty());
        assert_eq!(h.state.active_mode(), None);
    }

    #[test]
    fn set_mode_changes_rate_only() {
        let mut h = harness(true);
        h.timing.set_mode(&mut h.state, &MODE_1080P).unwrap();
        assert!(h.log.take().is_empty());

        h.timing.enable(&mut h.state, &MODE_720P).unwrap();
        h.log.take();
        h.timing.set_mode(&mut h.state, &MODE_1080P).unwrap();
        assert_eq!(h.log.take(), vec![Call::SetRate(148_500_000)]);
        assert_eq!(h.state.active_mode(), Some(&MODE_1080P));
        assert_eq!(h.delay.sleeps().len(), 1);
    }
}
