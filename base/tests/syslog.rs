// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::io;
use std::io::Write;
use std::sync::Arc;

use base::syslog::test_only_ensure_inited;
use base::syslog::LogConfig;
use base::syslog::State;
use env_logger::fmt;
use log::Level;
use log::Log;
use log::Record;
use sync::Mutex;

#[derive(Clone)]
struct MockWrite {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl MockWrite {
    fn new() -> Self {
        Self {
            buffer: Arc::new(Mutex::new(vec![])),
        }
    }

    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock()).into_owned()
    }
}

impl Write for MockWrite {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn pipe_formatter(buf: &mut fmt::Formatter, record: &Record<'_>) -> io::Result<()> {
    writeln!(buf, "{}", record.args())
}

fn log_at(state: &State, level: Level, message: &str) {
    state.log(
        &log::RecordBuilder::new()
            .level(level)
            .file(Some(file!()))
            .line(Some(line!()))
            .args(format_args!("{}", message))
            .build(),
    );
}

#[test]
fn macros() {
    test_only_ensure_inited().unwrap();
    log::error!("this is an error {}", 3);
    log::warn!("this is a warning {}", "uh oh");
    log::info!("this is info {}", true);
    log::debug!("this is debug info {:?}", Some("helpful stuff"));
}

#[test]
fn pipe_receives_formatted_records() {
    let output = MockWrite::new();
    let state = State::new(LogConfig {
        pipe: Some(Box::new(output.clone())),
        pipe_formatter: Some(pipe_formatter),
        ..Default::default()
    });

    log_at(&state, Level::Error, "failed to prepare dma descriptor");
    assert_eq!(output.contents(), "failed to prepare dma descriptor\n");
}

#[test]
fn default_format_carries_level_and_proc_name() {
    let output = MockWrite::new();
    let state = State::new(LogConfig {
        proc_name: String::from("syslog-test"),
        pipe: Some(Box::new(output.clone())),
        ..Default::default()
    });

    log_at(&state, Level::Warn, "no EDID bus");
    let line = output.contents();
    assert!(line.contains("WARN syslog-test"), "{}", line);
    assert!(line.ends_with("] no EDID bus\n"), "{}", line);
}

#[test]
fn filter_drops_lower_priorities() {
    let output = MockWrite::new();
    let state = State::new(LogConfig {
        filter: "warn",
        pipe: Some(Box::new(output.clone())),
        pipe_formatter: Some(pipe_formatter),
        ..Default::default()
    });

    log_at(&state, Level::Info, "dropped");
    log_at(&state, Level::Warn, "kept");
    assert_eq!(output.contents(), "kept\n");
}

#[test]
fn log_should_always_be_enabled_for_level_show_all() {
    let state = State::new(LogConfig {
        filter: "trace",
        ..Default::default()
    });

    assert!(state.enabled(
        log::RecordBuilder::new()
            .level(Level::Debug)
            .build()
            .metadata(),
    ));
}

#[test]
fn log_should_always_be_disabled_for_level_silent() {
    let state = State::new(LogConfig {
        filter: "off",
        ..Default::default()
    });

    assert!(!state.enabled(
        log::RecordBuilder::new()
            .level(Level::Error)
            .build()
            .metadata(),
    ));
}
