// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Process-wide logger setup.
//!
//! Components log through the `log` macros re-exported by this crate. Nothing is printed until
//! `syslog::init()` (or `init_with()`) installs the logger.
//!
//! # Examples
//!
//! ```
//! use base::syslog;
//! use base::warn;
//!
//! if let Err(e) = syslog::init() {
//!     println!("failed to initialize logging: {}", e);
//!     return;
//! }
//! warn!("this is your {} warning", "final");
//! ```

use std::fmt;
use std::io;
use std::io::Write;
use std::sync::Once;

use env_logger::fmt::Formatter;
use log::LevelFilter;
use log::Log;
use log::Metadata;
use log::Record;
use remain::sorted;
use thiserror::Error as ThisError;

/// Errors returned by `syslog::init()`.
#[sorted]
#[derive(ThisError, Debug)]
pub enum Error {
    /// Another logger was installed before us.
    #[error("a logger is already installed: {0}")]
    SetLogger(log::SetLoggerError),
}

/// Formats one record written to a `LogConfig::pipe`.
pub type PipeFormatter = fn(&mut Formatter, &Record<'_>) -> io::Result<()>;

macro_rules! CHRONO_TIMESTAMP_FIXED_FMT {
    () => {
        "%F %T%.9f"
    };
}

/// Logger configuration.
pub struct LogConfig {
    /// `env_logger` filter directives, e.g. `"info"` or `"warn,hdmi::scanout=debug"`.
    pub filter: &'static str,
    /// Echo records to stderr. Ignored when `pipe` is set.
    pub stderr: bool,
    /// Name printed in front of every record.
    pub proc_name: String,
    /// Alternative destination for records.
    pub pipe: Option<Box<dyn Write + Send>>,
    /// Replaces the default record format.
    pub pipe_formatter: Option<PipeFormatter>,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            filter: "info",
            stderr: true,
            proc_name: String::from("hdmi_tx"),
            pipe: None,
            pipe_formatter: None,
        }
    }
}

impl fmt::Debug for LogConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("LogConfig")
            .field("filter", &self.filter)
            .field("stderr", &self.stderr)
            .field("proc_name", &self.proc_name)
            .field("pipe", &self.pipe.is_some())
            .finish()
    }
}

/// The installed logger. Exposed so tests can drive it without touching the global logger.
pub struct State {
    logger: env_logger::Logger,
}

impl State {
    pub fn new(cfg: LogConfig) -> State {
        let mut builder = env_logger::Builder::new();
        builder.parse_filters(cfg.filter);

        let target = match cfg.pipe {
            Some(pipe) => env_logger::Target::Pipe(pipe),
            None if cfg.stderr => env_logger::Target::Stderr,
            None => env_logger::Target::Pipe(Box::new(io::sink())),
        };
        builder.target(target);

        match cfg.pipe_formatter {
            Some(formatter) => {
                builder.format(formatter);
            }
            None => {
                let proc_name = cfg.proc_name;
                builder.format(move |buf, record| {
                    write!(
                        buf,
                        "[{} {} {}",
                        chrono::Local::now().format(CHRONO_TIMESTAMP_FIXED_FMT!()),
                        record.level(),
                        proc_name
                    )?;
                    if let (Some(file), Some(line)) = (record.file(), record.line()) {
                        write!(buf, " {}:{}", file, line)?;
                    }
                    writeln!(buf, "] {}", record.args())
                });
            }
        }
        // https://github.com/env-logger-rs/env_logger/issues/208
        builder.is_test(true);

        State {
            logger: builder.build(),
        }
    }

    /// The most verbose level this logger lets through.
    pub fn filter(&self) -> LevelFilter {
        self.logger.filter()
    }
}

impl Default for State {
    fn default() -> Self {
        State::new(LogConfig::default())
    }
}

impl Log for State {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.logger.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if self.logger.matches(record) {
            self.logger.log(record);
        }
    }

    fn flush(&self) {
        self.logger.flush();
    }
}

/// Installs the default logger (info and above, to stderr).
///
/// This should only be called once per process. Later calls fail with `Error::SetLogger`.
pub fn init() -> Result<(), Error> {
    init_with(LogConfig::default())
}

/// Installs a logger built from `cfg`.
pub fn init_with(cfg: LogConfig) -> Result<(), Error> {
    let state = State::new(cfg);
    let max_level = state.filter();
    log::set_boxed_logger(Box::new(state)).map_err(Error::SetLogger)?;
    log::set_max_level(max_level);
    Ok(())
}

/// Installs a debug level stderr logger the first time it is called and does nothing afterwards.
pub fn test_only_ensure_inited() -> Result<(), Error> {
    static INIT: Once = Once::new();
    let mut result = Ok(());
    INIT.call_once(|| {
        result = init_with(LogConfig {
            filter: "debug",
            ..Default::default()
        });
    });
    result
}
