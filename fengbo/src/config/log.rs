// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => Self::Off,
            LogLevel::Error => Self::Error,
            LogLevel::Warn => Self::Warn,
            LogLevel::Info => Self::Info,
            LogLevel::Debug => Self::Debug,
            LogLevel::Trace => Self::Trace,
        }
    }
}

/// Log section in config.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Log {
    #[serde(default = "Log::default_level")]
    level: LogLevel,

    /// Also log to console.
    #[serde(default = "Log::default_console_log")]
    console_log: bool,

    /// Log file path; file logging is disabled when unset.
    #[serde(default)]
    log_file: Option<PathBuf>,
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            console_log: Self::default_console_log(),
            log_file: None,
        }
    }
}

impl Log {
    #[must_use]
    pub const fn default_level() -> LogLevel {
        LogLevel::Info
    }

    #[must_use]
    pub const fn default_console_log() -> bool {
        true
    }

    #[must_use]
    pub const fn level(&self) -> LogLevel {
        self.level
    }

    #[must_use]
    pub const fn console_log(&self) -> bool {
        self.console_log
    }

    #[must_use]
    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }
}
