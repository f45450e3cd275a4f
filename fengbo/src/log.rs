// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Initialize log4rs from the `[log]` config section.

use log4rs::append::console::ConsoleAppender;
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config as LogConfig, Root};
use log4rs::encode::pattern::PatternEncoder;

use crate::config::Log;
use crate::error::{Error, ErrorKind};

const LOG_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S)} {l} {t} - {m}{n}";

/// Initialize the global logger.
///
/// # Errors
///
/// Returns error if the log file cannot be created or the logger is
/// already initialized.
pub fn init_log(config: &Log) -> Result<(), Error> {
    let mut builder = LogConfig::builder();
    let mut root = Root::builder();

    if config.console_log() {
        let stdout = ConsoleAppender::builder()
            .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
            .build();
        builder = builder.appender(Appender::builder().build("stdout", Box::new(stdout)));
        root = root.appender("stdout");
    }

    if let Some(log_file) = config.log_file() {
        let file = FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
            .build(log_file)
            .map_err(|err| {
                Error::from_string(
                    ErrorKind::LoggerError,
                    format!("Failed to create log file {log_file:?}, err: {err:?}"),
                )
            })?;
        builder = builder.appender(Appender::builder().build("file", Box::new(file)));
        root = root.appender("file");
    }

    let log_config = builder
        .build(root.build(config.level().into()))
        .map_err(|err| {
            Error::from_string(ErrorKind::LoggerError, format!("Invalid log config: {err:?}"))
        })?;

    log4rs::init_config(log_config).map_err(|err| {
        Error::from_string(
            ErrorKind::LoggerError,
            format!("Failed to init logger: {err:?}"),
        )
    })?;
    Ok(())
}
