// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use fengbo::config::Config;
use fengbo::error::{Error, ErrorKind};
use fengbo::log::init_log;
use fengbo::server::Server;

/// An MQTT broker speaking protocol versions 3.1, 3.1.1 and 5.0.
#[derive(Debug, Parser)]
#[command(name = "fengbo", version, about)]
struct Arguments {
    /// Path to the config file.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Check the config file and exit.
    #[arg(short, long)]
    test: bool,
}

fn load_config(arguments: &Arguments) -> Result<Config, Error> {
    match &arguments.config {
        Some(path) => Config::load(path),
        None => Ok(Config::default()),
    }
}

fn run() -> Result<(), Error> {
    let arguments = Arguments::parse();
    let config = load_config(&arguments)?;

    if arguments.test {
        println!("Config file is ok");
        return Ok(());
    }

    init_log(config.log())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| {
            Error::from_string(
                ErrorKind::IoError,
                format!("Failed to build tokio runtime: {err:?}"),
            )
        })?;

    let server = Server::new(config);
    runtime.block_on(server.run())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}
