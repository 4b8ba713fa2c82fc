mod cli;
mod commands;
mod session;

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use acr38_core::facade::{IsoProtocol, OpenParams};

use cli::{Cli, Protocol};
use session::ReaderSession;

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let mut session = match ReaderSession::load(&cli.lib.to_string_lossy()) {
        Ok(session) => session,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::from(1);
        }
    };

    log::info!(
        "loaded reader module version {}",
        session.library_version().unwrap_or_default()
    );

    let params = OpenParams {
        vid: cli.vid,
        pid: cli.pid,
        protocol: match cli.proto {
            Protocol::Auto => IsoProtocol::Auto,
            Protocol::T0 => IsoProtocol::T0,
            Protocol::T1 => IsoProtocol::T1,
        },
        detach_kernel_driver: !cli.no_detach,
        interface_hint: cli.iface,
        io_timeout: Duration::from_millis(cli.timeout),
    };

    if let Err(err) = session.open(&params) {
        eprintln!("error: {err}");
        return ExitCode::from(1);
    }

    let result = commands::run(&mut session, &cli.command, params.io_timeout);
    session.close();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(1)
        }
    }
}
