//! Subcommand handlers. Each takes the already-opened session and the
//! parsed CLI arguments it needs.

use std::time::Duration;

use acr38_core::facade::ReaderInfo;
use acr38_core::hex;
use acr38_core::layout::Layout;
use acr38_core::traversal;

use crate::cli::Command;
use crate::session::ReaderSession;

/// Runs the subcommand the user selected, printing results to stdout and
/// logging progress at `info!`.
///
/// # Errors
/// Returns whatever the underlying reader/traversal call reported.
pub fn run(session: &mut ReaderSession, command: &Command, timeout: Duration) -> Result<(), acr38_core::error::ReaderError> {
    match command {
        Command::Info => {
            print_info(&session.info());
            Ok(())
        }
        Command::Status => {
            let presence = session.card_status()?;
            println!("{presence:?}");
            Ok(())
        }
        Command::Poweron => {
            let atr = acr38_core::traversal::Transmit::power_on(session, timeout)?;
            println!("ATR: {}", hex::bytes_to_hex(&atr));
            Ok(())
        }
        Command::Poweroff => session.power_off(),
        Command::Xfr { apdu } => {
            let capdu = hex::hex_to_bytes(apdu)?;
            let resp = acr38_core::traversal::Transmit::transmit(session, &capdu, timeout)?;
            println!("{}", hex::bytes_to_hex(&resp));
            Ok(())
        }
        Command::Poll => {
            let changed = session.wait_card_event(timeout)?;
            println!("{}", if changed { "event" } else { "timeout" });
            Ok(())
        }
        Command::ReadAll { layout, out } => {
            let layout = Layout::from_path(layout)?;
            traversal::read_all(session, &layout, out, timeout, &mut |msg| log::info!("{msg}"))
        }
        Command::Markup { layout } => {
            let layout = Layout::from_path(layout)?;
            traversal::markup_card(session, &layout, timeout, &mut |msg| log::info!("{msg}"))
        }
    }
}

fn print_info(info: &ReaderInfo) {
    println!("name:    {}", info.name);
    println!("vid:pid: 0x{:04x}:0x{:04x}", info.vid, info.pid);
    println!("backend: {:?}", info.backend);
    println!("bulk in/out: 0x{:02x}/0x{:02x}", info.bulk_in, info.bulk_out);
    match info.intr_in {
        Some(ep) => println!("interrupt in: 0x{ep:02x}"),
        None => println!("interrupt in: none"),
    }
}
