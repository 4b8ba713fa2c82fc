//! Command-line surface: one process, one reader session, one subcommand.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Host-side control tool for ACR38-family USB smart-card readers.
#[derive(Parser, Debug)]
#[command(name = "acr38", version, about)]
pub struct Cli {
    /// Path to the reader module (a `cdylib` exporting `create_reader`,
    /// `destroy_reader` and `reader_library_version`).
    #[arg(long, global = true)]
    pub lib: PathBuf,

    /// USB vendor ID to match, in hex or decimal.
    #[arg(long, global = true, default_value = "0x072F", value_parser = parse_u16)]
    pub vid: u16,

    /// USB product ID to match, in hex or decimal.
    #[arg(long, global = true, default_value = "0x9000", value_parser = parse_u16)]
    pub pid: u16,

    /// ISO protocol to request at power-on.
    #[arg(long, global = true, value_enum, default_value = "auto")]
    pub proto: Protocol,

    /// Restrict device matching to one USB interface number.
    #[arg(long, global = true)]
    pub iface: Option<u8>,

    /// I/O timeout in milliseconds for every transfer.
    #[arg(long, global = true, default_value_t = 2000)]
    pub timeout: u64,

    /// Don't detach a kernel driver already bound to the interface.
    #[arg(long, global = true)]
    pub no_detach: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum Protocol {
    Auto,
    T0,
    T1,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the opened reader's descriptive information.
    Info,
    /// Print the current card-presence state.
    Status,
    /// Power on (or warm-reset) the card and print its ATR.
    Poweron,
    /// Power off the card.
    Poweroff,
    /// Send one hex-encoded C-APDU and print the hex-encoded reply.
    Xfr {
        /// Hex-encoded command APDU, e.g. `00A4000C023F00`.
        apdu: String,
    },
    /// Block until the card-presence interrupt fires or the timeout elapses.
    Poll,
    /// Read every EF described by a layout document, saving each node's
    /// `saveAs` target under `--out`.
    ReadAll {
        #[arg(long)]
        layout: PathBuf,
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
    /// Run every node's `createApdus` script against a layout document.
    Markup {
        #[arg(long)]
        layout: PathBuf,
    },
}

fn parse_u16(raw: &str) -> Result<u16, String> {
    let raw = raw.trim();
    if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        u16::from_str_radix(hex, 16).map_err(|err| err.to_string())
    } else {
        raw.parse::<u16>().map_err(|err| err.to_string())
    }
}
