use std::{path::PathBuf, process::ExitCode};

use clap::{Args, Parser, Subcommand};
use clap_num::maybe_hex;

use dfu::{DeviceFilter, DfuseOptions, DownloadOptions};
use error::CliError;
use info::*;
use list::*;
use write::*;

mod error;
mod info;
mod list;
mod write;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct DeviceArgs {
    /// vendor ID (ex: "0483")
    #[clap(short, long, value_parser=hex_u16)]
    vendor: Option<u16>,
    /// product ID (ex: "df11")
    #[clap(short, long, value_parser=hex_u16)]
    product: Option<u16>,
    /// USB bus the device is attached to (ex: "1-4")
    #[clap(short, long)]
    bus: Option<String>,
    /// serial number
    #[clap(short, long)]
    serial: Option<String>,
    /// interface number
    #[clap(short, long, value_parser=maybe_hex::<u8>)]
    interface: Option<u8>,
    /// alternate setting
    #[clap(short, long, value_parser=maybe_hex::<u8>)]
    alt_setting: Option<u8>,
}

impl DeviceArgs {
    fn filter(&self) -> DeviceFilter {
        DeviceFilter {
            bus_id: self.bus.clone(),
            interface: self.interface,
            alt_setting: self.alt_setting,
            serial: self.serial.clone(),
            ..DeviceFilter::with_id(self.vendor, self.product)
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// list DFU devices
    List {
        #[command(flatten)]
        device: DeviceArgs,
    },
    /// inspect a firmware file
    Info {
        /// DFU or raw binary file
        file: PathBuf,
    },
    /// write a firmware file to a device
    Write {
        /// DFU or raw binary file
        file: PathBuf,
        #[command(flatten)]
        device: DeviceArgs,
        /// use the DfuSe protocol even if not advertised
        #[clap(long)]
        dfuse: bool,
        /// erase the whole flash first (requires --force)
        #[clap(long)]
        mass_erase: bool,
        /// lift flash read protection, erasing the flash (requires --force)
        #[clap(long)]
        unprotect: bool,
        /// allow destructive operations
        #[clap(long)]
        force: bool,
        /// jump to the flashed firmware when done
        #[clap(long)]
        leave: bool,
        /// detach and reset once the download finished
        #[clap(long)]
        reset: bool,
    },
}

impl Default for Commands {
    fn default() -> Self {
        Commands::List {
            device: DeviceArgs {
                vendor: None,
                product: None,
                bus: None,
                serial: None,
                interface: None,
                alt_setting: None,
            },
        }
    }
}

fn hex_u16(s: &str) -> Result<u16, String> {
    <u16>::from_str_radix(s, 16).map_err(|e| format!("{e}"))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::init();

    if let Err(err) = match &cli.command.unwrap_or_default() {
        Commands::List { device } => list_dfu_devices(&device.filter()),
        Commands::Info { file } => show_file(file),
        Commands::Write {
            file,
            device,
            dfuse,
            mass_erase,
            unprotect,
            force,
            leave,
            reset,
        } => {
            let options = DownloadOptions {
                force_dfuse: *dfuse,
                dfuse: DfuseOptions {
                    mass_erase: *mass_erase,
                    unprotect: *unprotect,
                    force: *force,
                    leave: *leave,
                },
                reset_after: *reset,
            };
            write_file(file, device.filter(), options)
        }
    } {
        eprintln!("Error: {err}");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
