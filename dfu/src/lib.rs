//! USB Device Firmware Upgrade (DFU) implementation based on [`nusb`]
//!
//! Provides a portable implementation of the DFU 1.1 protocol with STM32
//! extensions (aka "DfuSe"), plus the DFU file suffix and the vendor
//! prefix formats carried by firmware files. The main goal is to provide
//! a library and command line tool to flash DFU capable devices.
//!
//! Useful references:
//! - DFU: [USB Device Firmware Upgrade Specification, Revision 1.1](https://www.usb.org/sites/default/files/DFU_1.1.pdf)
//! - DfuSe: [STMicroelectronics AN3156](https://www.st.com/resource/en/application_note/an3156-usb-dfu-protocol-used-in-the-stm32-bootloader-stmicroelectronics.pdf)
//!
//! # Example
//!
//! The following example shows how to obtain a `Vec` of [DfuDevice]:
//! ```
//! use dfu::{DeviceFilter, find_dfu_devices};
//!
//! match find_dfu_devices(&DeviceFilter::default()) {
//!     Ok(devices) => {
//!         if devices.is_empty() {
//!             println!("No DFU devices found");
//!         } else {
//!             println!("Found {} DFU devices", devices.len());
//!         }
//!     }
//!     Err(e) => println!("Error: {e}"),
//! }
//! ```
//!
//! [`nusb`]: https://docs.rs/nusb

pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000u64);

pub mod codec;
mod connection;
mod crc32;
mod descriptor;
mod device;
mod dfuse;
mod engine;
mod error;
mod file;
mod id;
mod image;
mod interface;
mod memory;
mod progress;
mod protocol;
mod quirks;
mod session;

use std::time::Duration;

// Re-exports
pub use connection::{DfuConnection, DfuTransport};
pub use crc32::Crc32;
pub use descriptor::{DFUSE_VERSION_NUMBER, DfuDescriptor};
pub use device::{DeviceFilter, DfuDevice, find_dfu_devices};
pub use dfuse::{DfuseDownload, DfuseOptions};
pub use engine::DfuDownload;
pub use error::DfuError;
pub use file::{DFU_SUFFIX_LENGTH, DfuFile, PrefixType};
pub use id::UsbId;
pub use image::{DfuseElement, DfuseImage, DfuseTarget};
pub use interface::DfuInterface;
pub use memory::{DfuMemSegment, DfuMemory, parse_memory_layout};
pub use progress::{NoProgress, Progress, ProgressFn};
pub use protocol::{DfuStatus, state_name, status_name};
pub use quirks::Quirks;
pub use session::{DownloadOptions, DownloadSession};
