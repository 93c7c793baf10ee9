use std::{num::NonZeroU8, time::Duration};

use log::warn;
use nusb::{self, MaybeFuture};

use crate::memory::{DfuMemory, parse_memory_layout};

/// One DFU alternate setting of a device, with its name string and, for
/// DfuSe devices, the memory layout parsed from that name.
#[derive(Debug)]
pub struct DfuInterface {
    config: u8,
    interface: u8,
    alt_setting: u8,
    dfu_mode: bool,
    name: String,
    layout: Option<DfuMemory>,
}

impl DfuInterface {
    pub(crate) fn new(
        device: &nusb::Device,
        config: u8,
        interface: u8,
        alt_setting: u8,
        dfu_mode: bool,
        name_idx: Option<NonZeroU8>,
    ) -> Self {
        let name = name_idx
            .and_then(|idx| {
                get_string_descriptor(device, idx, crate::DEFAULT_TIMEOUT)
            })
            .unwrap_or_else(|| String::from("UNKNOWN"));

        // only DfuSe devices encode a memory map in the name
        let layout = parse_memory_layout(&name);
        if dfu_mode && layout.is_none() {
            warn!(
                "No memory layout in interface name \"{}\"",
                name
            );
        }
        Self {
            config,
            interface,
            alt_setting,
            dfu_mode,
            name,
            layout,
        }
    }

    pub fn config(&self) -> u8 {
        self.config
    }
    pub fn interface(&self) -> u8 {
        self.interface
    }
    pub fn alt_setting(&self) -> u8 {
        self.alt_setting
    }
    /// True for a DFU-mode interface, false for a runtime one.
    pub fn dfu_mode(&self) -> bool {
        self.dfu_mode
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn layout(&self) -> Option<&DfuMemory> {
        self.layout.as_ref()
    }
}

fn get_string_descriptor(
    device: &nusb::Device,
    desc_index: NonZeroU8,
    timeout: Duration,
) -> Option<String> {
    let language: u16 = device
        .get_string_descriptor_supported_languages(timeout)
        .wait()
        .ok()?
        .next()
        .unwrap_or(nusb::descriptors::language_id::US_ENGLISH);

    device
        .get_string_descriptor(desc_index, language, timeout)
        .wait()
        .ok()
}
