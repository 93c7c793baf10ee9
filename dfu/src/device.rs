use log::warn;
use nusb::{self, MaybeFuture};

use crate::connection::DfuConnection;
use crate::descriptor::*;
use crate::error::DfuError;
use crate::id::UsbId;
use crate::interface::DfuInterface;
use crate::quirks::{Quirks, quirks_for};

const DFU_CLASS: u8 = 0xFE;
const DFU_SUBCLASS: u8 = 0x1;
const PROTOCOL_DFU_MODE: u8 = 2;

/// Criteria for selecting candidate devices and interfaces during
/// enumeration. Unset fields match anything.
#[derive(Clone, Debug, Default)]
pub struct DeviceFilter {
    /// Bus the device is attached to, e.g. "1-4".
    pub bus_id: Option<String>,
    pub id: UsbId,
    pub configuration: Option<u8>,
    pub interface: Option<u8>,
    pub alt_setting: Option<u8>,
    pub serial: Option<String>,
    /// Only match interfaces already in DFU mode (set after a
    /// detach/reset round trip).
    pub dfu_mode_only: bool,
}

impl DeviceFilter {
    pub fn with_id(vid: Option<u16>, pid: Option<u16>) -> Self {
        DeviceFilter {
            id: UsbId {
                vendor: vid,
                product: pid,
            },
            ..Default::default()
        }
    }
}

/// DFU device representation
pub struct DfuDevice {
    dev: nusb::DeviceInfo,
    quirks: Quirks,
    descriptor: DfuDescriptor,
    interfaces: Vec<DfuInterface>,
}

impl DfuDevice {
    fn from_device_info(
        device: nusb::DeviceInfo,
        filter: &DeviceFilter,
    ) -> Result<Option<Self>, DfuError> {
        let quirks = quirks_for(
            device.vendor_id(),
            device.product_id(),
            device.device_version(),
        );
        let open_dev: nusb::Device = device.open().wait()?;

        let mut descriptor = find_functional_descriptor(&open_dev)
            .unwrap_or_default();
        descriptor.apply_quirks(quirks);

        let mut interfaces: Vec<DfuInterface> = Vec::new();
        for configuration in open_dev.configurations() {
            let config = configuration.configuration_value();
            if filter.configuration.is_some_and(|c| c != config) {
                continue;
            }
            for alt in configuration.interface_alt_settings() {
                if alt.class() != DFU_CLASS || alt.subclass() != DFU_SUBCLASS
                {
                    continue;
                }
                if filter
                    .interface
                    .is_some_and(|i| i != alt.interface_number())
                {
                    continue;
                }
                let dfu_mode =
                    is_dfu_mode(&device, &descriptor, alt.protocol());
                if !dfu_mode && filter.dfu_mode_only {
                    continue;
                }
                if dfu_mode
                    && filter
                        .alt_setting
                        .is_some_and(|a| a != alt.alternate_setting())
                {
                    continue;
                }
                interfaces.push(DfuInterface::new(
                    &open_dev,
                    config,
                    alt.interface_number(),
                    alt.alternate_setting(),
                    dfu_mode,
                    alt.string_index(),
                ));
            }
        }

        if interfaces.is_empty() {
            Ok(None)
        } else {
            Ok(Some(DfuDevice {
                dev: device,
                quirks,
                descriptor,
                interfaces,
            }))
        }
    }

    pub fn device_info(&self) -> &nusb::DeviceInfo {
        &self.dev
    }

    pub fn id(&self) -> nusb::DeviceId {
        self.dev.id()
    }

    pub fn bus_id(&self) -> &str {
        self.dev.bus_id()
    }

    pub fn device_address(&self) -> u8 {
        self.dev.device_address()
    }

    pub fn vendor_id(&self) -> u16 {
        self.dev.vendor_id()
    }

    pub fn product_id(&self) -> u16 {
        self.dev.product_id()
    }

    pub fn usb_id(&self) -> UsbId {
        UsbId::new(self.dev.vendor_id(), self.dev.product_id())
    }

    pub fn bcd_device(&self) -> u16 {
        self.dev.device_version()
    }

    pub fn quirks(&self) -> Quirks {
        self.quirks
    }

    /// DFU interfaces and alternate settings combined
    pub fn interfaces(&self) -> &Vec<DfuInterface> {
        &self.interfaces
    }

    /// True when every matched interface is already in DFU mode.
    pub fn in_dfu_mode(&self) -> bool {
        self.interfaces.iter().all(|i| i.dfu_mode())
    }

    pub(crate) fn open(&self) -> Result<nusb::Device, DfuError> {
        Ok(self.dev.open().wait()?)
    }

    pub fn is_dfuse(&self) -> bool {
        self.descriptor.dfu_version() == DFUSE_VERSION_NUMBER
    }

    /// The DFU functional descriptor found during enumeration, with
    /// quirks applied. Defaulted (all zeros) if the device carries none.
    pub fn dfu_descriptor(&self) -> &DfuDescriptor {
        &self.descriptor
    }

    /// Issue a USB bus reset.
    pub fn reset(&self) -> Result<(), DfuError> {
        Ok(self.open()?.reset().wait()?)
    }

    /// Claim the DFU interface and select an alternate setting.
    ///
    /// Allows for interacting with the DFU interface (ex: flashing).
    pub fn connect(
        &self,
        interface: u8,
        alt_setting: u8,
    ) -> Result<DfuConnection<nusb::Interface>, DfuError> {
        let dev = self.open()?;
        let max_packet_size =
            dev.device_descriptor().max_packet_size_0() as u16;
        let interface = dev.claim_interface(interface).wait()?;
        interface.set_alt_setting(alt_setting).wait()?;
        Ok(DfuConnection::new(interface, self.quirks)
            .with_max_packet_size(max_packet_size))
    }
}

fn find_functional_descriptor(dev: &nusb::Device) -> Option<DfuDescriptor> {
    dev.configurations().find_map(|config| {
        config.interface_alt_settings().find_map(|alt_setting| {
            alt_setting
                .descriptors()
                .find(is_dfu_descriptor)
                .map(|desc| DfuDescriptor::parse(&desc))
        })
    })
}

fn is_dfu_descriptor(desc: &nusb::descriptors::Descriptor) -> bool {
    desc.descriptor_type() == DFU_DESC_TYPE
        && (7..=DFU_DESC_LEN).contains(&desc.descriptor_len())
}

fn is_dfu_mode(
    dev: &nusb::DeviceInfo,
    descriptor: &DfuDescriptor,
    protocol: u8,
) -> bool {
    if protocol == PROTOCOL_DFU_MODE {
        return true;
    }
    // e.g. DSO Nano has bInterfaceProtocol 0 instead of 2
    if descriptor.dfu_version() == DFUSE_VERSION_NUMBER && protocol == 0 {
        return true;
    }
    // LPC DFU bootloader reports bInterfaceProtocol 1 (runtime)
    dev.vendor_id() == 0x1fc9 && dev.product_id() == 0x000c && protocol == 1
}

fn matches_device(dev: &nusb::DeviceInfo, filter: &DeviceFilter) -> bool {
    if let Some(bus) = &filter.bus_id
        && dev.bus_id() != bus
    {
        return false;
    }
    if let Some(serial) = &filter.serial
        && dev.serial_number() != Some(serial.as_str())
    {
        return false;
    }
    UsbId::new(dev.vendor_id(), dev.product_id()).matches(&filter.id)
}

fn is_dfu_device(dev: &nusb::DeviceInfo) -> bool {
    dev.interfaces()
        .any(|i| i.class() == DFU_CLASS && i.subclass() == DFU_SUBCLASS)
}

/// Enumerate DFU capable devices matching `filter`.
pub fn find_dfu_devices(
    filter: &DeviceFilter,
) -> Result<Vec<DfuDevice>, DfuError> {
    let devices: Vec<nusb::DeviceInfo> = nusb::list_devices()
        .wait()?
        .filter(|dev| matches_device(dev, filter))
        .filter(is_dfu_device)
        .collect();
    let mut dfu_devices = Vec::with_capacity(devices.len());
    for device in devices {
        match DfuDevice::from_device_info(device, filter) {
            Ok(Some(dfu_device)) => dfu_devices.push(dfu_device),
            Ok(None) => {}
            Err(err) => warn!("Cannot probe device: {}", err),
        }
    }
    Ok(dfu_devices)
}
