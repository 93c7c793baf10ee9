use log::{info, warn};

use crate::codec::Reader;
use crate::quirks::Quirks;

pub(crate) const DFU_DESC_TYPE: u8 = 0x21;
pub(crate) const DFU_DESC_LEN: usize = 9;

pub const DFUSE_VERSION_NUMBER: u16 = 0x11A;

/// DFU functional descriptor
///
/// Represents the DFU functional descriptor as described in section 4.1.3
/// of the DFU 1.1 specification.
///
#[derive(Clone, Copy, Debug, Default)]
pub struct DfuDescriptor {
    length: u8,
    attributes: u8,
    detach_timeout: u16,
    transfer_size: u16,
    dfu_version: u16,
}

impl DfuDescriptor {
    const BIT_CAN_DNLOAD: u8 = 1 << 0;
    const BIT_CAN_UPLOAD: u8 = 1 << 1;
    const BIT_MANIFESTATION_TOLERANT: u8 = 1 << 2;
    const BIT_WILL_DETACH: u8 = 1 << 3;

    /// Parse from the raw descriptor bytes (bLength and bDescriptorType
    /// included). Short data is a soft failure: missing fields stay 0.
    pub(crate) fn parse(raw_desc: &[u8]) -> Self {
        let mut desc = DfuDescriptor::default();
        let mut d = Reader::new(raw_desc);
        let _ = (|| -> Result<(), crate::DfuError> {
            desc.length = d.read_u8()?;
            d.skip(1)?; // bDescriptorType
            desc.attributes = d.read_u8()?;
            desc.detach_timeout = d.read_u16_le()?;
            desc.transfer_size = d.read_u16_le()?;
            desc.dfu_version = d.read_u16_le()?;
            Ok(())
        })();

        // a 7-byte functional descriptor predates bcdDFUVersion
        if desc.length == 7 {
            info!(
                "Deducing device DFU version from functional descriptor \
                 length"
            );
            desc.dfu_version = 0x0100;
        } else if desc.length < DFU_DESC_LEN as u8 {
            warn!("Error obtaining DFU functional descriptor");
            warn!("Assuming DFU version 1.0");
            desc.dfu_version = 0x0100;
            warn!("Transfer size can not be detected");
            desc.transfer_size = 0;
        }
        desc
    }

    /// Devices with [Quirks::FORCE_DFU11] under-report their version.
    pub(crate) fn apply_quirks(&mut self, quirks: Quirks) {
        if quirks.contains(Quirks::FORCE_DFU11) {
            self.dfu_version = 0x0110;
        }
    }

    /// Download capable (`bitCanDnload`)
    #[doc(alias = "bitCanDnload")]
    pub fn can_download(&self) -> bool {
        self.attributes & Self::BIT_CAN_DNLOAD != 0
    }

    /// Upload capable (`bitCanUpload`)
    #[doc(alias = "bitCanUpload")]
    pub fn can_upload(&self) -> bool {
        self.attributes & Self::BIT_CAN_UPLOAD != 0
    }

    /// Device is able to communicate via USB after
    /// Manifestation phase (`bitManifestationTolerant`)
    #[doc(alias = "bitManifestationTolerant")]
    pub fn manifestation_tolerant(&self) -> bool {
        self.attributes & Self::BIT_MANIFESTATION_TOLERANT != 0
    }

    /// Device will perform a bus detach-attach sequence when it receives
    /// a `DFU_DETACH` request (`bitWillDetach`). The host must not issue
    /// a USB Reset.
    #[doc(alias = "bitWillDetach")]
    pub fn will_detach(&self) -> bool {
        self.attributes & Self::BIT_WILL_DETACH != 0
    }

    /// Time, in milliseconds, that the device will wait after receipt of
    /// the `DFU_DETACH` request (`wDetachTimeOut`).
    #[doc(alias = "wDetachTimeout")]
    pub fn detach_timeout(&self) -> u16 {
        self.detach_timeout
    }

    /// Maximum number of bytes that the device can accept per
    /// control-write transaction (`wTransferSize`).
    #[doc(alias = "wTransferSize")]
    pub fn transfer_size(&self) -> u16 {
        self.transfer_size
    }

    /// Numeric expression identifying the version of the DFU
    /// Specification release (`bcdDFUVersion`).
    #[doc(alias = "bcdDFUVersion")]
    pub fn dfu_version(&self) -> u16 {
        self.dfu_version
    }
}
