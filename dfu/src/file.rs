//! DFU firmware file framing: vendor prefixes and the 16-byte suffix.
//!
//! A firmware file may carry an optional vendor prefix at the start and
//! an optional DFU suffix at the end. Both are probed on load; a file
//! without either is still a valid raw image. The suffix carries the
//! device-match identity and a CRC-32 over the whole file.

use std::path::Path;

use log::{info, warn};

use crate::codec::{Reader, Writer};
use crate::crc32::Crc32;
use crate::error::DfuError;
use crate::id::UsbId;

pub const DFU_SUFFIX_LENGTH: usize = 16;
const LMDFU_PREFIX_LENGTH: usize = 8;
const LPCDFU_PREFIX_LENGTH: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrefixType {
    None,
    /// TI Stellaris 8-byte prefix, tagged with a target address.
    Lmdfu,
    /// NXP LPC 16-byte unencrypted prefix, tagged with a payload size.
    LpcdfuUnencrypted,
}

/// An in-memory firmware file: the raw bytes plus parsed framing.
///
/// Invariant: `prefix_size + suffix_size <= data.len()`; the payload is
/// everything in between.
pub struct DfuFile {
    pub data: Vec<u8>,
    pub prefix_size: usize,
    pub suffix_size: usize,
    pub prefix_type: PrefixType,
    pub lmdfu_address: u32,
    pub bcd_device: u16,
    pub usb_id: UsbId,
    pub bcd_dfu: u16,
    pub crc: u32,
}

impl DfuFile {
    /// Wrap a raw payload with default (wildcard) suffix fields. Used
    /// when building a file to be serialized with [DfuFile::to_bytes].
    pub fn from_payload(data: Vec<u8>) -> Self {
        DfuFile {
            data,
            prefix_size: 0,
            suffix_size: 0,
            prefix_type: PrefixType::None,
            lmdfu_address: 0,
            bcd_device: 0xFFFF,
            usb_id: UsbId::default(),
            bcd_dfu: 0x0100,
            crc: 0xFFFF_FFFF,
        }
    }

    /// Parse a firmware file. A missing or CRC-invalid suffix and an
    /// unrecognized prefix are soft conditions (logged, treated as
    /// absent); only a suffix with an unsupported declared length is a
    /// hard format error.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, DfuError> {
        let mut file = DfuFile::from_payload(data);
        file.bcd_dfu = 0;
        file.probe_suffix()?;
        file.probe_prefix();
        Ok(file)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DfuError> {
        DfuFile::from_bytes(std::fs::read(path)?)
    }

    pub fn store<P: AsRef<Path>>(
        &self,
        path: P,
        write_suffix: bool,
        write_prefix: bool,
    ) -> Result<(), DfuError> {
        let bytes = self.to_bytes(write_suffix, write_prefix)?;
        Ok(std::fs::write(path, bytes)?)
    }

    pub fn total_size(&self) -> usize {
        self.data.len()
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[self.prefix_size..self.data.len() - self.suffix_size]
    }

    pub fn has_prefix(&self) -> bool {
        self.prefix_size > 0 && self.prefix_type != PrefixType::None
    }

    pub fn has_suffix(&self) -> bool {
        self.suffix_size > 0
    }

    /// Identity to match devices against, taken from the suffix with
    /// DFU wildcard (0xFFFF) fields left unset.
    pub fn search_id(&self) -> UsbId {
        let mut result = UsbId::default();
        if self.has_suffix() {
            if self.usb_id.vendor != Some(0xFFFF) {
                result.vendor = self.usb_id.vendor;
            }
            if self.usb_id.product != Some(0xFFFF) {
                result.product = self.usb_id.product;
            }
        }
        result
    }

    /// Fill unset fields of a search identity from the file suffix.
    pub fn provide_default_search_id(&self, dst: &mut UsbId) {
        if !self.has_suffix() {
            return;
        }
        let src = self.search_id();
        if dst.vendor.is_none() && src.vendor.is_some() {
            info!("Match vendor ID from file: {:04x}", src.vendor.unwrap());
            dst.vendor = src.vendor;
        }
        if dst.product.is_none() && src.product.is_some() {
            info!("Match product ID from file: {:04x}", src.product.unwrap());
            dst.product = src.product;
        }
    }

    fn probe_suffix(&mut self) -> Result<(), DfuError> {
        let total = self.data.len();
        if total < DFU_SUFFIX_LENGTH {
            warn!("Missing suffix: File too short for DFU suffix");
            return Ok(());
        }

        let suffix = &self.data[total - DFU_SUFFIX_LENGTH..];
        if suffix[10] != b'D' || suffix[9] != b'F' || suffix[8] != b'U' {
            warn!("Missing suffix: Invalid DFU suffix signature");
            return Ok(());
        }

        let mut crc = Crc32::new();
        crc.update(&self.data[..total - 4]);
        let embedded_crc = Reader::new(&suffix[12..]).read_u32_le()?;
        if embedded_crc != crc.value() {
            warn!("Missing suffix: DFU suffix CRC does not match");
            return Ok(());
        }

        // We believe we have a DFU suffix, so further checks must succeed
        let declared_len = suffix[11] as usize;
        if declared_len != DFU_SUFFIX_LENGTH {
            return Err(DfuError::Format(format!(
                "Unsupported DFU suffix length {}",
                declared_len
            )));
        }

        let mut d = Reader::new(suffix);
        self.bcd_device = d.read_u16_le()?;
        self.usb_id.product = Some(d.read_u16_le()?);
        self.usb_id.vendor = Some(d.read_u16_le()?);
        self.bcd_dfu = d.read_u16_le()?;
        self.crc = embedded_crc;
        self.suffix_size = DFU_SUFFIX_LENGTH;
        info!("DFU suffix version {:x}", self.bcd_dfu);
        Ok(())
    }

    fn probe_prefix(&mut self) {
        self.prefix_size = 0;
        let max_prefix = self.data.len() - self.suffix_size;
        let prefix = &self.data[..max_prefix];

        if prefix.len() >= LMDFU_PREFIX_LENGTH
            && prefix[0] == 0x01
            && prefix[1] == 0x00
        {
            self.prefix_type = PrefixType::Lmdfu;
            self.prefix_size = LMDFU_PREFIX_LENGTH;
            // address stored in KiB units
            if let Ok(kb) = Reader::new(&prefix[2..]).read_u16_le() {
                self.lmdfu_address = 1024 * kb as u32;
            }
        } else if prefix.len() >= LPCDFU_PREFIX_LENGTH
            && prefix[0] & 0x3f == 0x1a
            && prefix[1] & 0x3f == 0x3f
        {
            self.prefix_type = PrefixType::LpcdfuUnencrypted;
            self.prefix_size = LPCDFU_PREFIX_LENGTH;
        }
    }

    /// Serialize the file: optional prefix, payload, optional suffix.
    /// The suffix CRC is recomputed over everything written before it.
    pub fn to_bytes(
        &self,
        write_suffix: bool,
        write_prefix: bool,
    ) -> Result<Vec<u8>, DfuError> {
        let mut out: Vec<u8> = Vec::with_capacity(self.data.len() + 32);
        let mut crc = Crc32::new();

        if write_prefix {
            self.write_prefix(&mut out, &mut crc)?;
        }

        crc.update(self.payload());
        out.extend_from_slice(self.payload());

        if write_suffix {
            self.write_suffix(&mut out, &mut crc)?;
        }
        Ok(out)
    }

    fn write_prefix(
        &self,
        out: &mut Vec<u8>,
        crc: &mut Crc32,
    ) -> Result<(), DfuError> {
        match self.prefix_type {
            PrefixType::None => {}
            PrefixType::Lmdfu => {
                let mut buf = [0u8; LMDFU_PREFIX_LENGTH];
                let mut d = Writer::new(&mut buf);
                d.write_u8(0x01)?; // STELLARIS_DFU_PROG
                d.write_u8(0x00)?; // reserved
                d.write_u16_le((self.lmdfu_address / 1024) as u16)?;
                d.write_u32_le(self.payload().len() as u32)?;
                crc.update(&buf);
                out.extend_from_slice(&buf);
            }
            PrefixType::LpcdfuUnencrypted => {
                let mut buf = [0u8; LPCDFU_PREFIX_LENGTH];
                // payload plus prefix, rounded up to 512-byte blocks
                let blocks =
                    (self.payload().len() + LPCDFU_PREFIX_LENGTH + 511) / 512;
                let mut d = Writer::new(&mut buf);
                d.write_u8(0x1a)?; // unencrypted
                d.write_u8(0x3f)?; // reserved
                d.write_u16_le(blocks as u16)?;
                for b in &mut buf[12..] {
                    *b = 0xff;
                }
                crc.update(&buf);
                out.extend_from_slice(&buf);
            }
        }
        Ok(())
    }

    fn write_suffix(
        &self,
        out: &mut Vec<u8>,
        crc: &mut Crc32,
    ) -> Result<(), DfuError> {
        let mut buf = [0u8; DFU_SUFFIX_LENGTH];
        {
            let mut d = Writer::new(&mut buf);
            d.write_u16_le(self.bcd_device)?;
            d.write_u16_le(self.usb_id.product.unwrap_or(0xFFFF))?;
            d.write_u16_le(self.usb_id.vendor.unwrap_or(0xFFFF))?;
            d.write_u16_le(self.bcd_dfu)?;
            d.write_u8(b'U')?;
            d.write_u8(b'F')?;
            d.write_u8(b'D')?;
            d.write_u8(DFU_SUFFIX_LENGTH as u8)?;
        }
        crc.update(&buf[..DFU_SUFFIX_LENGTH - 4]);
        Writer::new(&mut buf[DFU_SUFFIX_LENGTH - 4..])
            .write_u32_le(crc.value())?;
        out.extend_from_slice(&buf);
        Ok(())
    }

    /// Human-readable description of the parsed framing, one line per
    /// property. Used by the CLI `info` command.
    pub fn describe(&self) -> String {
        let mut s = String::new();
        match self.prefix_type {
            PrefixType::Lmdfu => {
                s += "The file contains a TI Stellaris DFU prefix:\n";
                s += &format!("  Address:\t0x{:08x}\n", self.lmdfu_address);
            }
            PrefixType::LpcdfuUnencrypted => {
                s += "The file contains an NXP unencrypted LPC DFU prefix\n";
            }
            PrefixType::None if self.prefix_size != 0 => {
                s += "The file contains an unknown prefix\n";
            }
            PrefixType::None => {}
        }
        if self.has_suffix() {
            s += "The file contains a DFU suffix:\n";
            s += &format!("  BCD device:\t0x{:04X}\n", self.bcd_device);
            s += &format!(
                "  Product ID:\t0x{:04X}\n",
                self.usb_id.product.unwrap_or(0xFFFF)
            );
            s += &format!(
                "  Vendor ID:\t0x{:04X}\n",
                self.usb_id.vendor.unwrap_or(0xFFFF)
            );
            s += &format!("  BCD DFU:\t0x{:04X}\n", self.bcd_dfu);
            s += &format!("  Length:\t{}\n", self.suffix_size);
            s += &format!("  CRC:\t\t0x{:08X}\n", self.crc);
        }
        s
    }
}
