//! The DfuSe (STMicro) image container carried in the file payload.
//!
//! Layout: image prefix, then per-target prefix and elements. All
//! multi-byte fields are little-endian. ST's UM0391 claims big-endian,
//! but deployed files (and every other tool) are little-endian.

use log::{info, warn};

use crate::codec::Reader;
use crate::error::DfuError;

const IMAGE_PREFIX_SIZE: usize = 11;
const TARGET_PREFIX_SIZE: usize = 274;
const ELEMENT_HEADER_SIZE: usize = 8;

/// Parsed DfuSe container. Element data is borrowed from the file
/// payload, never copied.
#[derive(Debug)]
pub struct DfuseImage<'a> {
    pub image_size: u32,
    pub targets: Vec<DfuseTarget<'a>>,
}

#[derive(Debug)]
pub struct DfuseTarget<'a> {
    pub alt_setting: u8,
    pub name: Option<String>,
    pub size: u32,
    pub elements: Vec<DfuseElement<'a>>,
}

#[derive(Debug)]
pub struct DfuseElement<'a> {
    pub address: u32,
    pub data: &'a [u8],
}

impl<'a> DfuseImage<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<DfuseImage<'a>, DfuError> {
        let mut d = Reader::new(payload);

        // must be larger than a minimal prefix, target and element
        if !d.has(IMAGE_PREFIX_SIZE + TARGET_PREFIX_SIZE + ELEMENT_HEADER_SIZE)
        {
            return Err(DfuError::Format(
                "File too small for a DfuSe file".into(),
            ));
        }

        let (image_size, target_count) =
            parse_image_prefix(d.sub_reader(IMAGE_PREFIX_SIZE)?)?;
        info!("file contains {} DFU images", target_count);

        let mut targets = Vec::with_capacity(target_count as usize);
        for image in 1..=target_count {
            info!("parsing DFU image {}", image);
            targets.push(parse_target(&mut d)?);
        }

        if d.remaining() != 0 {
            warn!("{} bytes leftover", d.remaining());
        }
        Ok(DfuseImage {
            image_size,
            targets,
        })
    }
}

fn parse_image_prefix(mut d: Reader<'_>) -> Result<(u32, u8), DfuError> {
    let signature = d.read_string(5)?;
    let version = d.read_u8()?;
    let image_size = d.read_u32_le()?;
    let target_count = d.read_u8()?;

    if signature != "DfuSe" {
        return Err(DfuError::Format("No valid DfuSe signature".into()));
    }
    if version != 0x01 {
        return Err(DfuError::Format(format!(
            "DFU format revision {} not supported",
            version
        )));
    }
    Ok((image_size, target_count))
}

fn parse_target<'a>(
    d: &mut Reader<'a>,
) -> Result<DfuseTarget<'a>, DfuError> {
    let mut p = d.sub_reader(TARGET_PREFIX_SIZE)?;
    let signature = p.read_string(6)?;
    let alt_setting = p.read_u8()?;
    let named = p.read_u32_le()?;
    let raw_name = p.read_string(255)?;
    let size = p.read_u32_le()?;
    let element_count = p.read_u32_le()?;

    if signature != "Target" {
        return Err(DfuError::Format("No valid target signature".into()));
    }
    let name = if named != 0 {
        Some(raw_name.trim_end_matches('\0').to_string())
    } else {
        None
    };

    info!(
        "image for alternate setting {}, ({} elements, total size = {})",
        alt_setting, element_count, size
    );

    let mut elements = Vec::with_capacity(element_count as usize);
    for element in 1..=element_count {
        info!("parsing element {}", element);
        let mut h = d.sub_reader(ELEMENT_HEADER_SIZE)?;
        let address = h.read_u32_le()?;
        let element_size = h.read_u32_le()? as usize;
        info!("address = 0x{:08x}, size = {}", address, element_size);

        if !d.has(element_size) {
            return Err(DfuError::Format(
                "File too small for element size".into(),
            ));
        }
        let data = d.sub_reader(element_size)?.rest();
        elements.push(DfuseElement { address, data });
    }

    Ok(DfuseTarget {
        alt_setting,
        name,
        size,
        elements,
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    /// Builds a DfuSe payload from (alt_setting, [(address, data)]) specs.
    pub fn build_dfuse_payload(
        targets: &[(u8, Vec<(u32, Vec<u8>)>)],
    ) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"DfuSe");
        out.push(0x01);
        out.extend_from_slice(&0u32.to_le_bytes()); // patched below
        out.push(targets.len() as u8);

        for (alt, elements) in targets {
            out.extend_from_slice(b"Target");
            out.push(*alt);
            out.extend_from_slice(&1u32.to_le_bytes());
            let mut name = [0u8; 255];
            name[..4].copy_from_slice(b"test");
            out.extend_from_slice(&name);
            let target_size: u32 = elements
                .iter()
                .map(|(_, d)| 8 + d.len() as u32)
                .sum();
            out.extend_from_slice(&target_size.to_le_bytes());
            out.extend_from_slice(&(elements.len() as u32).to_le_bytes());
            for (addr, data) in elements {
                out.extend_from_slice(&addr.to_le_bytes());
                out.extend_from_slice(&(data.len() as u32).to_le_bytes());
                out.extend_from_slice(data);
            }
        }
        let total = out.len() as u32;
        out[6..10].copy_from_slice(&total.to_le_bytes());
        out
    }
}
