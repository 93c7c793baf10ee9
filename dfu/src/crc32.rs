//! Streaming CRC-32 with the DFU suffix convention.
//!
//! The suffix stores the raw shift register value: initial 0xFFFFFFFF,
//! reflected polynomial, *no* final complement. [crc32fast] implements
//! the complemented (IEEE) variant, so the output is folded back.

pub struct Crc32 {
    hasher: crc32fast::Hasher,
}

impl Crc32 {
    pub fn new() -> Self {
        Crc32 {
            hasher: crc32fast::Hasher::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    pub fn value(&self) -> u32 {
        self.hasher.clone().finalize() ^ 0xFFFF_FFFF
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Crc32::new()
    }
}

impl From<Crc32> for u32 {
    fn from(crc: Crc32) -> u32 {
        crc.value()
    }
}
