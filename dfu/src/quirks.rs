//! Known hardware deviations keyed on vendor/product/revision.

/// Fallback poll interval for devices reporting bogus bwPollTimeout
/// values. Works for OpenMoko.
pub const QUIRK_POLL_TIMEOUT_MS: u32 = 5;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Quirks(u16);

impl Quirks {
    /// Device returns bogus bwPollTimeout values.
    pub const POLL_TIMEOUT: Quirks = Quirks(1 << 0);
    /// Device under-reports its DFU version in the functional descriptor.
    pub const FORCE_DFU11: Quirks = Quirks(1 << 1);

    pub fn contains(&self, other: Quirks) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Quirks {
    type Output = Quirks;
    fn bitor(self, rhs: Quirks) -> Quirks {
        Quirks(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for Quirks {
    fn bitor_assign(&mut self, rhs: Quirks) {
        self.0 |= rhs.0;
    }
}

const VENDOR_OPENMOKO: u16 = 0x1d50; // Openmoko Freerunner / GTA02
const VENDOR_FIC: u16 = 0x1457; // Openmoko Freerunner / GTA02
const VENDOR_VOTI: u16 = 0x16c0; // OpenPCD Reader
const VENDOR_LEAFLABS: u16 = 0x1eaf; // Maple
const VENDOR_SIEMENS: u16 = 0x0908;
const VENDOR_MIDIMAN: u16 = 0x0763;

const PRODUCT_FREERUNNER_FIRST: u16 = 0x5117;
const PRODUCT_FREERUNNER_LAST: u16 = 0x5126;
const PRODUCT_OPENPCD: u16 = 0x076b;
const PRODUCT_MAPLE3: u16 = 0x0003; // rev 3 and 5
const PRODUCT_PXM40: u16 = 0x02c4;
const PRODUCT_PXM50: u16 = 0x02c5;
const PRODUCT_TRANSIT: u16 = 0x2806; // M-Audio Transit

/// Pure lookup, never fails.
pub fn quirks_for(vendor: u16, product: u16, bcd_device: u16) -> Quirks {
    let mut quirks = Quirks::default();

    if (vendor == VENDOR_OPENMOKO || vendor == VENDOR_FIC)
        && (PRODUCT_FREERUNNER_FIRST..=PRODUCT_FREERUNNER_LAST)
            .contains(&product)
    {
        quirks |= Quirks::POLL_TIMEOUT;
    }

    if vendor == VENDOR_VOTI && product == PRODUCT_OPENPCD {
        quirks |= Quirks::POLL_TIMEOUT;
    }

    // Maple rev 0x0200 reports DFU 1.0 but implements 1.1
    if vendor == VENDOR_LEAFLABS
        && product == PRODUCT_MAPLE3
        && bcd_device == 0x0200
    {
        quirks |= Quirks::FORCE_DFU11;
    }

    // old Siemens PXM units (bcdDevice == 0) return bogus bwPollTimeout
    if vendor == VENDOR_SIEMENS
        && (product == PRODUCT_PXM40 || product == PRODUCT_PXM50)
        && bcd_device == 0
    {
        quirks |= Quirks::POLL_TIMEOUT;
    }

    if vendor == VENDOR_MIDIMAN && product == PRODUCT_TRANSIT {
        quirks |= Quirks::POLL_TIMEOUT;
    }

    quirks
}
