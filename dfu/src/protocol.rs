//! DFU 1.1 protocol constants and the GETSTATUS payload.

use crate::codec::Reader;
use crate::error::DfuError;
use crate::quirks::{QUIRK_POLL_TIMEOUT_MS, Quirks};

// Class-specific requests (DFU 1.1, section 3)
pub const DFU_DETACH: u8 = 0;
pub const DFU_DNLOAD: u8 = 1;
pub const DFU_UPLOAD: u8 = 2;
pub const DFU_GETSTATUS: u8 = 3;
pub const DFU_CLRSTATUS: u8 = 4;
pub const DFU_GETSTATE: u8 = 5;
pub const DFU_ABORT: u8 = 6;

pub const STATUS_OK: u8 = 0x00;

pub const STATE_APP_IDLE: u8 = 0x00;
pub const STATE_APP_DETACH: u8 = 0x01;
pub const STATE_DFU_IDLE: u8 = 0x02;
pub const STATE_DFU_DNLOAD_SYNC: u8 = 0x03;
pub const STATE_DFU_DNBUSY: u8 = 0x04;
pub const STATE_DFU_DNLOAD_IDLE: u8 = 0x05;
pub const STATE_DFU_MANIFEST_SYNC: u8 = 0x06;
pub const STATE_DFU_MANIFEST: u8 = 0x07;
pub const STATE_DFU_MANIFEST_WAIT_RESET: u8 = 0x08;
pub const STATE_DFU_UPLOAD_IDLE: u8 = 0x09;
pub const STATE_DFU_ERROR: u8 = 0x0a;

pub const GETSTATUS_LEN: u16 = 6;

pub fn state_name(state: u8) -> &'static str {
    match state {
        STATE_APP_IDLE => "appIDLE",
        STATE_APP_DETACH => "appDETACH",
        STATE_DFU_IDLE => "dfuIDLE",
        STATE_DFU_DNLOAD_SYNC => "dfuDNLOAD-SYNC",
        STATE_DFU_DNBUSY => "dfuDNBUSY",
        STATE_DFU_DNLOAD_IDLE => "dfuDNLOAD-IDLE",
        STATE_DFU_MANIFEST_SYNC => "dfuMANIFEST-SYNC",
        STATE_DFU_MANIFEST => "dfuMANIFEST",
        STATE_DFU_MANIFEST_WAIT_RESET => "dfuMANIFEST-WAIT-RESET",
        STATE_DFU_UPLOAD_IDLE => "dfuUPLOAD-IDLE",
        STATE_DFU_ERROR => "dfuERROR",
        _ => "UNKNOWN",
    }
}

// DFU 1.1, section 6.1.2
pub fn status_name(status: u8) -> &'static str {
    const NAMES: [&str; 16] = [
        "No error condition is present",
        "File is not targeted for use by this device",
        "File is for this device but fails some vendor-specific test",
        "Device is unable to write memory",
        "Memory erase function failed",
        "Memory erase check failed",
        "Program memory function failed",
        "Programmed memory failed verification",
        "Cannot program memory due to received address that is out of range",
        "Received DFU_DNLOAD with wLength = 0, but device does not think it has all data yet",
        "Device's firmware is corrupt. It cannot return to run-time (non-DFU) operations",
        "iString indicates a vendor specific error",
        "Device detected unexpected USB reset signalling",
        "Device detected unexpected power on reset",
        "Something went wrong, but the device does not know what it was",
        "Device stalled an unexpected request",
    ];
    NAMES.get(status as usize).copied().unwrap_or("INVALID")
}

/// Decoded 6-byte GETSTATUS response. Ephemeral, produced by each
/// status query.
#[derive(Clone, Copy, Debug)]
pub struct DfuStatus {
    pub status: u8,
    pub poll_timeout: u32,
    pub state: u8,
    pub string_index: u8,
}

impl DfuStatus {
    pub fn parse(data: &[u8], quirks: Quirks) -> Result<Self, DfuError> {
        let mut d = Reader::new(data);
        let status = d.read_u8()?;
        let poll_timeout = if quirks.contains(Quirks::POLL_TIMEOUT) {
            // reported value is unusable, substitute the fallback
            d.skip(3)?;
            QUIRK_POLL_TIMEOUT_MS
        } else {
            d.read_u24_le()?
        };
        Ok(DfuStatus {
            status,
            poll_timeout,
            state: d.read_u8()?,
            string_index: d.read_u8()?,
        })
    }

    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }

    pub fn ok(&self) -> Result<(), DfuError> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(DfuError::from(self))
        }
    }
}

impl From<&DfuStatus> for DfuError {
    fn from(st: &DfuStatus) -> Self {
        DfuError::Protocol {
            state: st.state,
            status: st.status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse() {
        let raw = [0x00, 0xE8, 0x03, 0x00, 0x05, 0x00];
        let st = DfuStatus::parse(&raw, Quirks::default()).unwrap();
        assert_eq!(st.status, STATUS_OK);
        assert_eq!(st.poll_timeout, 1000);
        assert_eq!(st.state, STATE_DFU_DNLOAD_IDLE);
        assert!(st.ok().is_ok());
    }

    #[test]
    fn test_status_parse_quirked_timeout() {
        let raw = [0x00, 0xFF, 0xFF, 0xFF, 0x02, 0x00];
        let st = DfuStatus::parse(&raw, Quirks::POLL_TIMEOUT).unwrap();
        assert_eq!(st.poll_timeout, QUIRK_POLL_TIMEOUT_MS);
        assert_eq!(st.state, STATE_DFU_IDLE);
    }

    #[test]
    fn test_status_error() {
        let raw = [0x03, 0x00, 0x00, 0x00, 0x0a, 0x00];
        let st = DfuStatus::parse(&raw, Quirks::default()).unwrap();
        let err = st.ok().unwrap_err();
        let msg = format!("{}", err);
        assert!(msg.contains("dfuERROR"));
        assert!(msg.contains("unable to write memory"));
    }

    #[test]
    fn test_short_status_is_out_of_range() {
        let raw = [0x00, 0x00, 0x00];
        assert!(matches!(
            DfuStatus::parse(&raw, Quirks::default()),
            Err(DfuError::OutOfRange)
        ));
    }
}
