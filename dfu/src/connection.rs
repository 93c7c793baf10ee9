//! Class-specific DFU requests over an abstract control-transfer
//! capability.
//!
//! [DfuTransport] is the seam between the protocol engines and `nusb`:
//! the engines only ever issue class/interface control transfers, so a
//! scripted in-memory transport can stand in for a device under test.

use std::time::Duration;

use log::{info, warn};
use nusb::{
    MaybeFuture,
    transfer::{ControlIn, ControlOut, ControlType, Recipient},
};

use crate::DEFAULT_TIMEOUT;
use crate::error::DfuError;
use crate::protocol::*;
use crate::quirks::Quirks;

/// Control-transfer capability of an open, claimed DFU interface.
pub trait DfuTransport {
    fn control_out(
        &self,
        request: u8,
        value: u16,
        data: &[u8],
    ) -> Result<(), DfuError>;

    fn control_in(
        &self,
        request: u8,
        value: u16,
        length: u16,
    ) -> Result<Vec<u8>, DfuError>;

    /// bMaxPacketSize0 of the control endpoint; transfers below this
    /// are not meaningful. Overridden with the device descriptor value
    /// where one is available.
    fn max_packet_size(&self) -> u16 {
        64
    }
}

impl DfuTransport for nusb::Interface {
    fn control_out(
        &self,
        request: u8,
        value: u16,
        data: &[u8],
    ) -> Result<(), DfuError> {
        let index = self.interface_number() as u16;
        Ok(self
            .control_out(
                ControlOut {
                    control_type: ControlType::Class,
                    recipient: Recipient::Interface,
                    request,
                    value,
                    index,
                    data,
                },
                DEFAULT_TIMEOUT,
            )
            .wait()?)
    }

    fn control_in(
        &self,
        request: u8,
        value: u16,
        length: u16,
    ) -> Result<Vec<u8>, DfuError> {
        let index = self.interface_number() as u16;
        Ok(self
            .control_in(
                ControlIn {
                    control_type: ControlType::Class,
                    recipient: Recipient::Interface,
                    request,
                    value,
                    index,
                    length,
                },
                DEFAULT_TIMEOUT,
            )
            .wait()?)
    }
}

pub(crate) fn milli_sleep(ms: u32) {
    if ms > 0 {
        std::thread::sleep(Duration::from_millis(ms as u64));
    }
}

/// A claimed DFU interface plus the quirks of the device behind it.
pub struct DfuConnection<T: DfuTransport> {
    transport: T,
    quirks: Quirks,
    max_packet_size: u16,
}

impl<T: DfuTransport> DfuConnection<T> {
    pub fn new(transport: T, quirks: Quirks) -> Self {
        let max_packet_size = transport.max_packet_size();
        DfuConnection {
            transport,
            quirks,
            max_packet_size,
        }
    }

    /// Replace the transport's estimate with the bMaxPacketSize0 taken
    /// from the device descriptor.
    pub fn with_max_packet_size(mut self, size: u16) -> Self {
        self.max_packet_size = size;
        self
    }

    pub fn quirks(&self) -> Quirks {
        self.quirks
    }

    pub fn max_packet_size(&self) -> u16 {
        self.max_packet_size
    }

    pub fn get_status(&self) -> Result<DfuStatus, DfuError> {
        let data =
            self.transport
                .control_in(DFU_GETSTATUS, 0, GETSTATUS_LEN)?;
        DfuStatus::parse(&data, self.quirks)
    }

    pub fn clear_status(&self) -> Result<(), DfuError> {
        self.transport.control_out(DFU_CLRSTATUS, 0, &[])
    }

    pub fn abort(&self) -> Result<(), DfuError> {
        self.transport.control_out(DFU_ABORT, 0, &[])
    }

    pub fn detach(&self, timeout_ms: u16) -> Result<(), DfuError> {
        self.transport.control_out(DFU_DETACH, timeout_ms, &[])
    }

    pub fn get_state(&self) -> Result<u8, DfuError> {
        let data = self.transport.control_in(DFU_GETSTATE, 0, 1)?;
        data.first().copied().ok_or(DfuError::OutOfRange)
    }

    pub fn dnload(
        &self,
        transaction: u16,
        data: &[u8],
    ) -> Result<(), DfuError> {
        self.transport.control_out(DFU_DNLOAD, transaction, data)
    }

    pub fn upload(
        &self,
        transaction: u16,
        length: u16,
    ) -> Result<Vec<u8>, DfuError> {
        self.transport.control_in(DFU_UPLOAD, transaction, length)
    }

    /// Abort any stale transfer and require the device to settle in
    /// dfuIDLE.
    pub fn abort_to_idle(&self) -> Result<(), DfuError> {
        self.abort()?;
        let st = self.get_status()?;
        if st.state != STATE_DFU_IDLE {
            return Err(DfuError::Misc(
                "Failed to enter idle state on abort".into(),
            ));
        }
        milli_sleep(st.poll_timeout);
        Ok(())
    }

    /// Drive the device into dfuIDLE with an OK status, clearing errors
    /// and aborting stale transfers along the way. Fails if the device
    /// is still in runtime mode.
    pub fn normalize_state(&self) -> Result<(), DfuError> {
        // bounded: each pass either terminates or issues a corrective
        // request, and well-behaved devices settle in one or two
        for _ in 0..8 {
            let st = self.get_status()?;
            info!(
                "state = {}, status = {}",
                state_name(st.state),
                st.status
            );
            milli_sleep(st.poll_timeout);

            match st.state {
                STATE_APP_IDLE | STATE_APP_DETACH => {
                    return Err(DfuError::Misc(
                        "Device still in Runtime Mode!".into(),
                    ));
                }
                STATE_DFU_ERROR => {
                    info!("dfuERROR, clearing status");
                    self.clear_status()?;
                    continue;
                }
                STATE_DFU_DNLOAD_IDLE | STATE_DFU_UPLOAD_IDLE => {
                    info!("aborting previous incomplete transfer");
                    self.abort()?;
                    continue;
                }
                STATE_DFU_IDLE => {
                    info!("dfuIDLE, continuing");
                }
                _ => {}
            }

            if !st.is_ok() {
                warn!("DFU status: '{}'", status_name(st.status));
                self.clear_status()?;
                let st = self.get_status()?;
                st.ok()?;
                milli_sleep(st.poll_timeout);
            }
            return Ok(());
        }
        Err(DfuError::Timeout)
    }
}
