//! Plain DFU 1.1 download: chunked DNLOAD transfers with status polling
//! and the manifestation handshake.

use log::{info, warn};

use crate::connection::{DfuConnection, DfuTransport, milli_sleep};
use crate::error::DfuError;
use crate::file::DfuFile;
use crate::progress::Progress;
use crate::protocol::*;

/// Host-side cap on a single control transfer.
pub(crate) const HOST_MAX_TRANSFER_SIZE: u32 = 4096;

const MANIFEST_POLL_LIMIT: u32 = 10;

/// Pick the effective transfer size from the device-advertised value.
/// Zero is fatal; the result is clamped to the host maximum and raised
/// to the control endpoint packet size.
pub fn select_transfer_size(
    device_size: u16,
    max_packet_size: u16,
) -> Result<u32, DfuError> {
    if device_size == 0 {
        return Err(DfuError::ZeroTransferSize);
    }
    info!("Device returned transfer size {}", device_size);
    let mut size = device_size as u32;
    if size > HOST_MAX_TRANSFER_SIZE {
        size = HOST_MAX_TRANSFER_SIZE;
        info!("Limited transfer size to {}", size);
    }
    if size < max_packet_size as u32 {
        size = max_packet_size as u32;
        info!("Adjusted transfer size to {}", size);
    }
    Ok(size)
}

pub struct DfuDownload<'a, T: DfuTransport> {
    conn: &'a DfuConnection<T>,
    transfer_size: u32,
    progress: &'a mut dyn Progress,
}

impl<'a, T: DfuTransport> DfuDownload<'a, T> {
    pub fn new(
        conn: &'a DfuConnection<T>,
        transfer_size: u32,
        progress: &'a mut dyn Progress,
    ) -> Self {
        DfuDownload {
            conn,
            transfer_size,
            progress,
        }
    }

    /// Download the file (prefix included, suffix excluded) and drive
    /// the device through manifestation. Returns the bytes sent.
    pub fn run(&mut self, file: &DfuFile) -> Result<u32, DfuError> {
        let data = &file.data[..file.total_size() - file.suffix_size];
        let expected = data.len();
        let mut bytes_sent: usize = 0;
        let mut transaction: u16 = 0;

        info!("Copying data from PC to device");
        self.progress.report(0.05, "Downloading");

        while bytes_sent < expected {
            let chunk_size =
                (expected - bytes_sent).min(self.transfer_size as usize);
            let chunk = &data[bytes_sent..bytes_sent + chunk_size];

            self.conn.dnload(transaction, chunk)?;
            transaction = transaction.wrapping_add(1);
            bytes_sent += chunk_size;

            let st = loop {
                let st = self.conn.get_status()?;
                if st.state == STATE_DFU_DNLOAD_IDLE
                    || st.state == STATE_DFU_ERROR
                {
                    break st;
                }
                // wait while the device executes flashing
                milli_sleep(st.poll_timeout);
            };
            st.ok()?;

            // <5% and >95% reserved for enumeration/reset bookkeeping
            let prog =
                (bytes_sent as f32 / expected as f32) * 0.9 + 0.05;
            self.progress.report(prog, "Downloading");
        }

        // one zero sized download request signals the end
        self.conn.dnload(transaction, &[])?;
        self.progress.report(0.95, "Downloading");
        info!("Sent a total of {} bytes", bytes_sent);

        self.wait_manifest()?;
        info!("Done!");
        Ok(bytes_sent as u32)
    }

    fn wait_manifest(&mut self) -> Result<(), DfuError> {
        for _ in 0..MANIFEST_POLL_LIMIT {
            let st = match self.conn.get_status() {
                Ok(st) => st,
                Err(_) => {
                    // some devices drop off the bus while manifesting
                    warn!("unable to read DFU status after completion");
                    return Ok(());
                }
            };
            info!(
                "state({}) = {}, status({}) = {}",
                st.state,
                state_name(st.state),
                st.status,
                status_name(st.status)
            );
            milli_sleep(st.poll_timeout);

            match st.state {
                STATE_DFU_MANIFEST_SYNC | STATE_DFU_MANIFEST => {
                    // some devices (e.g. TAS1020b) need time before the
                    // next status query succeeds
                    milli_sleep(1000);
                }
                _ => return Ok(()),
            }
        }
        Err(DfuError::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_transfer_size() {
        assert!(matches!(
            select_transfer_size(0, 64),
            Err(DfuError::ZeroTransferSize)
        ));
        assert_eq!(select_transfer_size(2048, 64).unwrap(), 2048);
        // clamped to the host maximum
        assert_eq!(select_transfer_size(8192, 64).unwrap(), 4096);
        // raised to the packet size
        assert_eq!(select_transfer_size(32, 64).unwrap(), 64);
    }
}
