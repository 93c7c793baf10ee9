//! Top-level download flow: find the device, move it from runtime to
//! DFU mode, pick the engine and run it.

use log::{info, warn};

use crate::connection::{DfuConnection, milli_sleep};
use crate::descriptor::DFUSE_VERSION_NUMBER;
use crate::device::{DeviceFilter, DfuDevice, find_dfu_devices};
use crate::dfuse::{DfuseDownload, DfuseOptions};
use crate::engine::{DfuDownload, select_transfer_size};
use crate::error::DfuError;
use crate::file::DfuFile;
use crate::id::UsbId;
use crate::progress::Progress;
use crate::protocol::*;

/// Wait for re-enumeration after detach or reset.
const DETACH_SETTLE_MS: u32 = 5000;

#[derive(Clone, Copy, Debug, Default)]
pub struct DownloadOptions {
    /// Use the DfuSe engine even when neither the device descriptor nor
    /// the file announce DfuSe.
    pub force_dfuse: bool,
    pub dfuse: DfuseOptions,
    /// Detach and reset once the download finished, so the device
    /// re-enumerates into its application.
    pub reset_after: bool,
}

/// One firmware download against one device.
pub struct DownloadSession {
    filter: DeviceFilter,
    options: DownloadOptions,
}

impl DownloadSession {
    pub fn new(filter: DeviceFilter, options: DownloadOptions) -> Self {
        DownloadSession { filter, options }
    }

    /// Run the full flow and translate the outcome into a terminal
    /// progress report. Returns whether the download succeeded.
    pub fn download(
        &mut self,
        file: &DfuFile,
        progress: &mut dyn Progress,
    ) -> bool {
        match self.run(file, progress) {
            Ok(()) => {
                progress.report(1.0, "Success");
                true
            }
            Err(err) => {
                warn!("Download failed: {}", err);
                progress.report(1.0, "Failed");
                false
            }
        }
    }

    pub fn run(
        &mut self,
        file: &DfuFile,
        progress: &mut dyn Progress,
    ) -> Result<(), DfuError> {
        file.provide_default_search_id(&mut self.filter.id);
        progress.report(0.0, "Searching");

        let mut device = find_one(&self.filter)?;
        let mut runtime_id = None;
        if !device.in_dfu_mode() {
            // bootloaders often enumerate under their own identity, so
            // remember the application's one for the suffix check
            runtime_id = Some(device.usb_id());
            progress.report(0.01, "Detaching");
            self.detach_to_dfu_mode(&device)?;
            let mut dfu_filter = self.filter.clone();
            dfu_filter.dfu_mode_only = true;
            device = find_one(&dfu_filter)?;
            // a stuck interface would make every later request fail
            if !device.in_dfu_mode() {
                return Err(DfuError::Misc(
                    "Device is still not in DFU mode".into(),
                ));
            }
        }

        check_identity(file, device.usb_id(), runtime_id)?;

        let interface = device
            .interfaces()
            .iter()
            .find(|i| i.dfu_mode())
            .ok_or(DfuError::NoMatches)?;
        let alt_setting =
            self.filter.alt_setting.unwrap_or(interface.alt_setting());
        info!(
            "Using interface {} alternate setting {} \"{}\"",
            interface.interface(),
            alt_setting,
            interface.name()
        );

        let descriptor = *device.dfu_descriptor();
        if !descriptor.can_download() {
            warn!("Device does not advertise download capability");
        }
        let conn = device.connect(interface.interface(), alt_setting)?;
        conn.normalize_state()?;
        let transfer_size = select_transfer_size(
            descriptor.transfer_size(),
            conn.max_packet_size(),
        )?;

        let use_dfuse = device.is_dfuse()
            || self.options.force_dfuse
            || file.bcd_dfu == DFUSE_VERSION_NUMBER;
        if use_dfuse {
            let layout = interface.layout().ok_or_else(|| {
                DfuError::Misc(format!(
                    "No valid DFU memory layout found in \"{}\"",
                    interface.name()
                ))
            })?;
            DfuseDownload::new(
                &conn,
                layout,
                transfer_size,
                alt_setting,
                self.options.dfuse,
                progress,
            )
            .run(file)?;
        } else {
            DfuDownload::new(&conn, transfer_size, progress).run(file)?;
        }

        if self.options.reset_after {
            progress.report(0.97, "Resetting");
            self.leave_dfu_mode(&device, &conn)?;
        }
        Ok(())
    }

    /// Move a runtime-mode device into DFU mode via DFU_DETACH and, for
    /// devices that do not detach themselves, a bus reset.
    fn detach_to_dfu_mode(&self, device: &DfuDevice) -> Result<(), DfuError> {
        let descriptor = device.dfu_descriptor();
        let interface = device
            .interfaces()
            .first()
            .ok_or(DfuError::NoMatches)?
            .interface();
        let conn = device.connect(interface, 0)?;

        // some runtime stacks stall GETSTATUS; treat that as appIDLE
        let state = match conn.get_status() {
            Ok(st) => st.state,
            Err(DfuError::Stall) => {
                info!("Runtime GETSTATUS stalled, assuming appIDLE");
                STATE_APP_IDLE
            }
            Err(err) => return Err(err),
        };
        match state {
            STATE_APP_IDLE | STATE_APP_DETACH => {
                info!("Device in runtime mode, sending DFU detach request");
                let timeout = descriptor.detach_timeout().max(1000);
                conn.detach(timeout)?;
            }
            STATE_DFU_ERROR => {
                info!("dfuERROR, clearing status");
                conn.clear_status()?;
            }
            other => {
                warn!(
                    "Unexpected runtime state {}, trying the transition \
                     anyway",
                    state_name(other)
                );
            }
        }

        if descriptor.will_detach() {
            info!("Device will detach, not resetting");
        } else {
            info!("Resetting USB device");
            device.reset()?;
        }
        drop(conn);
        milli_sleep(DETACH_SETTLE_MS);
        Ok(())
    }

    fn leave_dfu_mode(
        &self,
        device: &DfuDevice,
        conn: &DfuConnection<nusb::Interface>,
    ) -> Result<(), DfuError> {
        info!("Detaching and resetting to leave DFU mode");
        if let Err(err) = conn.detach(1000) {
            // many bootloaders drop off the bus right after manifesting
            info!("Detach request failed, device may be gone: {}", err);
            return Ok(());
        }
        if let Err(err) = device.reset() {
            info!("Reset failed, device may be gone: {}", err);
        }
        milli_sleep(DETACH_SETTLE_MS);
        Ok(())
    }
}

fn find_one(filter: &DeviceFilter) -> Result<DfuDevice, DfuError> {
    let mut devices = find_dfu_devices(filter)?;
    match devices.len() {
        0 => Err(DfuError::NoMatches),
        1 => Ok(devices.remove(0)),
        _ => Err(DfuError::TooManyMatches),
    }
}

/// Require the suffix identity, if present, to match either the DFU-mode
/// device or the runtime identity it detached from. The suffix may use
/// 0xFFFF wildcards for either field.
fn check_identity(
    file: &DfuFile,
    device_id: UsbId,
    runtime_id: Option<UsbId>,
) -> Result<(), DfuError> {
    if !file.has_suffix() {
        return Ok(());
    }
    if file.usb_id.matches_wild(&device_id) {
        return Ok(());
    }
    if let Some(runtime_id) = runtime_id
        && file.usb_id.matches_wild(&runtime_id)
    {
        return Ok(());
    }
    Err(DfuError::Misc(format!(
        "File id {} does not match device id {}",
        file.usb_id, device_id
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suffixed_file(vendor: u16, product: u16) -> DfuFile {
        let mut file = DfuFile::from_payload(vec![0u8; 32]);
        file.usb_id = UsbId::new(vendor, product);
        let file =
            DfuFile::from_bytes(file.to_bytes(true, false).unwrap()).unwrap();
        assert!(file.has_suffix());
        file
    }

    fn id(vendor: u16, product: u16) -> UsbId {
        UsbId::new(vendor, product)
    }

    #[test]
    fn test_identity_accepts_dfu_mode_match() {
        let file = suffixed_file(0x0483, 0xdf11);
        assert!(check_identity(&file, id(0x0483, 0xdf11), None).is_ok());
    }

    #[test]
    fn test_identity_accepts_runtime_match() {
        // application id in the suffix, bootloader id on the bus
        let file = suffixed_file(0x1209, 0x0001);
        let result = check_identity(
            &file,
            id(0x0483, 0xdf11),
            Some(id(0x1209, 0x0001)),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_identity_rejects_double_mismatch() {
        let file = suffixed_file(0x1209, 0x0001);
        let result = check_identity(
            &file,
            id(0x0483, 0xdf11),
            Some(id(0x0483, 0x5740)),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_identity_skipped_without_suffix() {
        let file = DfuFile::from_payload(vec![0u8; 32]);
        assert!(check_identity(&file, id(0x0483, 0xdf11), None).is_ok());
    }
}
