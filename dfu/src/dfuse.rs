//! DfuSe (STMicro AN3156) download: address-pointer and page-erase
//! special commands plus per-element flashing against the device
//! memory layout.

use log::{debug, info, warn};

use crate::codec::Writer;
use crate::connection::{DfuConnection, DfuTransport, milli_sleep};
use crate::error::DfuError;
use crate::file::DfuFile;
use crate::descriptor::DFUSE_VERSION_NUMBER;
use crate::image::DfuseImage;
use crate::memory::DfuMemory;
use crate::progress::Progress;
use crate::protocol::*;

const CMD_SET_ADDRESS: u8 = 0x21;
const CMD_ERASE: u8 = 0x41;
const CMD_READ_UNPROTECT: u8 = 0x92;

/// STM32F405 reports this for mass erase while the real duration is
/// around 35 seconds.
const MASS_ERASE_LIE_MS: u32 = 100;
const MASS_ERASE_REAL_MS: u32 = 35000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DfuseCommand {
    SetAddress,
    ErasePage,
    MassErase,
    ReadUnprotect,
}

impl DfuseCommand {
    fn name(&self) -> &'static str {
        match self {
            DfuseCommand::SetAddress => "SET_ADDRESS",
            DfuseCommand::ErasePage => "ERASE_PAGE",
            DfuseCommand::MassErase => "MASS_ERASE",
            DfuseCommand::ReadUnprotect => "READ_UNPROTECT",
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DfuseOptions {
    /// Erase the whole flash before flashing. Requires `force`.
    pub mass_erase: bool,
    /// Issue READ_UNPROTECT and stop; the device erases itself and
    /// resets. Requires `force`.
    pub unprotect: bool,
    pub force: bool,
    /// Jump to the first flashed element after download.
    pub leave: bool,
}

pub struct DfuseDownload<'a, T: DfuTransport> {
    conn: &'a DfuConnection<T>,
    layout: &'a DfuMemory,
    transfer_size: u32,
    alt_setting: u8,
    opts: DfuseOptions,
    progress: &'a mut dyn Progress,
    /// Aligned start of the last erased page; 1 is a non-aligned value
    /// that never matches.
    last_erased_page: u32,
    first_element_addr: Option<u32>,
}

impl<'a, T: DfuTransport> DfuseDownload<'a, T> {
    pub fn new(
        conn: &'a DfuConnection<T>,
        layout: &'a DfuMemory,
        transfer_size: u32,
        alt_setting: u8,
        opts: DfuseOptions,
        progress: &'a mut dyn Progress,
    ) -> Self {
        DfuseDownload {
            conn,
            layout,
            transfer_size,
            alt_setting,
            opts,
            progress,
            last_erased_page: 1,
            first_element_addr: None,
        }
    }

    /// Run the optional pre-steps, flash every element addressed to the
    /// active alternate setting, and perform the optional leave step.
    pub fn run(&mut self, file: &DfuFile) -> Result<(), DfuError> {
        self.last_erased_page = 1;

        if self.opts.unprotect {
            if !self.opts.force {
                return Err(DfuError::InvalidOptions(
                    "The read unprotect command will erase the flash \
                     memory and can only be used with force",
                ));
            }
            self.special_command(0, DfuseCommand::ReadUnprotect)?;
            info!("Device disconnects, erases flash and resets now");
            return Ok(());
        }
        if self.opts.mass_erase {
            if !self.opts.force {
                return Err(DfuError::InvalidOptions(
                    "The mass erase command can only be used with force",
                ));
            }
            self.progress.report(0.1, "Mass erase");
            info!("Performing mass erase, this can take a moment");
            self.special_command(0, DfuseCommand::MassErase)?;
        }

        if file.bcd_dfu != DFUSE_VERSION_NUMBER {
            return Err(DfuError::Misc(
                "Only DfuSe file version 1.1a is supported for DfuSe \
                 format files"
                    .into(),
            ));
        }
        self.download_image(file)?;
        self.conn.abort_to_idle()?;

        if self.opts.leave {
            let addr = self.first_element_addr.unwrap_or(0);
            self.special_command(addr, DfuseCommand::SetAddress)?;
            self.dnload_chunk(&[], 2)?;
        }
        Ok(())
    }

    fn download_image(&mut self, file: &DfuFile) -> Result<(), DfuError> {
        let image = DfuseImage::parse(file.payload())?;
        self.progress.report(0.05, "Downloading");

        let total: usize = image
            .targets
            .iter()
            .filter(|t| t.alt_setting == self.alt_setting)
            .flat_map(|t| t.elements.iter())
            .map(|e| e.data.len())
            .sum::<usize>()
            .max(1);
        let mut sent: usize = 0;

        for target in &image.targets {
            if let Some(first) = target.elements.first()
                && self.first_element_addr.is_none()
            {
                self.first_element_addr = Some(first.address);
            }
            if target.alt_setting != self.alt_setting {
                warn!(
                    "Image for alternate setting {} does not match the \
                     current alternate setting, skipping",
                    target.alt_setting
                );
                continue;
            }
            for element in &target.elements {
                self.download_element(
                    element.address,
                    element.data,
                    &mut sent,
                    total,
                )?;
            }
        }
        info!("done parsing DfuSe file");
        Ok(())
    }

    /// Write one element, erasing every page it touches first.
    fn download_element(
        &mut self,
        address: u32,
        data: &[u8],
        sent: &mut usize,
        total: usize,
    ) -> Result<(), DfuError> {
        if data.is_empty() {
            debug!("Skipping zero-length element at 0x{:08x}", address);
            return Ok(());
        }
        let last = address + data.len() as u32 - 1;
        // ranges are contiguous ascending, so one end check suffices
        if !self.layout.writable_at(last) {
            return Err(DfuError::Misc(format!(
                "Last page at 0x{:08x} is not writeable",
                last
            )));
        }

        let mut p: usize = 0;
        while p < data.len() {
            let chunk_addr = address + p as u32;
            let chunk_size =
                (data.len() - p).min(self.transfer_size as usize);

            let segment = self
                .layout
                .segment_at(chunk_addr)
                .filter(|s| s.writable())
                .ok_or_else(|| {
                    DfuError::Misc(format!(
                        "Page at 0x{:08x} is not writeable",
                        chunk_addr
                    ))
                })?;
            let page_size = segment.page_size();

            // erase only applies to flash-like segments
            if segment.erasable() && !self.opts.mass_erase {
                let mut erase_addr = chunk_addr;
                while erase_addr < chunk_addr + chunk_size as u32 {
                    if segment.page_start(erase_addr) != self.last_erased_page
                    {
                        self.special_command(
                            erase_addr,
                            DfuseCommand::ErasePage,
                        )?;
                    }
                    erase_addr += page_size;
                }
                let chunk_last = chunk_addr + chunk_size as u32 - 1;
                if segment.page_start(chunk_last) != self.last_erased_page {
                    debug!("Chunk extends into next page, erase it as well");
                    self.special_command(
                        chunk_last,
                        DfuseCommand::ErasePage,
                    )?;
                }
            }

            debug!(
                "Download from image offset {:08x} to memory \
                 {:08x}-{:08x}, size {}",
                p,
                chunk_addr,
                chunk_addr + chunk_size as u32 - 1,
                chunk_size
            );
            let prog = (*sent as f32 / total as f32) * 0.9 + 0.05;
            self.progress.report(prog, "Downloading");

            self.special_command(chunk_addr, DfuseCommand::SetAddress)?;
            // transaction 2 means no block-number address offset once
            // the address pointer is set
            self.dnload_chunk(&data[p..p + chunk_size], 2)?;

            p += chunk_size;
            *sent += chunk_size;
        }
        let prog = (*sent as f32 / total as f32) * 0.9 + 0.05;
        self.progress.report(prog, "Downloading");
        Ok(())
    }

    fn dnload_chunk(
        &self,
        data: &[u8],
        transaction: u16,
    ) -> Result<(), DfuError> {
        self.conn.dnload(transaction, data)?;

        let st = loop {
            let st = self.conn.get_status()?;
            milli_sleep(st.poll_timeout);
            if st.state == STATE_DFU_DNLOAD_IDLE
                || st.state == STATE_DFU_ERROR
                || st.state == STATE_DFU_MANIFEST
            {
                break st;
            }
        };
        if st.state == STATE_DFU_MANIFEST {
            info!("Transitioning to dfuMANIFEST state");
        }
        if !st.is_ok() {
            warn!(
                "Chunk write failed! state({}) = {}, status({}) = {}",
                st.state,
                state_name(st.state),
                st.status,
                status_name(st.status)
            );
            return Err(DfuError::from(&st));
        }
        Ok(())
    }

    /// Issue a 1- or 5-byte special command and poll it to completion.
    fn special_command(
        &mut self,
        address: u32,
        command: DfuseCommand,
    ) -> Result<(), DfuError> {
        let mut buf = [0u8; 5];
        let length = match command {
            DfuseCommand::ErasePage => {
                let segment = self
                    .layout
                    .segment_at(address)
                    .filter(|s| s.erasable())
                    .ok_or_else(|| {
                        DfuError::Misc(format!(
                            "Page at 0x{:08x} can not be erased",
                            address
                        ))
                    })?;
                debug!(
                    "Erasing page size {} at address 0x{:08x}, page \
                     starting at 0x{:08x}",
                    segment.page_size(),
                    address,
                    segment.page_start(address)
                );
                self.last_erased_page = segment.page_start(address);
                buf[0] = CMD_ERASE;
                5
            }
            DfuseCommand::SetAddress => {
                debug!("Setting address pointer to 0x{:08x}", address);
                buf[0] = CMD_SET_ADDRESS;
                5
            }
            DfuseCommand::MassErase => {
                buf[0] = CMD_ERASE; // mass erase when length = 1
                1
            }
            DfuseCommand::ReadUnprotect => {
                buf[0] = CMD_READ_UNPROTECT;
                1
            }
        };
        Writer::new(&mut buf[1..]).write_u32_le(address)?;

        self.conn.dnload(0, &buf[..length])?;

        let mut first_poll = true;
        loop {
            let mut st = self.conn.get_status()?;
            if first_poll {
                first_poll = false;
                if st.state != STATE_DFU_DNBUSY {
                    info!(
                        "state({}) = {}, status({}) = {}",
                        st.state,
                        state_name(st.state),
                        st.status,
                        status_name(st.status)
                    );
                    return Err(DfuError::Misc(format!(
                        "Wrong state after command \"{}\" download",
                        command.name()
                    )));
                }
                if command == DfuseCommand::MassErase
                    && st.poll_timeout == MASS_ERASE_LIE_MS
                {
                    st.poll_timeout = MASS_ERASE_REAL_MS;
                    info!("Setting timeout to 35 seconds");
                }
            }
            // wait while the command executes
            debug!("Poll timeout {} ms", st.poll_timeout);
            milli_sleep(st.poll_timeout);

            // the device disconnects immediately on read unprotect
            if command == DfuseCommand::ReadUnprotect {
                return Ok(());
            }
            if st.state != STATE_DFU_DNBUSY {
                if !st.is_ok() {
                    return Err(DfuError::Misc(format!(
                        "{} not correctly executed",
                        command.name()
                    )));
                }
                return Ok(());
            }
        }
    }
}
