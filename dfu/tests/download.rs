//! End-to-end download flows against a scripted in-memory device.

use std::cell::RefCell;

use dfu::{
    DfuConnection, DfuDownload, DfuError, DfuFile, DfuTransport,
    DfuseDownload, DfuseOptions, ProgressFn, Quirks, UsbId,
    parse_memory_layout,
};

const DFU_DETACH: u8 = 0;
const DFU_DNLOAD: u8 = 1;
const DFU_GETSTATUS: u8 = 3;
const DFU_CLRSTATUS: u8 = 4;
const DFU_GETSTATE: u8 = 5;
const DFU_ABORT: u8 = 6;

const STATE_DFU_IDLE: u8 = 0x02;
const STATE_DFU_DNBUSY: u8 = 0x04;
const STATE_DFU_DNLOAD_IDLE: u8 = 0x05;
const STATE_DFU_MANIFEST: u8 = 0x07;
const STATUS_OK: u8 = 0x00;

const CMD_SET_ADDRESS: u8 = 0x21;
const CMD_ERASE: u8 = 0x41;

#[derive(Default)]
struct SimState {
    state: u8,
    status: u8,
    /// Outstanding dfuDNBUSY polls before the current operation counts
    /// as finished.
    busy_polls: u32,
    address_pointer: u32,
    /// (transaction, address written, data) per data chunk.
    writes: Vec<(u16, u32, Vec<u8>)>,
    erased_pages: Vec<u32>,
    set_addresses: Vec<u32>,
    mass_erases: u32,
    completions: u32,
}

/// A well-behaved device driven entirely by class control requests. It
/// reports bwPollTimeout 0 so tests do not sleep.
struct SimDevice {
    inner: RefCell<SimState>,
    /// Plain DFU devices take every DNLOAD as data; DfuSe devices take
    /// wBlockNum 0 as a command phase.
    dfuse: bool,
    /// Complete writes and commands without the dfuDNBUSY phase, which
    /// DfuSe hosts must treat as a protocol violation.
    skip_dnbusy: bool,
}

impl SimDevice {
    fn new(dfuse: bool) -> Self {
        SimDevice {
            inner: RefCell::new(SimState {
                state: STATE_DFU_IDLE,
                ..Default::default()
            }),
            dfuse,
            skip_dnbusy: false,
        }
    }

    fn dnload(&self, transaction: u16, data: &[u8]) {
        let mut s = self.inner.borrow_mut();
        if data.is_empty() {
            // end of transfer, or the DfuSe leave sequence
            s.completions += 1;
            s.state = if self.dfuse {
                STATE_DFU_MANIFEST
            } else {
                STATE_DFU_IDLE
            };
            return;
        }
        if self.dfuse && transaction == 0 {
            // special command
            match (data[0], data.len()) {
                (CMD_SET_ADDRESS, 5) => {
                    let addr =
                        u32::from_le_bytes(data[1..5].try_into().unwrap());
                    s.address_pointer = addr;
                    s.set_addresses.push(addr);
                }
                (CMD_ERASE, 5) => {
                    let addr =
                        u32::from_le_bytes(data[1..5].try_into().unwrap());
                    s.erased_pages.push(addr);
                }
                (CMD_ERASE, 1) => s.mass_erases += 1,
                _ => panic!("unexpected special command {:02x?}", data),
            }
        } else {
            let addr = s.address_pointer;
            s.writes.push((transaction, addr, data.to_vec()));
            if !self.dfuse {
                s.address_pointer += data.len() as u32;
            }
        }
        if self.skip_dnbusy {
            s.state = STATE_DFU_DNLOAD_IDLE;
        } else {
            s.state = STATE_DFU_DNBUSY;
            s.busy_polls = 1;
        }
    }

    fn get_status(&self) -> Vec<u8> {
        let mut s = self.inner.borrow_mut();
        if s.state == STATE_DFU_DNBUSY {
            if s.busy_polls > 0 {
                s.busy_polls -= 1;
            } else {
                s.state = STATE_DFU_DNLOAD_IDLE;
            }
        }
        vec![s.status, 0, 0, 0, s.state, 0]
    }
}

impl DfuTransport for &SimDevice {
    fn control_out(
        &self,
        request: u8,
        value: u16,
        data: &[u8],
    ) -> Result<(), DfuError> {
        match request {
            DFU_DNLOAD => self.dnload(value, data),
            DFU_CLRSTATUS => {
                let mut s = self.inner.borrow_mut();
                s.status = STATUS_OK;
                s.state = STATE_DFU_IDLE;
            }
            DFU_ABORT => self.inner.borrow_mut().state = STATE_DFU_IDLE,
            DFU_DETACH => {}
            _ => panic!("unexpected OUT request {}", request),
        }
        Ok(())
    }

    fn control_in(
        &self,
        request: u8,
        _value: u16,
        _length: u16,
    ) -> Result<Vec<u8>, DfuError> {
        match request {
            DFU_GETSTATUS => Ok(self.get_status()),
            DFU_GETSTATE => Ok(vec![self.inner.borrow().state]),
            _ => panic!("unexpected IN request {}", request),
        }
    }
}

fn suffixed_file(payload: Vec<u8>, bcd_dfu: u16) -> DfuFile {
    let mut file = DfuFile::from_payload(payload);
    file.usb_id = UsbId::new(0x0483, 0xDF11);
    file.bcd_dfu = bcd_dfu;
    DfuFile::from_bytes(file.to_bytes(true, false).unwrap()).unwrap()
}

fn dfuse_payload(targets: &[(u8, Vec<(u32, Vec<u8>)>)]) -> Vec<u8> {
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
        name[..5].copy_from_slice(b"image");
        out.extend_from_slice(&name);
        let target_size: u32 =
            elements.iter().map(|(_, d)| 8 + d.len() as u32).sum();
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

#[test]
fn plain_download_chunks_and_completion() {
    let payload: Vec<u8> = (0..10_000u32).map(|i| i as u8).collect();
    let file = suffixed_file(payload.clone(), 0x0100);
    let dev = SimDevice::new(false);
    let conn = DfuConnection::new(&dev, Quirks::default());

    let mut fractions: Vec<f32> = Vec::new();
    let mut progress = ProgressFn(|f: f32, _: &str| fractions.push(f));
    let sent = DfuDownload::new(&conn, 1024, &mut progress)
        .run(&file)
        .unwrap();
    assert_eq!(sent, 10_000);

    let s = dev.inner.borrow();
    // 9 full chunks plus a 784 byte tail, suffix never sent
    assert_eq!(s.writes.len(), 10);
    let transactions: Vec<u16> = s.writes.iter().map(|w| w.0).collect();
    assert_eq!(transactions, (0..10).collect::<Vec<u16>>());
    let sent_bytes: Vec<u8> =
        s.writes.iter().flat_map(|w| w.2.iter().copied()).collect();
    assert_eq!(sent_bytes, payload);
    assert_eq!(s.completions, 1);

    assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(*fractions.last().unwrap(), 0.95);
}

#[test]
fn dfuse_download_erases_writes_and_leaves() {
    let element: Vec<u8> = (0..40_000u32).map(|i| (i * 7) as u8).collect();
    let payload = dfuse_payload(&[
        (0, vec![(0x0800_0000, element.clone())]),
        // addressed to another alternate setting, must be skipped
        (1, vec![(0x0810_0000, vec![0xEE; 64])]),
    ]);
    let file = suffixed_file(payload, 0x011A);

    let layout = parse_memory_layout(
        "@Internal Flash  /0x08000000/4*016Kg,1*064Kg,7*128Kg",
    )
    .unwrap();
    let dev = SimDevice::new(true);
    let conn = DfuConnection::new(&dev, Quirks::default());

    let mut fractions: Vec<f32> = Vec::new();
    let mut progress = ProgressFn(|f: f32, _: &str| fractions.push(f));
    let opts = DfuseOptions {
        leave: true,
        ..Default::default()
    };
    DfuseDownload::new(&conn, &layout, 2048, 0, opts, &mut progress)
        .run(&file)
        .unwrap();

    let s = dev.inner.borrow();
    // 40000 bytes starting at the segment base span three 16 KiB pages,
    // each erased exactly once
    assert_eq!(
        s.erased_pages,
        vec![0x0800_0000, 0x0800_4000, 0x0800_8000]
    );
    // every chunk lands at the address pointer, transaction 2
    let mut flashed = vec![0u8; element.len()];
    for (transaction, addr, data) in &s.writes {
        assert_eq!(*transaction, 2);
        let off = (*addr - 0x0800_0000) as usize;
        flashed[off..off + data.len()].copy_from_slice(data);
    }
    assert_eq!(flashed, element);
    // nothing was written to the skipped target
    assert!(s.writes.iter().all(|w| w.1 < 0x0810_0000));

    // the leave step re-points at the first element and manifests
    assert_eq!(*s.set_addresses.last().unwrap(), 0x0800_0000);
    assert_eq!(s.completions, 1);
    assert_eq!(s.state, STATE_DFU_MANIFEST);
    assert_eq!(s.mass_erases, 0);

    assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
    assert!(*fractions.last().unwrap() >= 0.95);
}

#[test]
fn dfuse_mass_erase_requires_force() {
    let dev = SimDevice::new(true);
    let conn = DfuConnection::new(&dev, Quirks::default());
    let layout =
        parse_memory_layout("@Flash/0x08000000/2*016Kg").unwrap();
    let file = suffixed_file(
        dfuse_payload(&[(0, vec![(0x0800_0000, vec![0; 16])])]),
        0x011A,
    );

    let mut progress = dfu::NoProgress;
    let opts = DfuseOptions {
        mass_erase: true,
        force: false,
        ..Default::default()
    };
    let err = DfuseDownload::new(&conn, &layout, 2048, 0, opts, &mut progress)
        .run(&file)
        .unwrap_err();
    assert!(matches!(err, DfuError::InvalidOptions(_)));
    // rejected before any traffic reached the device
    assert_eq!(dev.inner.borrow().mass_erases, 0);
    assert!(dev.inner.borrow().writes.is_empty());
}

#[test]
fn dfuse_zero_length_element_is_a_no_op() {
    let dev = SimDevice::new(true);
    let conn = DfuConnection::new(&dev, Quirks::default());
    let layout =
        parse_memory_layout("@Flash/0x08000000/2*016Kg").unwrap();
    // legal framing, e.g. a target carrying only an entry-point marker
    let file = suffixed_file(
        dfuse_payload(&[(0, vec![(0x0800_0000, vec![])])]),
        0x011A,
    );

    let mut progress = dfu::NoProgress;
    DfuseDownload::new(
        &conn,
        &layout,
        2048,
        0,
        DfuseOptions::default(),
        &mut progress,
    )
    .run(&file)
    .unwrap();
    let s = dev.inner.borrow();
    assert!(s.writes.is_empty());
    assert!(s.erased_pages.is_empty());
    assert_eq!(s.state, STATE_DFU_IDLE);
}

#[test]
fn dfuse_rejects_device_that_skips_dnbusy() {
    let mut dev = SimDevice::new(true);
    dev.skip_dnbusy = true;
    let conn = DfuConnection::new(&dev, Quirks::default());
    let layout =
        parse_memory_layout("@Flash/0x08000000/2*016Kg").unwrap();
    let file = suffixed_file(
        dfuse_payload(&[(0, vec![(0x0800_0000, vec![1; 32])])]),
        0x011A,
    );

    let mut progress = dfu::NoProgress;
    let err = DfuseDownload::new(
        &conn,
        &layout,
        2048,
        0,
        DfuseOptions::default(),
        &mut progress,
    )
    .run(&file)
    .unwrap_err();
    assert!(matches!(err, DfuError::Misc(_)));
}

#[test]
fn normalize_state_clears_errors_and_aborts() {
    let dev = SimDevice::new(false);
    let conn = DfuConnection::new(&dev, Quirks::default());

    dev.inner.borrow_mut().state = 0x0a; // dfuERROR
    dev.inner.borrow_mut().status = 0x01; // errTARGET
    conn.normalize_state().unwrap();
    assert_eq!(dev.inner.borrow().state, STATE_DFU_IDLE);
    assert_eq!(dev.inner.borrow().status, STATUS_OK);

    dev.inner.borrow_mut().state = STATE_DFU_DNLOAD_IDLE;
    conn.normalize_state().unwrap();
    assert_eq!(dev.inner.borrow().state, STATE_DFU_IDLE);
}
