use device::{BlockDevice, Error as _, ErrorKind};
use drivers::ufs::{
    config::UfsConfig,
    desc::{OCS_FATAL_ERROR, UFS_MAX_XFER},
    regs::*,
    scsi::{self, Sense, MEDIUM_ERROR, NO_SENSE, UNIT_ATTENTION},
    uic::*,
    upiu::*,
    Error, GenericUfs, NotifyStage, Stage, UfsDmaArea, UfsHost, UfsLun, UfsVariantOps,
};
use oreboot_asm::io::RegisterIo;
use std::{cell::Cell, collections::HashMap};
use util::{cb_err::CbErr, timer::MonotonicTimer};

/// Moves forward 1ms every time it is sampled.
struct StepTimer(Cell<u64>);

impl StepTimer {
    fn new() -> Self {
        Self(Cell::new(0))
    }
}

impl MonotonicTimer for StepTimer {
    fn now_usecs(&self) -> u64 {
        let t = self.0.get();
        self.0.set(t + 1000);
        t
    }
}

const BLOCK_SIZE: usize = 4096;
const BLOCKS: usize = 64;

const HCS_DP: u32 = 1 << 0;
const HCS_UTRLRDY: u32 = 1 << 1;
const HCS_UTMRLRDY: u32 = 1 << 2;
const HCS_UCRDY: u32 = 1 << 3;

#[repr(C, align(4096))]
struct Aligned([u8; 4 * BLOCK_SIZE]);

impl Aligned {
    fn boxed() -> Box<Self> {
        Box::new(Self([0; 4 * BLOCK_SIZE]))
    }
}

type Segments = Vec<(*mut u8, usize)>;

fn gather(segs: &Segments) -> Vec<u8> {
    let mut out = Vec::new();
    for &(p, len) in segs {
        out.extend_from_slice(unsafe { std::slice::from_raw_parts(p, len) });
    }
    out
}

fn scatter(segs: &Segments, data: &[u8]) {
    let mut off = 0;
    for &(p, len) in segs {
        let n = len.min(data.len() - off);
        unsafe { std::ptr::copy_nonoverlapping(data[off..].as_ptr(), p, n) };
        off += n;
        if off == data.len() {
            break;
        }
    }
}

/// Device side: answers UPIUs the way a single-LU UFS device would.
struct FakeDevice {
    flags: [bool; 0x20],
    attrs: HashMap<(u8, u8, u8), u32>,
    device_desc: Vec<u8>,
    unit_desc: Vec<u8>,
    string_desc: Vec<u8>,
    storage: Vec<u8>,
    fdeviceinit_left: u32,
    unit_attention: bool,
    medium_error_lba: Option<u32>,
    /// Block size returned by READ CAPACITY
    reported_block_size: u32,
    nop_failures: u32,
    nops: u32,
    syncs: u32,
    commands: Vec<u8>,
    queries: Vec<(u8, u8)>,
    tags: Vec<u8>,
}

impl FakeDevice {
    fn new(blocks: usize) -> Self {
        let mut device_desc = vec![0u8; 0x40];
        device_desc[0] = 0x40;
        device_desc[1] = QUERY_DESC_IDN_DEVICE;
        device_desc[6] = 1;
        device_desc[0x10..0x12].copy_from_slice(&[0x03, 0x10]);
        device_desc[0x14] = 1;
        device_desc[0x18..0x1a].copy_from_slice(&[0x01, 0xce]);

        let mut unit_desc = vec![0u8; 0x23];
        unit_desc[0] = 0x23;
        unit_desc[1] = QUERY_DESC_IDN_UNIT;
        unit_desc[3] = 1;
        unit_desc[0x0a] = 12;
        unit_desc[0x0b..0x13].copy_from_slice(&(blocks as u64).to_be_bytes());

        let mut string_desc = vec![10, QUERY_DESC_IDN_STRING];
        for c in "ACME".encode_utf16() {
            string_desc.extend_from_slice(&c.to_be_bytes());
        }

        let mut attrs = HashMap::new();
        attrs.insert((QUERY_ATTR_IDN_BOOT_LU_EN, 0, 0), 1);
        attrs.insert((QUERY_ATTR_IDN_ACTIVE_ICC_LVL, 0, 0), 0);

        Self {
            flags: [false; 0x20],
            attrs,
            device_desc,
            unit_desc,
            string_desc,
            storage: vec![0; blocks * BLOCK_SIZE],
            fdeviceinit_left: 2,
            unit_attention: true,
            medium_error_lba: None,
            reported_block_size: BLOCK_SIZE as u32,
            nop_failures: 0,
            nops: 0,
            syncs: 0,
            commands: Vec::new(),
            queries: Vec::new(),
            tags: Vec::new(),
        }
    }

    fn blocks(&self) -> usize {
        self.storage.len() / BLOCK_SIZE
    }

    fn handle(&mut self, cmd: &[u8], rsp: &mut [u8], dd: u32, segs: &Segments) {
        let tag = cmd[3];
        self.tags.push(tag);
        rsp[3] = tag;
        match cmd[0] & 0x3f {
            UPIU_TRANSACTION_NOP_OUT => {
                self.nops += 1;
                rsp[0] = UPIU_TRANSACTION_NOP_IN;
                if self.nop_failures > 0 {
                    self.nop_failures -= 1;
                    rsp[6] = UPIU_RESPONSE_TARGET_FAILURE;
                }
            }
            UPIU_TRANSACTION_QUERY_REQ => self.query(cmd, rsp),
            UPIU_TRANSACTION_COMMAND => self.scsi(cmd, rsp, dd, segs),
            _ => rsp[0] = UPIU_TRANSACTION_REJECT_UPIU,
        }
    }

    fn query(&mut self, cmd: &[u8], rsp: &mut [u8]) {
        let f = QueryFields::parse(cmd);
        self.queries.push((f.opcode, f.idn));
        rsp[0] = UPIU_TRANSACTION_QUERY_RSP;
        rsp[5] = cmd[5];

        let idn = f.idn as usize;
        let mut value = 0;
        let mut data: Vec<u8> = Vec::new();
        let code = match f.opcode {
            0x5..=0x8 if idn >= self.flags.len() => QUERY_RESULT_INVALID_IDN,
            0x5 => {
                if f.idn == QUERY_FLAG_IDN_FDEVICEINIT && self.flags[idn] {
                    if self.fdeviceinit_left == 0 {
                        self.flags[idn] = false;
                    } else {
                        self.fdeviceinit_left -= 1;
                    }
                }
                value = self.flags[idn] as u32;
                QUERY_RESULT_SUCCESS
            }
            0x6 => {
                self.flags[idn] = true;
                value = 1;
                QUERY_RESULT_SUCCESS
            }
            0x7 => {
                self.flags[idn] = false;
                QUERY_RESULT_SUCCESS
            }
            0x8 => {
                self.flags[idn] = !self.flags[idn];
                value = self.flags[idn] as u32;
                QUERY_RESULT_SUCCESS
            }
            0x3 => match self.attrs.get(&(f.idn, f.index, f.selector)) {
                Some(&v) => {
                    value = v;
                    QUERY_RESULT_SUCCESS
                }
                None => QUERY_RESULT_INVALID_IDN,
            },
            0x4 => {
                self.attrs.insert((f.idn, f.index, f.selector), f.value);
                value = f.value;
                QUERY_RESULT_SUCCESS
            }
            0x1 => {
                let desc = match (f.idn, f.index) {
                    (QUERY_DESC_IDN_DEVICE, 0) => Some(&self.device_desc),
                    (QUERY_DESC_IDN_UNIT, 0) => Some(&self.unit_desc),
                    (QUERY_DESC_IDN_STRING, 1) => Some(&self.string_desc),
                    _ => None,
                };
                match desc {
                    Some(desc) => {
                        let n = desc.len().min(f.length as usize);
                        data.extend_from_slice(&desc[..n]);
                        QUERY_RESULT_SUCCESS
                    }
                    None => QUERY_RESULT_INVALID_INDEX,
                }
            }
            0x2 => QUERY_RESULT_NOT_WRITEABLE,
            _ => QUERY_RESULT_INVALID_OPCODE,
        };

        rsp[6] = code;
        rsp[10..12].copy_from_slice(&(data.len() as u16).to_be_bytes());
        rsp[12..16].copy_from_slice(&cmd[12..16]);
        rsp[18..20].copy_from_slice(&(data.len() as u16).to_be_bytes());
        rsp[20..24].copy_from_slice(&value.to_be_bytes());
        rsp[32..32 + data.len()].copy_from_slice(&data);
    }

    fn scsi(&mut self, cmd: &[u8], rsp: &mut [u8], dd: u32, segs: &Segments) {
        let lun = cmd[2];
        let cdb = &cmd[16..32];
        let expected = u32::from_be_bytes([cmd[12], cmd[13], cmd[14], cmd[15]]) as usize;
        assert_eq!(segs.iter().map(|s| s.1).sum::<usize>(), expected);
        self.commands.push(cdb[0]);

        rsp[0] = UPIU_TRANSACTION_RESPONSE;
        rsp[2] = lun;

        let lba = u32::from_be_bytes([cdb[2], cdb[3], cdb[4], cdb[5]]) as usize;
        let count = u16::from_be_bytes([cdb[7], cdb[8]]) as usize;
        let result: Result<(), (u8, u8)> = if lun != 0 {
            Err((scsi::ILLEGAL_REQUEST, 0x25))
        } else if self.unit_attention && cdb[0] != scsi::INQUIRY && cdb[0] != scsi::REQUEST_SENSE {
            self.unit_attention = false;
            Err((UNIT_ATTENTION, 0x29))
        } else {
            match cdb[0] {
                scsi::TEST_UNIT_READY => Ok(()),
                scsi::INQUIRY => {
                    let mut inq = [b' '; 36];
                    inq[0] = 0;
                    inq[8..12].copy_from_slice(b"ACME");
                    inq[16..24].copy_from_slice(b"FAKE UFS");
                    inq[32..36].copy_from_slice(b"0100");
                    scatter(segs, &inq);
                    Ok(())
                }
                scsi::READ_CAPACITY_10 => {
                    let mut cap = Vec::new();
                    cap.extend_from_slice(&(self.blocks() as u32 - 1).to_be_bytes());
                    cap.extend_from_slice(&self.reported_block_size.to_be_bytes());
                    scatter(segs, &cap);
                    Ok(())
                }
                scsi::REQUEST_SENSE => {
                    let mut sense = [0u8; 18];
                    sense[0] = 0x70;
                    scatter(segs, &sense);
                    Ok(())
                }
                scsi::READ_10 | scsi::WRITE_10 if lba + count > self.blocks() => {
                    Err((scsi::ILLEGAL_REQUEST, 0x21))
                }
                scsi::READ_10
                    if self
                        .medium_error_lba
                        .map_or(false, |bad| (lba..lba + count).contains(&(bad as usize))) =>
                {
                    Err((MEDIUM_ERROR, 0x11))
                }
                scsi::READ_10 => {
                    assert_eq!(dd, 2);
                    scatter(segs, &self.storage[lba * BLOCK_SIZE..(lba + count) * BLOCK_SIZE]);
                    Ok(())
                }
                scsi::WRITE_10 => {
                    assert_eq!(dd, 1);
                    let data = gather(segs);
                    self.storage[lba * BLOCK_SIZE..(lba + count) * BLOCK_SIZE].copy_from_slice(&data);
                    Ok(())
                }
                scsi::SYNCHRONIZE_CACHE_10 => {
                    self.syncs += 1;
                    Ok(())
                }
                _ => Err((scsi::ILLEGAL_REQUEST, 0x20)),
            }
        };

        if let Err((key, asc)) = result {
            rsp[7] = scsi::SAM_STAT_CHECK_CONDITION;
            rsp[10..12].copy_from_slice(&20u16.to_be_bytes());
            rsp[32..34].copy_from_slice(&18u16.to_be_bytes());
            rsp[34] = 0x70;
            rsp[36] = key;
            rsp[34 + 12] = asc;
        }
    }
}

/// Register-level model of a UFSHCI controller. Transfer requests are
/// executed synchronously when the doorbell is rung, by walking the UTRD,
/// command descriptor and PRDT in host memory.
struct FakeUfs {
    cap: u32,
    hce: u32,
    hce_writes: Vec<u32>,
    is: u32,
    ie: u32,
    hcs: u32,
    utrlba: u64,
    utmrlba: u64,
    doorbell: u32,
    clear_writes: Vec<u32>,
    run_stop: u32,
    tm_run_stop: u32,
    args: [u32; 3],
    uic_log: Vec<u8>,
    dme: HashMap<(u32, bool), u32>,
    pwr_status: u8,
    vendor: HashMap<usize, u32>,

    link_failures: u32,
    no_device: bool,
    hce_stuck: bool,
    hang: bool,
    ocs: u8,
    reject: bool,

    dev: FakeDevice,
}

impl FakeUfs {
    fn new() -> Self {
        Self::with_blocks(BLOCKS)
    }

    fn with_blocks(blocks: usize) -> Self {
        let mut dme = HashMap::new();
        dme.insert((uic_arg_mib_sel(PA_CONNECTEDRXDATALANES, 0), false), 2);
        dme.insert((uic_arg_mib_sel(PA_CONNECTEDTXDATALANES, 0), false), 2);
        dme.insert((uic_arg_mib_sel(PA_MAXRXHSGEAR, 0), false), 4);
        dme.insert((uic_arg_mib_sel(PA_MAXRXHSGEAR, 0), true), 3);
        Self {
            /* 32 transfer slots, 8 task slots, 64-bit addressing */
            cap: 0x0107_001f,
            hce: 0,
            hce_writes: Vec::new(),
            is: 0,
            ie: 0,
            hcs: 0,
            utrlba: 0,
            utmrlba: 0,
            doorbell: 0,
            clear_writes: Vec::new(),
            run_stop: 0,
            tm_run_stop: 0,
            args: [0; 3],
            uic_log: Vec::new(),
            dme,
            pwr_status: PWR_LOCAL,
            vendor: HashMap::new(),
            link_failures: 0,
            no_device: false,
            hce_stuck: false,
            hang: false,
            ocs: 0,
            reject: false,
            dev: FakeDevice::new(blocks),
        }
    }

    fn dme_value(&self, attr: u16) -> Option<u32> {
        self.dme.get(&(uic_arg_mib_sel(attr, 0), false)).copied()
    }

    fn uic_count(&self, cmd: UicCmd) -> usize {
        self.uic_log.iter().filter(|&&c| c == cmd as u8).count()
    }

    fn set_upmcrs(&mut self, status: u8) {
        self.hcs = (self.hcs & !(0x7 << 8)) | (status as u32) << 8;
    }

    fn uic(&mut self, op: u8) {
        self.uic_log.push(op);
        let mut result = 0;
        match op {
            0x16 => {
                if self.link_failures > 0 {
                    self.link_failures -= 1;
                    result = 1;
                } else if !self.no_device {
                    self.hcs |= HCS_DP | HCS_UTRLRDY | HCS_UTMRLRDY;
                }
            }
            0x01 | 0x03 => match self.dme.get(&(self.args[0], op == 0x03)) {
                Some(&v) => self.args[2] = v,
                None => result = 0x02,
            },
            0x02 | 0x04 => {
                self.dme.insert((self.args[0], op == 0x04), self.args[2]);
                if op == 0x02 && self.args[0] >> 16 == PA_PWRMODE as u32 {
                    self.is |= UIC_POWER_MODE;
                    self.set_upmcrs(self.pwr_status);
                }
            }
            0x17 => {
                self.is |= UIC_HIBERNATE_ENTER;
                self.set_upmcrs(PWR_LOCAL);
            }
            0x18 => {
                self.is |= UIC_HIBERNATE_EXIT;
                self.set_upmcrs(PWR_LOCAL);
            }
            _ => {}
        }
        self.args[1] = (self.args[1] & !0xff) | result;
        self.is |= UIC_COMMAND_COMPL;
    }

    fn ring(&mut self) {
        if self.hang || self.doorbell & 1 == 0 {
            return;
        }
        unsafe { self.execute(0) };
        self.doorbell &= !1;
        self.is |= UTP_TRANSFER_REQ_COMPL;
    }

    unsafe fn execute(&mut self, slot: usize) {
        let utrd = (self.utrlba as usize + slot * 32) as *mut u32;
        let dw = |i: usize| utrd.add(i).read_volatile();
        let dd = (dw(0) >> 25) & 0x3;
        let ucd = (dw(4) as u64 | (dw(5) as u64) << 32) as usize as *mut u8;
        let rsp_len = (dw(6) & 0xffff) as usize * 4;
        let rsp_off = (dw(6) >> 16) as usize * 4;
        let prdt_len = (dw(7) & 0xffff) as usize;
        let prdt_off = (dw(7) >> 16) as usize * 4;

        let cmd = std::slice::from_raw_parts(ucd, rsp_off).to_vec();
        let mut segs = Segments::new();
        for i in 0..prdt_len {
            let e = ucd.add(prdt_off + i * 16) as *const u32;
            let addr = e.read() as u64 | (e.add(1).read() as u64) << 32;
            let len = (e.add(3).read() & 0x3ffff) as usize + 1;
            segs.push((addr as usize as *mut u8, len));
        }

        let mut rsp = vec![0u8; rsp_len];
        let ocs = if self.ocs != 0 {
            self.ocs
        } else {
            self.dev.handle(&cmd, &mut rsp, dd, &segs);
            if self.reject {
                rsp[0] = UPIU_TRANSACTION_REJECT_UPIU;
            }
            0
        };
        std::ptr::copy_nonoverlapping(rsp.as_ptr(), ucd.add(rsp_off), rsp_len);
        utrd.add(2).write_volatile((dw(2) & !0xff) | ocs as u32);
    }
}

impl RegisterIo for FakeUfs {
    fn read32(&self, offset: usize) -> u32 {
        match offset {
            REG_CONTROLLER_CAPABILITIES => self.cap,
            REG_UFS_VERSION => 0x0310,
            REG_INTERRUPT_STATUS => self.is,
            REG_INTERRUPT_ENABLE => self.ie,
            REG_CONTROLLER_STATUS => self.hcs,
            REG_CONTROLLER_ENABLE => self.hce,
            REG_UTP_TRANSFER_REQ_DOOR_BELL => self.doorbell,
            REG_UIC_COMMAND_ARG_1 => self.args[0],
            REG_UIC_COMMAND_ARG_2 => self.args[1],
            REG_UIC_COMMAND_ARG_3 => self.args[2],
            _ => 0,
        }
    }

    fn write32(&mut self, offset: usize, value: u32) {
        match offset {
            REG_CONTROLLER_ENABLE => {
                self.hce_writes.push(value);
                if value & CONTROLLER_ENABLE == 0 {
                    self.hce = 0;
                    self.hcs = 0;
                } else if !self.hce_stuck {
                    self.hce = CONTROLLER_ENABLE;
                    self.hcs = HCS_UCRDY;
                }
            }
            REG_INTERRUPT_STATUS => self.is &= !value,
            REG_INTERRUPT_ENABLE => self.ie = value,
            REG_UTP_TRANSFER_REQ_LIST_BASE_L => self.utrlba = (self.utrlba & !0xffff_ffff) | value as u64,
            REG_UTP_TRANSFER_REQ_LIST_BASE_H => {
                self.utrlba = (self.utrlba & 0xffff_ffff) | (value as u64) << 32
            }
            REG_UTP_TASK_REQ_LIST_BASE_L => self.utmrlba = (self.utmrlba & !0xffff_ffff) | value as u64,
            REG_UTP_TASK_REQ_LIST_BASE_H => {
                self.utmrlba = (self.utmrlba & 0xffff_ffff) | (value as u64) << 32
            }
            REG_UTP_TRANSFER_REQ_LIST_RUN_STOP => self.run_stop = value,
            REG_UTP_TASK_REQ_LIST_RUN_STOP => self.tm_run_stop = value,
            REG_UTP_TRANSFER_REQ_LIST_CLEAR => {
                self.clear_writes.push(value);
                self.doorbell &= value;
            }
            REG_UTP_TRANSFER_REQ_DOOR_BELL => {
                self.doorbell |= value;
                self.ring();
            }
            REG_UIC_COMMAND_ARG_1 => self.args[0] = value,
            REG_UIC_COMMAND_ARG_2 => self.args[1] = value,
            REG_UIC_COMMAND_ARG_3 => self.args[2] = value,
            REG_UIC_COMMAND => self.uic(value as u8),
            other => {
                self.vendor.insert(other, value);
            }
        }
    }
}

fn host<'a>(fake: &'a mut FakeUfs, dma: &'a mut UfsDmaArea) -> UfsHost<'a, &'a mut FakeUfs, StepTimer> {
    UfsHost::generic(fake, StepTimer::new(), dma)
}

fn dma() -> Box<UfsDmaArea> {
    Box::new(UfsDmaArea::new())
}

#[test]
fn init_brings_up_controller_and_device() {
    let mut fake = FakeUfs::new();
    let mut dma = dma();
    {
        let mut host = host(&mut fake, &mut dma);
        host.init().unwrap();
        let info = host.device_info().unwrap();
        assert_eq!(info.number_lu, 1);
        assert_eq!(info.spec_version, 0x0310);
        assert_eq!(info.manufacturer_id, 0x01ce);
        assert_eq!(host.capabilities().nutrs(), 32);
        assert_eq!(host.version().major(), 3);
    }

    assert_eq!(fake.hce, CONTROLLER_ENABLE);
    assert_eq!(fake.hce_writes, vec![CONTROLLER_ENABLE]);
    assert_eq!(fake.ie, UFSHCD_ENABLE_INTRS);
    assert_eq!(fake.uic_count(UicCmd::DmeLinkStartup), 1);
    assert_eq!(fake.utrlba, dma.utrl_addr());
    assert_eq!(fake.utmrlba, dma.utmrl_addr());
    assert_eq!((fake.run_stop, fake.tm_run_stop), (UTP_RUN_STOP, UTP_RUN_STOP));
    assert_eq!(fake.dev.nops, 1);
    assert!(!fake.dev.flags[QUERY_FLAG_IDN_FDEVICEINIT as usize]);
    assert_eq!(
        fake.dev.queries.last(),
        Some(&(QueryOpcode::ReadDesc as u8, QUERY_DESC_IDN_DEVICE))
    );
    assert_eq!(fake.is & UTP_TRANSFER_REQ_COMPL, 0);
}

#[test]
fn init_resets_a_running_controller() {
    let mut fake = FakeUfs::new();
    fake.hce = CONTROLLER_ENABLE;
    let mut dma = dma();
    host(&mut fake, &mut dma).init().unwrap();
    assert_eq!(fake.hce_writes, vec![0, CONTROLLER_ENABLE]);
}

#[test]
fn controller_enable_timeout() {
    let mut fake = FakeUfs::new();
    fake.hce_stuck = true;
    let mut dma = dma();
    let err = host(&mut fake, &mut dma).init().unwrap_err();
    assert_eq!(err, Error::Timeout(Stage::HostEnable));
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(CbErr::from(err.kind()), CbErr::DeviceTimeout);
    assert!(fake.uic_log.is_empty());
}

#[test]
fn link_startup_is_retried() {
    let mut fake = FakeUfs::new();
    fake.link_failures = 2;
    let mut dma = dma();
    host(&mut fake, &mut dma).init().unwrap();
    assert_eq!(fake.uic_count(UicCmd::DmeLinkStartup), 3);
}

#[test]
fn link_startup_gives_up_after_three_attempts() {
    let mut fake = FakeUfs::new();
    fake.link_failures = 3;
    let mut dma = dma();
    let err = host(&mut fake, &mut dma).init().unwrap_err();
    assert_eq!(
        err,
        Error::UicResult {
            cmd: UicCmd::DmeLinkStartup as u8,
            result: 1
        }
    );
    assert_eq!(fake.uic_count(UicCmd::DmeLinkStartup), 3);
    assert!(fake.dev.tags.is_empty());
}

#[test]
fn link_without_device() {
    let mut fake = FakeUfs::new();
    fake.no_device = true;
    let mut dma = dma();
    let err = host(&mut fake, &mut dma).init().unwrap_err();
    assert_eq!(err, Error::NoDevice);
    assert_eq!(CbErr::from(err.kind()), CbErr::DeviceNotPresent);
    assert_eq!(fake.run_stop, 0);
}

#[test]
fn nop_out_retried_until_device_answers() {
    let mut fake = FakeUfs::new();
    fake.dev.nop_failures = 3;
    let mut dma = dma();
    host(&mut fake, &mut dma).init().unwrap();
    assert_eq!(fake.dev.nops, 4);
}

#[test]
fn nop_out_exhausts_retries() {
    let mut fake = FakeUfs::new();
    fake.dev.nop_failures = 100;
    let mut dma = dma();
    let err = host(&mut fake, &mut dma).init().unwrap_err();
    assert_eq!(err, Error::UpiuResponse(UPIU_RESPONSE_TARGET_FAILURE));
    assert_eq!(fake.dev.nops, 10);
}

#[test]
fn fdeviceinit_is_polled_until_cleared() {
    let mut fake = FakeUfs::new();
    fake.dev.fdeviceinit_left = 3;
    let mut dma = dma();
    host(&mut fake, &mut dma).init().unwrap();
    let fdeviceinit = |op: QueryOpcode| {
        fake.dev
            .queries
            .iter()
            .filter(|&&q| q == (op as u8, QUERY_FLAG_IDN_FDEVICEINIT))
            .count()
    };
    assert_eq!(fdeviceinit(QueryOpcode::SetFlag), 1);
    assert_eq!(fdeviceinit(QueryOpcode::ReadFlag), 4);
}

#[test]
fn fdeviceinit_never_clears() {
    let mut fake = FakeUfs::new();
    fake.dev.fdeviceinit_left = u32::MAX;
    let mut dma = dma();
    let err = host(&mut fake, &mut dma).init().unwrap_err();
    assert_eq!(err, Error::Timeout(Stage::DeviceInit));
}

#[test]
fn task_tags_increment_per_request() {
    let mut fake = FakeUfs::new();
    let mut dma = dma();
    host(&mut fake, &mut dma).init().unwrap();
    let tags = &fake.dev.tags;
    assert!(tags.len() > 3);
    for pair in tags.windows(2) {
        assert_eq!(pair[1], pair[0].wrapping_add(1));
    }
}

#[test]
fn lun_write_then_read_back() {
    let mut fake = FakeUfs::new();
    let mut dma = dma();
    let mut buf = Aligned::boxed();
    {
        let mut host = host(&mut fake, &mut dma);
        host.init().unwrap();
        let mut lun = UfsLun::open(&mut host, 0).unwrap();
        assert_eq!(lun.block_size(), BLOCK_SIZE);
        assert_eq!(lun.block_count(), BLOCKS as u64);
        assert_eq!(lun.capacity(), (BLOCKS * BLOCK_SIZE) as u64);

        for (i, b) in buf.0[..2 * BLOCK_SIZE].iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        lun.write_blocks(5, &buf.0[..2 * BLOCK_SIZE]).unwrap();

        buf.0.fill(0);
        lun.read_blocks(5, &mut buf.0[..2 * BLOCK_SIZE]).unwrap();
        lun.flush().unwrap();
    }

    for (i, b) in buf.0[..2 * BLOCK_SIZE].iter().enumerate() {
        assert_eq!(*b, (i % 251) as u8);
    }
    let stored = &fake.dev.storage[5 * BLOCK_SIZE..7 * BLOCK_SIZE];
    assert_eq!(stored, &buf.0[..2 * BLOCK_SIZE]);
    assert_eq!(fake.dev.syncs, 1);
    /* One unit attention after reset, then a clean TEST UNIT READY */
    let turs = fake
        .dev
        .commands
        .iter()
        .filter(|&&c| c == scsi::TEST_UNIT_READY)
        .count();
    assert_eq!(turs, 2);
}

#[test]
fn misaligned_buffers_bounce_through_scratch() {
    let mut fake = FakeUfs::new();
    for (i, b) in fake.dev.storage.iter_mut().enumerate() {
        *b = (i / BLOCK_SIZE) as u8;
    }
    let mut dma = dma();
    let mut buf = Aligned::boxed();
    let mut host = host(&mut fake, &mut dma);
    host.init().unwrap();
    let mut lun = UfsLun::open(&mut host, 0).unwrap();

    let misaligned = &mut buf.0[1..1 + 3 * BLOCK_SIZE];
    lun.read_blocks(10, misaligned).unwrap();
    assert!(misaligned[..BLOCK_SIZE].iter().all(|&b| b == 10));
    assert!(misaligned[2 * BLOCK_SIZE..].iter().all(|&b| b == 12));

    misaligned.fill(0xee);
    lun.write_blocks(20, misaligned).unwrap();
    drop(lun);
    drop(host);

    let reads = fake.dev.commands.iter().filter(|&&c| c == scsi::READ_10).count();
    let writes = fake.dev.commands.iter().filter(|&&c| c == scsi::WRITE_10).count();
    assert_eq!((reads, writes), (3, 3));
    assert!(fake.dev.storage[20 * BLOCK_SIZE..23 * BLOCK_SIZE].iter().all(|&b| b == 0xee));
}

#[test]
fn large_reads_are_split_at_the_prdt_limit() {
    let blocks = 2 * UFS_MAX_XFER / BLOCK_SIZE;
    let mut fake = FakeUfs::with_blocks(blocks);
    let mut dma = dma();
    /* u32 backing keeps the buffer dword aligned */
    let mut words = vec![0u32; (UFS_MAX_XFER + 3 * BLOCK_SIZE) / 4];
    let bytes = unsafe { std::slice::from_raw_parts_mut(words.as_mut_ptr() as *mut u8, words.len() * 4) };

    let mut host = host(&mut fake, &mut dma);
    host.init().unwrap();
    let mut lun = UfsLun::open(&mut host, 0).unwrap();
    lun.read_blocks(0, bytes).unwrap();
    drop(lun);
    drop(host);

    let reads = fake.dev.commands.iter().filter(|&&c| c == scsi::READ_10).count();
    assert_eq!(reads, 2);
}

#[test]
fn out_of_range_requests_never_reach_the_device() {
    let mut fake = FakeUfs::new();
    let mut dma = dma();
    let mut buf = Aligned::boxed();
    let mut host = host(&mut fake, &mut dma);
    host.init().unwrap();
    let mut lun = UfsLun::open(&mut host, 0).unwrap();

    let err = lun
        .read_blocks(BLOCKS as u64 - 1, &mut buf.0[..2 * BLOCK_SIZE])
        .unwrap_err();
    assert_eq!(err, Error::InvalidArgument);
    assert_eq!(lun.read_blocks(0, &mut buf.0[..100]), Err(Error::InvalidArgument));
    drop(lun);
    drop(host);

    assert!(!fake.dev.commands.contains(&scsi::READ_10));
}

#[test]
fn medium_error_is_reported_with_sense() {
    let mut fake = FakeUfs::new();
    fake.dev.medium_error_lba = Some(10);
    let mut dma = dma();
    let mut buf = Aligned::boxed();
    let mut host = host(&mut fake, &mut dma);
    host.init().unwrap();
    let mut lun = UfsLun::open(&mut host, 0).unwrap();

    let err = lun.read_blocks(9, &mut buf.0[..2 * BLOCK_SIZE]).unwrap_err();
    assert_eq!(
        err,
        Error::CheckCondition {
            key: MEDIUM_ERROR,
            asc: 0x11,
            ascq: 0
        }
    );
    assert_eq!(err.kind(), ErrorKind::Io);
    assert_eq!(CbErr::from(err.kind()), CbErr::DeviceIo);
}

#[test]
fn inquiry_capacity_and_sense() {
    let mut fake = FakeUfs::new();
    let mut dma = dma();
    let mut host = host(&mut fake, &mut dma);
    host.init().unwrap();

    /* INQUIRY is answered even with a unit attention pending */
    let inq = host.inquiry(0).unwrap();
    assert_eq!(inq.vendor_str(), "ACME");
    assert_eq!(inq.product_str(), "FAKE UFS");
    assert_eq!(inq.revision_str(), "0100");

    assert_eq!(
        host.test_unit_ready(0),
        Err(Error::CheckCondition {
            key: UNIT_ATTENTION,
            asc: 0x29,
            ascq: 0
        })
    );
    host.test_unit_ready(0).unwrap();

    let cap = host.read_capacity(0).unwrap();
    assert_eq!(cap.block_count(), BLOCKS as u64);
    assert_eq!(cap.block_size, BLOCK_SIZE as u32);

    assert_eq!(host.request_sense(0).unwrap(), Sense { key: NO_SENSE, asc: 0, ascq: 0 });

    assert_eq!(
        host.test_unit_ready(3),
        Err(Error::CheckCondition {
            key: scsi::ILLEGAL_REQUEST,
            asc: 0x25,
            ascq: 0
        })
    );
}

#[test]
fn overall_command_status_failure() {
    let mut fake = FakeUfs::new();
    let mut dma = dma();
    let mut host = host(&mut fake, &mut dma);
    host.init().unwrap();
    host.regs().ocs = OCS_FATAL_ERROR;
    assert_eq!(host.test_unit_ready(0), Err(Error::Ocs(OCS_FATAL_ERROR)));
}

#[test]
fn hung_request_is_cleared() {
    let mut fake = FakeUfs::new();
    let mut dma = dma();
    let mut host = host(&mut fake, &mut dma);
    host.init().unwrap();
    host.regs().hang = true;
    let err = host.test_unit_ready(0).unwrap_err();
    assert_eq!(err, Error::Timeout(Stage::TransferRequest));
    drop(host);

    assert_eq!(fake.clear_writes, vec![!1u32]);
    assert_eq!(fake.doorbell, 0);
}

#[test]
fn rejected_request() {
    let mut fake = FakeUfs::new();
    let mut dma = dma();
    let mut host = host(&mut fake, &mut dma);
    host.init().unwrap();
    host.regs().reject = true;
    let err = host.test_unit_ready(0).unwrap_err();
    assert_eq!(err, Error::Rejected);
    assert_eq!(err.kind(), ErrorKind::Protocol);
}

#[test]
fn flags_attributes_and_descriptors() {
    let mut fake = FakeUfs::new();
    let mut dma = dma();
    {
        let mut host = host(&mut fake, &mut dma);
        host.init().unwrap();

        assert_eq!(host.read_attr(QUERY_ATTR_IDN_BOOT_LU_EN, 0, 0), Ok(1));
        host.write_attr(QUERY_ATTR_IDN_ACTIVE_ICC_LVL, 0, 0, 0x0f).unwrap();
        assert_eq!(host.read_attr(QUERY_ATTR_IDN_ACTIVE_ICC_LVL, 0, 0), Ok(0x0f));

        assert_eq!(host.toggle_flag(QUERY_FLAG_IDN_BKOPS_EN), Ok(true));
        assert_eq!(host.read_flag(QUERY_FLAG_IDN_BKOPS_EN), Ok(true));
        host.clear_flag(QUERY_FLAG_IDN_BKOPS_EN).unwrap();
        assert_eq!(host.read_flag(QUERY_FLAG_IDN_BKOPS_EN), Ok(false));

        let unit = host.read_unit_info(0).unwrap();
        assert!(unit.lu_enable);
        assert_eq!(unit.block_size, BLOCK_SIZE);
        assert_eq!(unit.block_count, BLOCKS as u64);

        let mut name = [0u8; 16];
        let n = host.read_string(1, &mut name).unwrap();
        assert_eq!(&name[..n], b"ACME");

        assert_eq!(
            host.write_descriptor(QUERY_DESC_IDN_CONFIGURATION, 0, 0, &[0; 16]),
            Err(Error::QueryResponse(QUERY_RESULT_NOT_WRITEABLE))
        );
        assert_eq!(
            host.read_attr(0x20, 0, 0),
            Err(Error::QueryResponse(QUERY_RESULT_INVALID_IDN))
        );
    }

    let attempts = fake
        .dev
        .queries
        .iter()
        .filter(|&&q| q == (QueryOpcode::ReadAttr as u8, 0x20))
        .count();
    assert_eq!(attempts, 3);
}

#[test]
fn dme_attribute_access() {
    let mut fake = FakeUfs::new();
    let mut dma = dma();
    {
        let mut host = host(&mut fake, &mut dma);
        host.init().unwrap();
        host.dme_set(PA_TXTERMINATION, 0, 1).unwrap();
        assert_eq!(host.dme_get(PA_TXTERMINATION, 0), Ok(1));
        assert_eq!(host.dme_peer_get(PA_MAXRXHSGEAR, 0), Ok(3));
        host.dme_peer_set(PA_TXGEAR, 0, 2).unwrap();
        assert_eq!(
            host.dme_get(PA_AVAILTXDATALANES, 0),
            Err(Error::UicResult {
                cmd: UicCmd::DmeGet as u8,
                result: 2
            })
        );
    }
    assert_eq!(fake.dme.get(&(uic_arg_mib_sel(PA_TXGEAR, 0), true)), Some(&2));
}

#[test]
fn power_mode_is_clamped_to_link_capabilities() {
    let mut fake = FakeUfs::new();
    let mut dma = dma();
    {
        let mut host = host(&mut fake, &mut dma);
        host.init().unwrap();
        let mode = host.change_power_mode(PowerMode::fast(5)).unwrap();
        assert_eq!((mode.gear_rx, mode.gear_tx), (4, 3));
        assert_eq!((mode.lane_rx, mode.lane_tx), (2, 2));
    }

    assert_eq!(fake.dme_value(PA_RXGEAR), Some(4));
    assert_eq!(fake.dme_value(PA_TXGEAR), Some(3));
    assert_eq!(fake.dme_value(PA_ACTIVERXDATALANES), Some(2));
    assert_eq!(fake.dme_value(PA_RXTERMINATION), Some(1));
    assert_eq!(fake.dme_value(PA_HSSERIES), Some(HsRate::B as u32));
    assert_eq!(fake.dme_value(PA_PWRMODE), Some(0x11));
    assert_eq!(fake.is & UIC_POWER_MODE, 0);
}

#[test]
fn power_mode_change_failure() {
    let mut fake = FakeUfs::new();
    fake.pwr_status = PWR_ERROR_CAP;
    let mut dma = dma();
    let mut host = host(&mut fake, &mut dma);
    host.init().unwrap();
    assert_eq!(
        host.change_power_mode(PowerMode::fast(4)),
        Err(Error::PowerModeStatus(PWR_ERROR_CAP))
    );
}

#[test]
fn hibernate_enter_and_exit() {
    let mut fake = FakeUfs::new();
    let mut dma = dma();
    {
        let mut host = host(&mut fake, &mut dma);
        host.init().unwrap();
        host.hibernate_enter().unwrap();
        host.hibernate_exit().unwrap();
    }
    assert_eq!(fake.uic_count(UicCmd::DmeHibernateEnter), 1);
    assert_eq!(fake.uic_count(UicCmd::DmeHibernateExit), 1);
    assert_eq!(fake.is & UFSHCD_UIC_PWR_MASK, 0);
}

#[derive(Default)]
struct RecordingVariant {
    calls: Vec<(&'static str, NotifyStage)>,
    /// HCE as seen by the last pre-enable hook
    hce_at_pre: Option<u32>,
}

impl UfsVariantOps for RecordingVariant {
    fn hce_enable_notify(&mut self, regs: &mut dyn RegisterIo, stage: NotifyStage) -> Result<(), Error> {
        if stage == NotifyStage::Pre {
            self.hce_at_pre = Some(regs.read32(REG_CONTROLLER_ENABLE));
            regs.write32(0x100, 0xabcd);
        }
        self.calls.push(("hce", stage));
        Ok(())
    }

    fn link_startup_notify(&mut self, _regs: &mut dyn RegisterIo, stage: NotifyStage) -> Result<(), Error> {
        self.calls.push(("link", stage));
        Ok(())
    }

    fn pwr_change_notify(
        &mut self,
        _regs: &mut dyn RegisterIo,
        stage: NotifyStage,
        mode: &mut PowerMode,
    ) -> Result<(), Error> {
        if stage == NotifyStage::Pre {
            mode.hs_rate = HsRate::A;
        }
        self.calls.push(("pwr", stage));
        Ok(())
    }
}

#[test]
fn variant_hooks_wrap_each_step() {
    let mut fake = FakeUfs::new();
    let mut dma = dma();
    let mut variant = RecordingVariant::default();
    {
        let mut host = UfsHost::new(&mut fake, StepTimer::new(), &mut variant, &mut dma, UfsConfig::default());
        host.init().unwrap();
        host.change_power_mode(PowerMode::fast(4)).unwrap();
    }

    use NotifyStage::{Post, Pre};
    assert_eq!(
        variant.calls,
        vec![
            ("hce", Pre),
            ("hce", Post),
            ("link", Pre),
            ("link", Post),
            ("pwr", Pre),
            ("pwr", Post)
        ]
    );
    assert_eq!(fake.vendor.get(&0x100), Some(&0xabcd));
    assert_eq!(fake.dme_value(PA_HSSERIES), Some(HsRate::A as u32));
}

/// Generic consumer of the block device interface
fn copy_block<D: BlockDevice>(dev: &mut D, from: u64, to: u64, scratch: &mut [u8]) -> Result<(), D::Error> {
    let block = &mut scratch[..dev.block_size()];
    dev.read_blocks(from, block)?;
    dev.write_blocks(to, block)
}

#[test]
fn lun_serves_generic_block_consumers() {
    let mut fake = FakeUfs::new();
    fake.dev.storage[3 * BLOCK_SIZE..4 * BLOCK_SIZE].fill(0x5a);
    let mut dma = dma();
    let mut buf = Aligned::boxed();
    {
        let mut host = host(&mut fake, &mut dma);
        host.init().unwrap();
        let mut lun = UfsLun::open(&mut host, 0).unwrap();
        copy_block(&mut lun, 3, 40, &mut buf.0).unwrap();
    }
    assert!(fake.dev.storage[40 * BLOCK_SIZE..41 * BLOCK_SIZE].iter().all(|&b| b == 0x5a));
}

#[test]
fn generic_host_type_defaults() {
    let mut fake = FakeUfs::new();
    let mut dma = dma();
    let host: UfsHost<'_, _, _, GenericUfs> = host(&mut fake, &mut dma);
    assert!(host.device_info().is_none());
}

#[test]
fn pre_enable_hook_sees_a_stopped_controller() {
    let mut fake = FakeUfs::new();
    fake.hce = CONTROLLER_ENABLE;
    let mut dma = dma();
    let mut variant = RecordingVariant::default();
    {
        let mut host = UfsHost::new(&mut fake, StepTimer::new(), &mut variant, &mut dma, UfsConfig::default());
        host.hce_enable().unwrap();
    }
    assert_eq!(variant.hce_at_pre, Some(0));
    assert_eq!(fake.hce_writes, vec![0, CONTROLLER_ENABLE]);
}

#[test]
fn oversized_block_size_is_refused() {
    let mut fake = FakeUfs::new();
    fake.dev.reported_block_size = 2 * UFS_MAX_XFER as u32;
    let mut dma = dma();
    let mut host = host(&mut fake, &mut dma);
    host.init().unwrap();
    assert!(matches!(UfsLun::open(&mut host, 0), Err(Error::InvalidArgument)));
    drop(host);

    assert!(!fake.dev.commands.contains(&scsi::READ_10));
}
