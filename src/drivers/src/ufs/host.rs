/* SPDX-License-Identifier: GPL-2.0-only */

//! Host controller bring-up and the UTP transfer request path.

use super::{
    config::{UfsConfig, HCE_DISABLE_TIMEOUT_MS},
    desc::{DataDirection, UfsDmaArea, OCS_SUCCESS},
    query::DeviceInfo,
    regs::*,
    upiu::*,
    variant::{GenericUfs, NotifyStage, UfsVariantOps},
    Error, Stage,
};
use core::ptr::{addr_of, read_volatile};
use core::sync::atomic::{fence, Ordering};
use log::{debug, error, info, warn};
use oreboot_asm::io::RegisterIo;
use util::timer::{poll_msecs, MonotonicTimer};

/// The driver keeps one request in flight, always in this slot.
const TRANSFER_SLOT: usize = 0;

/// Whether `len` bytes at `addr` are reachable by a controller limited to
/// 32-bit DMA addresses.
pub(super) fn below_4g(addr: u64, len: u64) -> bool {
    match len {
        0 => true,
        _ => addr.checked_add(len).map_or(false, |end| end <= 1 << 32),
    }
}

/// A completed request: the response UPIU as the controller left it.
pub(crate) struct Response {
    pub header: UpiuHeader,
    pub raw: [u8; UPIU_AREA_SIZE],
}

pub struct UfsHost<'d, R, T, V = GenericUfs> {
    pub(super) regs: R,
    pub(super) timer: T,
    pub(super) variant: V,
    pub(super) config: UfsConfig,
    pub(super) dma: &'d mut UfsDmaArea,
    task_tag: u8,
    cap: Capabilities,
    version: Version,
    info: Option<DeviceInfo>,
}

impl<'d, R: RegisterIo, T: MonotonicTimer> UfsHost<'d, R, T, GenericUfs> {
    /// A host for a controller without vendor quirks, default tunables.
    pub fn generic(regs: R, timer: T, dma: &'d mut UfsDmaArea) -> Self {
        Self::new(regs, timer, GenericUfs, dma, UfsConfig::default())
    }
}

impl<'d, R: RegisterIo, T: MonotonicTimer, V: UfsVariantOps> UfsHost<'d, R, T, V> {
    /// `dma` must stay at the same address for as long as the controller is
    /// enabled.
    pub fn new(regs: R, timer: T, variant: V, dma: &'d mut UfsDmaArea, config: UfsConfig) -> Self {
        Self {
            regs,
            timer,
            variant,
            config,
            dma,
            task_tag: 0,
            cap: Capabilities::from(0),
            version: Version::from(0),
            info: None,
        }
    }

    pub fn regs(&mut self) -> &mut R {
        &mut self.regs
    }

    pub fn variant(&mut self) -> &mut V {
        &mut self.variant
    }

    pub fn into_inner(self) -> (R, V) {
        (self.regs, self.variant)
    }

    pub fn capabilities(&self) -> Capabilities {
        self.cap
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Device descriptor summary, once [`init`](Self::init) has succeeded.
    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.info.as_ref()
    }

    pub(super) fn status(&self) -> ControllerStatus {
        ControllerStatus::from(self.regs.read32(REG_CONTROLLER_STATUS))
    }

    pub(super) fn next_tag(&mut self) -> u8 {
        let tag = self.task_tag;
        self.task_tag = self.task_tag.wrapping_add(1);
        tag
    }

    /// Brings the controller and the device up to the point where logical
    /// units accept SCSI commands.
    pub fn init(&mut self) -> Result<(), Error> {
        self.bring_up().map_err(|e| {
            error!("UFS: initialization failed: {}", e);
            e
        })
    }

    fn bring_up(&mut self) -> Result<(), Error> {
        self.cap = Capabilities::from(self.regs.read32(REG_CONTROLLER_CAPABILITIES));
        self.version = Version::from(self.regs.read32(REG_UFS_VERSION));
        info!(
            "UFS: UFSHCI {}.{}, {} transfer slots, {} task slots",
            self.version.major(),
            self.version.minor(),
            self.cap.nutrs(),
            self.cap.nutmrs()
        );

        let dma_len = core::mem::size_of::<UfsDmaArea>() as u64;
        if !self.cap.addr64() && !below_4g(self.dma.utrl_addr(), dma_len) {
            error!("UFS: DMA area at {:#x} is above 4 GiB", self.dma.utrl_addr());
            return Err(Error::InvalidArgument);
        }

        self.hce_enable()?;
        self.regs.write32(REG_INTERRUPT_ENABLE, UFSHCD_ENABLE_INTRS);
        self.link_startup()?;
        self.make_hba_operational()?;
        self.nop_out()?;
        self.complete_device_init()?;

        let info = self.read_device_info()?;
        info!(
            "UFS: device spec {:x}.{:02x}, manufacturer {:#06x}, {} LUs",
            info.spec_version >> 8,
            info.spec_version & 0xff,
            info.manufacturer_id,
            info.number_lu
        );
        self.info = Some(info);
        Ok(())
    }

    fn is_hce_enabled(&self) -> bool {
        self.regs.read32(REG_CONTROLLER_ENABLE) & CONTROLLER_ENABLE != 0
    }

    /// Resets the controller by dropping HCE.
    pub fn hce_disable(&mut self) -> Result<(), Error> {
        self.regs.write32(REG_CONTROLLER_ENABLE, 0);
        poll_msecs(&self.timer, HCE_DISABLE_TIMEOUT_MS, || {
            (self.regs.read32(REG_CONTROLLER_ENABLE) & CONTROLLER_ENABLE == 0).then_some(())
        })
        .ok_or_else(|| {
            error!("UFS: controller did not stop");
            Error::Timeout(Stage::HostDisable)
        })
    }

    /// Sets HCE and waits for the controller to report itself enabled,
    /// stopping it first if firmware left it running.
    pub fn hce_enable(&mut self) -> Result<(), Error> {
        if self.is_hce_enabled() {
            debug!("UFS: controller already enabled, resetting");
            self.hce_disable()?;
        }

        self.variant.hce_enable_notify(&mut self.regs, NotifyStage::Pre)?;
        self.regs.write32(REG_CONTROLLER_ENABLE, CONTROLLER_ENABLE);

        let mut enabled = false;
        for _ in 0..self.config.hce_enable_retries {
            self.timer.mdelay(self.config.hce_retry_delay_ms);
            if self.is_hce_enabled() {
                enabled = true;
                break;
            }
        }
        if !enabled {
            error!("UFS: controller enable failed");
            return Err(Error::Timeout(Stage::HostEnable));
        }

        self.variant.hce_enable_notify(&mut self.regs, NotifyStage::Post)?;
        debug!("UFS: controller enabled");
        Ok(())
    }

    fn make_hba_operational(&mut self) -> Result<(), Error> {
        let utrl = self.dma.utrl_addr();
        let utmrl = self.dma.utmrl_addr();
        self.regs.write64(REG_UTP_TRANSFER_REQ_LIST_BASE_L, utrl);
        self.regs.write64(REG_UTP_TASK_REQ_LIST_BASE_L, utmrl);

        if !self.status().lists_ready() {
            error!("UFS: transfer and task request lists not ready");
            return Err(Error::ListsNotReady);
        }

        self.regs.write32(REG_UTP_TRANSFER_REQ_LIST_RUN_STOP, UTP_RUN_STOP);
        self.regs.write32(REG_UTP_TASK_REQ_LIST_RUN_STOP, UTP_RUN_STOP);
        debug!("UFS: UTRL at {:#x}, UTMRL at {:#x}", utrl, utmrl);
        Ok(())
    }

    /// Submits the UPIU already built in the command descriptor, with an
    /// optional data phase of `len` bytes at `addr`, and waits for it.
    pub(crate) fn send_request(
        &mut self,
        dir: DataDirection,
        addr: u64,
        len: usize,
        timeout_ms: u64,
    ) -> Result<Response, Error> {
        let slot = 1u32 << TRANSFER_SLOT;
        if self.regs.read32(REG_UTP_TRANSFER_REQ_DOOR_BELL) & slot != 0 {
            return Err(Error::Busy);
        }
        if !self.cap.addr64() && !below_4g(addr, len as u64) {
            return Err(Error::InvalidArgument);
        }

        let entries = self.dma.fill_prdt(addr, len).ok_or(Error::InvalidArgument)?;
        self.dma.write_utrd(TRANSFER_SLOT, dir, entries);
        self.dma.clear_response();
        let request = UpiuHeader::parse(&self.dma.ucd.command_upiu);

        fence(Ordering::SeqCst);
        self.regs.write32(REG_UTP_TRANSFER_REQ_DOOR_BELL, slot);

        let done = poll_msecs(&self.timer, timeout_ms, || {
            (self.regs.read32(REG_UTP_TRANSFER_REQ_DOOR_BELL) & slot == 0).then_some(())
        });
        if done.is_none() {
            error!(
                "UFS: request {:#x} tag {} timed out",
                request.transaction_type, request.task_tag
            );
            /* Writing 0 to a slot's bit aborts it */
            self.regs.write32(REG_UTP_TRANSFER_REQ_LIST_CLEAR, !slot);
            return Err(Error::Timeout(Stage::TransferRequest));
        }
        self.regs.write32(REG_INTERRUPT_STATUS, UTP_TRANSFER_REQ_COMPL);
        fence(Ordering::SeqCst);

        let ocs = self.dma.ocs(TRANSFER_SLOT);
        if ocs != OCS_SUCCESS {
            warn!("UFS: tag {} completed with OCS {:#x}", request.task_tag, ocs);
            return Err(Error::Ocs(ocs));
        }

        let raw = unsafe { read_volatile(addr_of!(self.dma.ucd.response_upiu)) };
        let header = UpiuHeader::parse(&raw);
        if header.transaction_type == UPIU_TRANSACTION_REJECT_UPIU {
            return Err(Error::Rejected);
        }
        let expected = match request.transaction_type {
            UPIU_TRANSACTION_NOP_OUT => UPIU_TRANSACTION_NOP_IN,
            UPIU_TRANSACTION_COMMAND => UPIU_TRANSACTION_RESPONSE,
            UPIU_TRANSACTION_QUERY_REQ => UPIU_TRANSACTION_QUERY_RSP,
            other => other | 0x20,
        };
        if header.transaction_type != expected {
            return Err(Error::BadResponse {
                expected,
                got: header.transaction_type,
            });
        }
        if header.task_tag != request.task_tag {
            return Err(Error::TaskTagMismatch {
                expected: request.task_tag,
                got: header.task_tag,
            });
        }

        Ok(Response { header, raw })
    }

    /// Pings the device with NOP OUT until it answers with NOP IN.
    pub fn nop_out(&mut self) -> Result<(), Error> {
        let mut result = Err(Error::NoDevice);
        for attempt in 1..=self.config.nop_out_retries {
            let tag = self.next_tag();
            build_nop_out(&mut self.dma.ucd.command_upiu, tag);
            result = self
                .send_request(DataDirection::None, 0, 0, self.config.nop_out_timeout_ms)
                .and_then(|rsp| match rsp.header.response {
                    UPIU_RESPONSE_TARGET_SUCCESS => Ok(()),
                    r => Err(Error::UpiuResponse(r)),
                });
            match result {
                Ok(()) => break,
                Err(e) => debug!("UFS: NOP OUT attempt {} failed: {}", attempt, e),
            }
        }
        if let Err(e) = result {
            error!("UFS: device did not answer NOP OUT: {}", e);
        }
        result
    }

    pub(super) fn deadline_usecs(&self, ms: u64) -> u64 {
        self.timer.now_usecs().saturating_add(ms.saturating_mul(1000))
    }

    pub(super) fn past(&self, deadline: u64) -> bool {
        self.timer.now_usecs() >= deadline
    }

    /// Copies the start of the scratch area, which the controller may have
    /// written, into `out`.
    pub(super) fn read_scratch(&self, out: &mut [u8]) {
        let base = addr_of!(self.dma.scratch.0) as *const u8;
        for (i, b) in out.iter_mut().take(self.dma.scratch.0.len()).enumerate() {
            *b = unsafe { read_volatile(base.add(i)) };
        }
    }

    pub(super) fn write_scratch(&mut self, data: &[u8]) {
        let n = data.len().min(self.dma.scratch.0.len());
        self.dma.scratch.0[..n].copy_from_slice(&data[..n]);
    }
}
