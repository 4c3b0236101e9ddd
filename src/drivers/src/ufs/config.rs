/* SPDX-License-Identifier: GPL-2.0-only */

/* Bring-up timing, from the UFSHCI and UFS device specifications */

pub const HCE_ENABLE_RETRIES: u32 = 10;
pub const HCE_RETRY_DELAY_MS: u64 = 1;
pub const HCE_DISABLE_TIMEOUT_MS: u64 = 10;
pub const DME_LINKSTARTUP_RETRIES: u32 = 3;
pub const UIC_CMD_TIMEOUT_MS: u64 = 500;
pub const NOP_OUT_RETRIES: u32 = 10;
pub const NOP_OUT_TIMEOUT_MS: u64 = 50;
pub const QUERY_REQ_RETRIES: u32 = 3;
pub const QUERY_REQ_TIMEOUT_MS: u64 = 1500;
pub const FDEVICEINIT_TIMEOUT_MS: u64 = 1500;
pub const SCSI_CMD_TIMEOUT_MS: u64 = 5000;
pub const UNIT_READY_RETRIES: u32 = 5;

/// Per-board tunables for the UFS host driver.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct UfsConfig {
    pub hce_enable_retries: u32,
    pub hce_retry_delay_ms: u64,
    pub link_startup_retries: u32,
    pub uic_cmd_timeout_ms: u64,
    pub nop_out_retries: u32,
    pub nop_out_timeout_ms: u64,
    pub query_retries: u32,
    pub query_timeout_ms: u64,
    pub fdeviceinit_timeout_ms: u64,
    pub scsi_timeout_ms: u64,
    pub unit_ready_retries: u32,
}

impl Default for UfsConfig {
    fn default() -> Self {
        Self {
            hce_enable_retries: HCE_ENABLE_RETRIES,
            hce_retry_delay_ms: HCE_RETRY_DELAY_MS,
            link_startup_retries: DME_LINKSTARTUP_RETRIES,
            uic_cmd_timeout_ms: UIC_CMD_TIMEOUT_MS,
            nop_out_retries: NOP_OUT_RETRIES,
            nop_out_timeout_ms: NOP_OUT_TIMEOUT_MS,
            query_retries: QUERY_REQ_RETRIES,
            query_timeout_ms: QUERY_REQ_TIMEOUT_MS,
            fdeviceinit_timeout_ms: FDEVICEINIT_TIMEOUT_MS,
            scsi_timeout_ms: SCSI_CMD_TIMEOUT_MS,
            unit_ready_retries: UNIT_READY_RETRIES,
        }
    }
}
