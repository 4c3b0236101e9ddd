/* SPDX-License-Identifier: GPL-2.0-only */

//! Device management: query requests for flags, attributes and descriptors.

use super::{
    desc::DataDirection,
    host::{Response, UfsHost},
    upiu::*,
    variant::UfsVariantOps,
    Error, Stage,
};
use log::{debug, error, info, warn};
use oreboot_asm::io::RegisterIo;
use util::timer::MonotonicTimer;

/* Device descriptor offsets */
const DEVICE_DESC_PARAM_NUM_LU: usize = 0x06;
const DEVICE_DESC_PARAM_NUM_WLU: usize = 0x07;
const DEVICE_DESC_PARAM_BOOT_ENBL: usize = 0x08;
const DEVICE_DESC_PARAM_INIT_PWR_MODE: usize = 0x0a;
const DEVICE_DESC_PARAM_SPEC_VER: usize = 0x10;
const DEVICE_DESC_PARAM_MANF_NAME: usize = 0x14;
const DEVICE_DESC_PARAM_PRDCT_NAME: usize = 0x15;
const DEVICE_DESC_PARAM_SN: usize = 0x16;
const DEVICE_DESC_PARAM_MANF_ID: usize = 0x18;
const DEVICE_DESC_MIN_LEN: usize = 0x1a;

/* Unit descriptor offsets */
const UNIT_DESC_PARAM_LU_ENABLE: usize = 0x03;
const UNIT_DESC_PARAM_BOOT_LUN_ID: usize = 0x04;
const UNIT_DESC_PARAM_LU_WR_PROTECT: usize = 0x05;
const UNIT_DESC_PARAM_LU_Q_DEPTH: usize = 0x06;
const UNIT_DESC_PARAM_MEM_TYPE: usize = 0x08;
const UNIT_DESC_PARAM_LOGICAL_BLK_SIZE: usize = 0x0a;
const UNIT_DESC_PARAM_LOGICAL_BLK_COUNT: usize = 0x0b;
const UNIT_DESC_MIN_LEN: usize = 0x13;

/* Header of every descriptor */
const QUERY_DESC_LENGTH_OFFSET: usize = 0x00;
const QUERY_DESC_DESC_TYPE_OFFSET: usize = 0x01;

/// What the driver keeps from the device descriptor
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DeviceInfo {
    pub number_lu: u8,
    pub number_wlu: u8,
    pub boot_enable: bool,
    pub init_power_mode: u8,
    /// BCD, major version in the high byte
    pub spec_version: u16,
    pub manufacturer_id: u16,
    pub manufacturer_name_index: u8,
    pub product_name_index: u8,
    pub serial_number_index: u8,
}

impl DeviceInfo {
    pub fn parse(desc: &[u8]) -> Option<Self> {
        if desc.len() < DEVICE_DESC_MIN_LEN {
            return None;
        }
        let be16 = |off: usize| u16::from_be_bytes([desc[off], desc[off + 1]]);
        Some(Self {
            number_lu: desc[DEVICE_DESC_PARAM_NUM_LU],
            number_wlu: desc[DEVICE_DESC_PARAM_NUM_WLU],
            boot_enable: desc[DEVICE_DESC_PARAM_BOOT_ENBL] != 0,
            init_power_mode: desc[DEVICE_DESC_PARAM_INIT_PWR_MODE],
            spec_version: be16(DEVICE_DESC_PARAM_SPEC_VER),
            manufacturer_id: be16(DEVICE_DESC_PARAM_MANF_ID),
            manufacturer_name_index: desc[DEVICE_DESC_PARAM_MANF_NAME],
            product_name_index: desc[DEVICE_DESC_PARAM_PRDCT_NAME],
            serial_number_index: desc[DEVICE_DESC_PARAM_SN],
        })
    }
}

/// What the driver keeps from a unit descriptor
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct UnitInfo {
    pub lu_enable: bool,
    pub boot_lun_id: u8,
    pub write_protect: u8,
    pub queue_depth: u8,
    pub memory_type: u8,
    pub block_size: usize,
    pub block_count: u64,
}

impl UnitInfo {
    pub fn parse(desc: &[u8]) -> Option<Self> {
        if desc.len() < UNIT_DESC_MIN_LEN {
            return None;
        }
        let shift = desc[UNIT_DESC_PARAM_LOGICAL_BLK_SIZE];
        let mut count = [0u8; 8];
        count.copy_from_slice(&desc[UNIT_DESC_PARAM_LOGICAL_BLK_COUNT..UNIT_DESC_PARAM_LOGICAL_BLK_COUNT + 8]);
        Some(Self {
            lu_enable: desc[UNIT_DESC_PARAM_LU_ENABLE] != 0,
            boot_lun_id: desc[UNIT_DESC_PARAM_BOOT_LUN_ID],
            write_protect: desc[UNIT_DESC_PARAM_LU_WR_PROTECT],
            queue_depth: desc[UNIT_DESC_PARAM_LU_Q_DEPTH],
            memory_type: desc[UNIT_DESC_PARAM_MEM_TYPE],
            block_size: 1usize.checked_shl(shift as u32)?,
            block_count: u64::from_be_bytes(count),
        })
    }
}

impl<'d, R: RegisterIo, T: MonotonicTimer, V: UfsVariantOps> UfsHost<'d, R, T, V> {
    fn query(&mut self, opcode: QueryOpcode, fields: QueryFields, data: &[u8]) -> Result<Response, Error> {
        if data.len() > UPIU_MAX_DATA_SEGMENT {
            return Err(Error::InvalidArgument);
        }
        let tag = self.next_tag();
        let fields = QueryFields {
            opcode: opcode as u8,
            ..fields
        };
        build_query(&mut self.dma.ucd.command_upiu, tag, opcode.function(), &fields, data);

        let rsp = self.send_request(DataDirection::None, 0, 0, self.config.query_timeout_ms)?;
        match rsp.header.response {
            QUERY_RESULT_SUCCESS => Ok(rsp),
            code => {
                debug!("UFS: query {:?} idn {:#x} failed with {:#x}", opcode, fields.idn, code);
                Err(Error::QueryResponse(code))
            }
        }
    }

    fn query_retry(&mut self, opcode: QueryOpcode, fields: QueryFields, data: &[u8]) -> Result<Response, Error> {
        let mut result = self.query(opcode, fields, data);
        for _ in 1..self.config.query_retries {
            match result {
                Ok(_) => break,
                Err(e) => {
                    debug!("UFS: retrying query {:?}: {}", opcode, e);
                    result = self.query(opcode, fields, data);
                }
            }
        }
        if let Err(e) = &result {
            warn!("UFS: query {:?} idn {:#x} failed: {}", opcode, fields.idn, e);
        }
        result
    }

    fn flag_op(&mut self, opcode: QueryOpcode, idn: u8) -> Result<bool, Error> {
        let fields = QueryFields {
            idn,
            ..Default::default()
        };
        let rsp = self.query_retry(opcode, fields, &[])?;
        /* The flag value is the last byte of the value field */
        Ok(QueryFields::parse(&rsp.raw).value & 0x1 != 0)
    }

    pub fn read_flag(&mut self, idn: u8) -> Result<bool, Error> {
        self.flag_op(QueryOpcode::ReadFlag, idn)
    }

    pub fn set_flag(&mut self, idn: u8) -> Result<(), Error> {
        self.flag_op(QueryOpcode::SetFlag, idn).map(|_| ())
    }

    pub fn clear_flag(&mut self, idn: u8) -> Result<(), Error> {
        self.flag_op(QueryOpcode::ClearFlag, idn).map(|_| ())
    }

    /// Toggles a flag and returns its new value.
    pub fn toggle_flag(&mut self, idn: u8) -> Result<bool, Error> {
        self.flag_op(QueryOpcode::ToggleFlag, idn)
    }

    pub fn read_attr(&mut self, idn: u8, index: u8, selector: u8) -> Result<u32, Error> {
        let fields = QueryFields {
            idn,
            index,
            selector,
            ..Default::default()
        };
        let rsp = self.query_retry(QueryOpcode::ReadAttr, fields, &[])?;
        Ok(QueryFields::parse(&rsp.raw).value)
    }

    pub fn write_attr(&mut self, idn: u8, index: u8, selector: u8, value: u32) -> Result<(), Error> {
        let fields = QueryFields {
            idn,
            index,
            selector,
            value,
            ..Default::default()
        };
        self.query_retry(QueryOpcode::WriteAttr, fields, &[]).map(|_| ())
    }

    /// Reads up to `buf.len()` bytes of a descriptor and returns how many
    /// the device sent.
    pub fn read_descriptor(&mut self, idn: u8, index: u8, selector: u8, buf: &mut [u8]) -> Result<usize, Error> {
        let fields = QueryFields {
            idn,
            index,
            selector,
            length: buf.len().min(QUERY_DESC_MAX_SIZE) as u16,
            ..Default::default()
        };
        let rsp = self.query_retry(QueryOpcode::ReadDesc, fields, &[])?;

        let len = (rsp.header.data_segment_length as usize)
            .min(UPIU_MAX_DATA_SEGMENT)
            .min(buf.len());
        let data = &rsp.raw[UPIU_BASIC_SIZE..UPIU_BASIC_SIZE + len];
        if len > QUERY_DESC_DESC_TYPE_OFFSET && data[QUERY_DESC_DESC_TYPE_OFFSET] != idn {
            error!(
                "UFS: asked for descriptor {:#x}, got {:#x}",
                idn, data[QUERY_DESC_DESC_TYPE_OFFSET]
            );
            return Err(Error::BadResponse {
                expected: idn,
                got: data[QUERY_DESC_DESC_TYPE_OFFSET],
            });
        }
        buf[..len].copy_from_slice(data);

        /* bLength may be shorter than what came back */
        let described = data.get(QUERY_DESC_LENGTH_OFFSET).map_or(len, |&l| l as usize);
        Ok(len.min(described.max(QUERY_DESC_DESC_TYPE_OFFSET + 1)))
    }

    pub fn write_descriptor(&mut self, idn: u8, index: u8, selector: u8, data: &[u8]) -> Result<(), Error> {
        let fields = QueryFields {
            idn,
            index,
            selector,
            length: data.len() as u16,
            ..Default::default()
        };
        self.query_retry(QueryOpcode::WriteDesc, fields, data).map(|_| ())
    }

    /// Sets fDeviceInit and waits for the device to clear it, which it does
    /// once its internal initialization is done.
    pub fn complete_device_init(&mut self) -> Result<(), Error> {
        self.set_flag(QUERY_FLAG_IDN_FDEVICEINIT).map_err(|e| {
            error!("UFS: setting fDeviceInit failed: {}", e);
            e
        })?;

        let deadline = self.deadline_usecs(self.config.fdeviceinit_timeout_ms);
        loop {
            if !self.read_flag(QUERY_FLAG_IDN_FDEVICEINIT)? {
                debug!("UFS: device initialization complete");
                return Ok(());
            }
            if self.past(deadline) {
                error!("UFS: fDeviceInit was not cleared by the device");
                return Err(Error::Timeout(Stage::DeviceInit));
            }
        }
    }

    pub fn read_device_info(&mut self) -> Result<DeviceInfo, Error> {
        let mut desc = [0u8; QUERY_DESC_MAX_SIZE];
        let len = self.read_descriptor(QUERY_DESC_IDN_DEVICE, 0, 0, &mut desc)?;
        DeviceInfo::parse(&desc[..len]).ok_or_else(|| {
            error!("UFS: device descriptor too short ({} bytes)", len);
            Error::QueryResponse(QUERY_RESULT_INVALID_LENGTH)
        })
    }

    pub fn read_unit_info(&mut self, lun: u8) -> Result<UnitInfo, Error> {
        let mut desc = [0u8; QUERY_DESC_MAX_SIZE];
        let len = self.read_descriptor(QUERY_DESC_IDN_UNIT, lun, 0, &mut desc)?;
        let unit = UnitInfo::parse(&desc[..len]).ok_or_else(|| {
            error!("UFS: unit descriptor {} too short ({} bytes)", lun, len);
            Error::QueryResponse(QUERY_RESULT_INVALID_LENGTH)
        })?;
        info!(
            "UFS: LU {}: {} blocks of {} bytes{}",
            lun,
            unit.block_count,
            unit.block_size,
            if unit.lu_enable { "" } else { " (disabled)" }
        );
        Ok(unit)
    }

    /// Reads string descriptor `index` (UTF-16BE) into `out` as ASCII,
    /// replacing anything else with '?'. Returns the number of characters.
    pub fn read_string(&mut self, index: u8, out: &mut [u8]) -> Result<usize, Error> {
        let mut desc = [0u8; QUERY_DESC_MAX_SIZE];
        let len = self.read_descriptor(QUERY_DESC_IDN_STRING, index, 0, &mut desc)?;
        let chars = desc.get(2..len).unwrap_or(&[]).chunks_exact(2);
        let mut n = 0;
        for (dst, c) in out.iter_mut().zip(chars) {
            let c = u16::from_be_bytes([c[0], c[1]]);
            *dst = if c < 0x80 { c as u8 } else { b'?' };
            n += 1;
        }
        Ok(n)
    }
}
