/* SPDX-License-Identifier: GPL-2.0-only */

//! UFS protocol information units exchanged through the command descriptor.
//!
//! All multi-byte UPIU fields are big-endian.

/* Transaction codes, initiator to target */
pub const UPIU_TRANSACTION_NOP_OUT: u8 = 0x00;
pub const UPIU_TRANSACTION_COMMAND: u8 = 0x01;
pub const UPIU_TRANSACTION_DATA_OUT: u8 = 0x02;
pub const UPIU_TRANSACTION_TASK_REQ: u8 = 0x04;
pub const UPIU_TRANSACTION_QUERY_REQ: u8 = 0x16;

/* Transaction codes, target to initiator */
pub const UPIU_TRANSACTION_NOP_IN: u8 = 0x20;
pub const UPIU_TRANSACTION_RESPONSE: u8 = 0x21;
pub const UPIU_TRANSACTION_DATA_IN: u8 = 0x22;
pub const UPIU_TRANSACTION_TASK_RSP: u8 = 0x24;
pub const UPIU_TRANSACTION_READY_XFER: u8 = 0x31;
pub const UPIU_TRANSACTION_QUERY_RSP: u8 = 0x36;
pub const UPIU_TRANSACTION_REJECT_UPIU: u8 = 0x3f;

/* Command UPIU flags */
pub const UPIU_CMD_FLAGS_NONE: u8 = 0x00;
pub const UPIU_CMD_FLAGS_WRITE: u8 = 0x20;
pub const UPIU_CMD_FLAGS_READ: u8 = 0x40;

/* Task attribute in the low flag bits */
pub const UPIU_TASK_ATTR_SIMPLE: u8 = 0x00;

pub const UPIU_COMMAND_SET_TYPE_SCSI: u8 = 0x0;

/* Query request functions */
pub const UPIU_QUERY_FUNC_STANDARD_READ_REQUEST: u8 = 0x01;
pub const UPIU_QUERY_FUNC_STANDARD_WRITE_REQUEST: u8 = 0x81;

/* Response field of the response UPIU */
pub const UPIU_RESPONSE_TARGET_SUCCESS: u8 = 0x00;
pub const UPIU_RESPONSE_TARGET_FAILURE: u8 = 0x01;

pub const UPIU_HEADER_SIZE: usize = 12;
/// Fixed part of every UPIU the driver builds or parses
pub const UPIU_BASIC_SIZE: usize = 32;
/// Room reserved for each of the command and response UPIUs
pub const UPIU_AREA_SIZE: usize = 512;
/// Largest data segment that fits behind a basic UPIU
pub const UPIU_MAX_DATA_SEGMENT: usize = UPIU_AREA_SIZE - UPIU_BASIC_SIZE;

/// Query request opcodes
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum QueryOpcode {
    Nop = 0x0,
    ReadDesc = 0x1,
    WriteDesc = 0x2,
    ReadAttr = 0x3,
    WriteAttr = 0x4,
    ReadFlag = 0x5,
    SetFlag = 0x6,
    ClearFlag = 0x7,
    ToggleFlag = 0x8,
}

impl QueryOpcode {
    /// Request function that carries this opcode
    pub const fn function(self) -> u8 {
        match self {
            Self::Nop | Self::ReadDesc | Self::ReadAttr | Self::ReadFlag => {
                UPIU_QUERY_FUNC_STANDARD_READ_REQUEST
            }
            _ => UPIU_QUERY_FUNC_STANDARD_WRITE_REQUEST,
        }
    }
}

/* Query response codes */
pub const QUERY_RESULT_SUCCESS: u8 = 0x00;
pub const QUERY_RESULT_NOT_READABLE: u8 = 0xf6;
pub const QUERY_RESULT_NOT_WRITEABLE: u8 = 0xf7;
pub const QUERY_RESULT_ALREADY_WRITTEN: u8 = 0xf8;
pub const QUERY_RESULT_INVALID_LENGTH: u8 = 0xf9;
pub const QUERY_RESULT_INVALID_VALUE: u8 = 0xfa;
pub const QUERY_RESULT_INVALID_SELECTOR: u8 = 0xfb;
pub const QUERY_RESULT_INVALID_INDEX: u8 = 0xfc;
pub const QUERY_RESULT_INVALID_IDN: u8 = 0xfd;
pub const QUERY_RESULT_INVALID_OPCODE: u8 = 0xfe;
pub const QUERY_RESULT_GENERAL_FAILURE: u8 = 0xff;

/* Flag IDNs */
pub const QUERY_FLAG_IDN_FDEVICEINIT: u8 = 0x01;
pub const QUERY_FLAG_IDN_PERMANENT_WPE: u8 = 0x02;
pub const QUERY_FLAG_IDN_PWR_ON_WPE: u8 = 0x03;
pub const QUERY_FLAG_IDN_BKOPS_EN: u8 = 0x04;

/* Attribute IDNs */
pub const QUERY_ATTR_IDN_BOOT_LU_EN: u8 = 0x00;
pub const QUERY_ATTR_IDN_POWER_MODE: u8 = 0x02;
pub const QUERY_ATTR_IDN_ACTIVE_ICC_LVL: u8 = 0x03;
pub const QUERY_ATTR_IDN_REF_CLK_FREQ: u8 = 0x0a;

/* Descriptor IDNs */
pub const QUERY_DESC_IDN_DEVICE: u8 = 0x00;
pub const QUERY_DESC_IDN_CONFIGURATION: u8 = 0x01;
pub const QUERY_DESC_IDN_UNIT: u8 = 0x02;
pub const QUERY_DESC_IDN_INTERCONNECT: u8 = 0x04;
pub const QUERY_DESC_IDN_STRING: u8 = 0x05;
pub const QUERY_DESC_IDN_GEOMETRY: u8 = 0x07;
pub const QUERY_DESC_IDN_POWER: u8 = 0x08;
pub const QUERY_DESC_IDN_HEALTH: u8 = 0x09;

pub const QUERY_DESC_MAX_SIZE: usize = 255;

/// The 12-byte header shared by every UPIU
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct UpiuHeader {
    pub transaction_type: u8,
    pub flags: u8,
    pub lun: u8,
    pub task_tag: u8,
    pub command_set_type: u8,
    pub query_function: u8,
    pub response: u8,
    pub status: u8,
    pub ehs_length: u8,
    pub device_information: u8,
    pub data_segment_length: u16,
}

impl UpiuHeader {
    pub fn write(&self, buf: &mut [u8]) {
        buf[0] = self.transaction_type;
        buf[1] = self.flags;
        buf[2] = self.lun;
        buf[3] = self.task_tag;
        buf[4] = self.command_set_type & 0xf;
        buf[5] = self.query_function;
        buf[6] = self.response;
        buf[7] = self.status;
        buf[8] = self.ehs_length;
        buf[9] = self.device_information;
        buf[10..12].copy_from_slice(&self.data_segment_length.to_be_bytes());
    }

    pub fn parse(buf: &[u8]) -> Self {
        Self {
            transaction_type: buf[0] & 0x3f,
            flags: buf[1],
            lun: buf[2],
            task_tag: buf[3],
            command_set_type: buf[4] & 0xf,
            query_function: buf[5],
            response: buf[6],
            status: buf[7],
            ehs_length: buf[8],
            device_information: buf[9],
            data_segment_length: u16::from_be_bytes([buf[10], buf[11]]),
        }
    }
}

/// Fills `buf` with a NOP OUT UPIU.
pub fn build_nop_out(buf: &mut [u8], task_tag: u8) {
    buf[..UPIU_BASIC_SIZE].fill(0);
    UpiuHeader {
        transaction_type: UPIU_TRANSACTION_NOP_OUT,
        task_tag,
        ..Default::default()
    }
    .write(buf);
}

/// Fills `buf` with a SCSI command UPIU.
pub fn build_command(buf: &mut [u8], lun: u8, task_tag: u8, flags: u8, expected_len: u32, cdb: &[u8]) {
    buf[..UPIU_BASIC_SIZE].fill(0);
    UpiuHeader {
        transaction_type: UPIU_TRANSACTION_COMMAND,
        flags: flags | UPIU_TASK_ATTR_SIMPLE,
        lun,
        task_tag,
        command_set_type: UPIU_COMMAND_SET_TYPE_SCSI,
        ..Default::default()
    }
    .write(buf);
    buf[12..16].copy_from_slice(&expected_len.to_be_bytes());
    let n = cdb.len().min(16);
    buf[16..16 + n].copy_from_slice(&cdb[..n]);
}

/// Transaction-specific fields of a query request or response
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct QueryFields {
    pub opcode: u8,
    pub idn: u8,
    pub index: u8,
    pub selector: u8,
    pub length: u16,
    pub value: u32,
}

impl QueryFields {
    fn write(&self, buf: &mut [u8]) {
        buf[12] = self.opcode;
        buf[13] = self.idn;
        buf[14] = self.index;
        buf[15] = self.selector;
        buf[18..20].copy_from_slice(&self.length.to_be_bytes());
        buf[20..24].copy_from_slice(&self.value.to_be_bytes());
    }

    pub fn parse(buf: &[u8]) -> Self {
        Self {
            opcode: buf[12],
            idn: buf[13],
            index: buf[14],
            selector: buf[15],
            length: u16::from_be_bytes([buf[18], buf[19]]),
            value: u32::from_be_bytes([buf[20], buf[21], buf[22], buf[23]]),
        }
    }
}

/// Fills `buf` with a query request UPIU, `data` going into its data
/// segment (descriptor writes only).
pub fn build_query(buf: &mut [u8], task_tag: u8, function: u8, fields: &QueryFields, data: &[u8]) {
    buf[..UPIU_BASIC_SIZE].fill(0);
    UpiuHeader {
        transaction_type: UPIU_TRANSACTION_QUERY_REQ,
        task_tag,
        query_function: function,
        data_segment_length: data.len() as u16,
        ..Default::default()
    }
    .write(buf);
    fields.write(buf);
    buf[UPIU_BASIC_SIZE..UPIU_BASIC_SIZE + data.len()].copy_from_slice(data);
}

/// Residual transfer count of a response UPIU
pub fn residual_count(buf: &[u8]) -> u32 {
    u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]])
}

/// Sense data carried in the data segment of a response UPIU, if any.
pub fn response_sense(buf: &[u8]) -> &[u8] {
    let header = UpiuHeader::parse(buf);
    if header.data_segment_length < 2 {
        return &[];
    }
    let len = u16::from_be_bytes([buf[32], buf[33]]) as usize;
    let avail = (header.data_segment_length as usize - 2).min(buf.len().saturating_sub(34));
    &buf[34..34 + len.min(avail)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_upiu_layout() {
        let mut buf = [0xaau8; UPIU_AREA_SIZE];
        let cdb = [0x28, 0, 0, 0, 0, 8, 0, 0, 2, 0];
        build_command(&mut buf, 3, 7, UPIU_CMD_FLAGS_READ, 8192, &cdb);
        assert_eq!(&buf[..4], &[UPIU_TRANSACTION_COMMAND, UPIU_CMD_FLAGS_READ, 3, 7]);
        assert_eq!(&buf[12..16], &8192u32.to_be_bytes());
        assert_eq!(&buf[16..26], &cdb);
        assert!(buf[26..32].iter().all(|&b| b == 0));
    }

    #[test]
    fn query_upiu_picks_function_from_opcode() {
        let mut buf = [0u8; UPIU_AREA_SIZE];
        let fields = QueryFields {
            opcode: QueryOpcode::SetFlag as u8,
            idn: QUERY_FLAG_IDN_FDEVICEINIT,
            ..Default::default()
        };
        build_query(&mut buf, 1, QueryOpcode::SetFlag.function(), &fields, &[]);
        assert_eq!(buf[5], UPIU_QUERY_FUNC_STANDARD_WRITE_REQUEST);
        assert_eq!(QueryFields::parse(&buf), fields);

        let fields = QueryFields {
            opcode: QueryOpcode::ReadDesc as u8,
            length: QUERY_DESC_MAX_SIZE as u16,
            ..Default::default()
        };
        build_query(&mut buf, 2, QueryOpcode::ReadDesc.function(), &fields, &[]);
        assert_eq!(buf[5], UPIU_QUERY_FUNC_STANDARD_READ_REQUEST);
        assert_eq!(&buf[18..20], &[0x00, 0xff]);
    }

    #[test]
    fn sense_is_bounded_by_data_segment() {
        let mut buf = [0u8; UPIU_AREA_SIZE];
        UpiuHeader {
            transaction_type: UPIU_TRANSACTION_RESPONSE,
            data_segment_length: 20,
            ..Default::default()
        }
        .write(&mut buf);
        buf[32..34].copy_from_slice(&18u16.to_be_bytes());
        buf[34] = 0x70;
        assert_eq!(response_sense(&buf).len(), 18);

        buf[10..12].copy_from_slice(&0u16.to_be_bytes());
        assert!(response_sense(&buf).is_empty());
    }
}
