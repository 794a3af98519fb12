//! USB/IP wire protocol: PDU layouts and big-endian encode/decode.
//!
//! Two PDU families share one TCP connection: control-plane PDUs (list/attach)
//! and data-plane PDUs (URB submission/completion). All integer fields are
//! network byte order; see SPEC_FULL.md §4.1 for the normative layout.

mod char_buf;
mod fixed_bytes;

pub use char_buf::{CharBuf, CharBufError};
pub use fixed_bytes::FixedBytes;

use endian_codec::{DecodeBE, EncodeBE, PackedSize};
use num_enum::{IntoPrimitive, TryFromPrimitive};

pub const USBIP_VERSION: u16 = 0x0111;

pub const SYSFS_PATH_MAX: usize = 256;
pub const SYSFS_BUS_ID_SIZE: usize = 32;

/// Control-plane operation codes (the `code` field of [`OpHeader`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum OpCode {
    ReqDevlist = 0x8005,
    RepDevlist = 0x0005,
    ReqImport = 0x8003,
    RepImport = 0x0003,
}

/// Data-plane command codes (the `command` field of [`UsbIpHeaderBasic`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum Command {
    CmdSubmit = 0x0000_0001,
    CmdUnlink = 0x0000_0002,
    RetSubmit = 0x0000_0003,
    RetUnlink = 0x0000_0004,
}

pub const USBIP_DIR_OUT: u32 = 0;
pub const USBIP_DIR_IN: u32 = 1;

pub const ST_OK: u32 = 0;
pub const ST_NA: u32 = 1;

/// Negative errno values used in `RET_SUBMIT`/`RET_UNLINK` `status` fields.
pub mod errno {
    pub const EPIPE: i32 = -32;
    pub const ETIMEDOUT: i32 = -110;
    pub const ECONNRESET: i32 = -104;
    pub const ENODEV: i32 = -19;
    pub const EOVERFLOW: i32 = -75;
    pub const EPROTO: i32 = -71;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PackedSize, EncodeBE, DecodeBE)]
#[repr(C)]
pub struct OpHeader {
    pub version: u16,
    pub code: u16,
    pub status: u32,
}

impl OpHeader {
    pub fn new(code: OpCode, status: u32) -> Self {
        Self { version: USBIP_VERSION, code: code.into(), status }
    }

    pub fn op_code(&self) -> Option<OpCode> {
        OpCode::try_from_primitive(self.code).ok()
    }
}

/// Device record, as it appears in `OP_REP_DEVLIST` entries and a successful
/// `OP_REP_IMPORT` body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PackedSize, EncodeBE, DecodeBE)]
#[repr(C)]
pub struct UsbDeviceRecord {
    pub path: CharBuf<SYSFS_PATH_MAX>,
    pub busid: CharBuf<SYSFS_BUS_ID_SIZE>,
    pub busnum: u32,
    pub devnum: u32,
    pub speed: u32,
    pub id_vendor: u16,
    pub id_product: u16,
    pub bcd_device: u16,
    pub b_device_class: u8,
    pub b_device_sub_class: u8,
    pub b_device_protocol: u8,
    pub b_configuration_value: u8,
    pub b_num_configurations: u8,
    pub b_num_interfaces: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PackedSize, EncodeBE, DecodeBE)]
#[repr(C)]
pub struct UsbInterfaceRecord {
    pub b_interface_class: u8,
    pub b_interface_sub_class: u8,
    pub b_interface_protocol: u8,
    pub padding: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PackedSize, EncodeBE, DecodeBE)]
#[repr(C)]
pub struct OpRepDevlistHeader {
    pub header: OpHeader,
    pub num_exported_devices: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PackedSize, EncodeBE, DecodeBE)]
#[repr(C)]
pub struct OpReqImport {
    pub header: OpHeader,
    pub busid: CharBuf<SYSFS_BUS_ID_SIZE>,
}

/// Common 20-byte header shared by all four data-plane PDUs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PackedSize, EncodeBE, DecodeBE)]
#[repr(C)]
pub struct UsbIpHeaderBasic {
    pub command: u32,
    pub seqnum: u32,
    pub devid: u32,
    pub direction: u32,
    pub ep: u32,
}

impl UsbIpHeaderBasic {
    pub fn new(command: Command, seqnum: u32, devid: u32, direction: u32, ep: u32) -> Self {
        Self { command: command.into(), seqnum, devid, direction, ep }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PackedSize, EncodeBE, DecodeBE)]
#[repr(C)]
pub struct CmdSubmit {
    pub header: UsbIpHeaderBasic,
    pub transfer_flags: u32,
    pub transfer_buffer_length: u32,
    pub start_frame: u32,
    pub number_of_packets: u32,
    pub interval: u32,
    pub setup: FixedBytes<8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PackedSize, EncodeBE, DecodeBE)]
#[repr(C)]
pub struct RetSubmit {
    pub header: UsbIpHeaderBasic,
    pub status: u32,
    pub actual_length: u32,
    pub start_frame: u32,
    pub number_of_packets: u32,
    pub error_count: u32,
    pub padding: FixedBytes<8>,
}

impl RetSubmit {
    /// Build a non-isochronous `RET_SUBMIT`. `number_of_packets` is `0`: no
    /// iso packet descriptors follow this header (SPEC_FULL.md §4.1 — iso
    /// descriptors only ever follow when `number_of_packets > 0`).
    pub fn new(seqnum: u32, devid: u32, ep: u32, status: i32, actual_length: u32) -> Self {
        Self {
            header: UsbIpHeaderBasic::new(Command::RetSubmit, seqnum, devid, 0, ep),
            status: status as u32,
            actual_length,
            start_frame: 0,
            number_of_packets: 0,
            error_count: 0,
            padding: FixedBytes::zeroed(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PackedSize, EncodeBE, DecodeBE)]
#[repr(C)]
pub struct CmdUnlink {
    pub header: UsbIpHeaderBasic,
    pub unlink_seqnum: u32,
    pub padding: FixedBytes<24>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PackedSize, EncodeBE, DecodeBE)]
#[repr(C)]
pub struct RetUnlink {
    pub header: UsbIpHeaderBasic,
    pub status: u32,
    pub padding: FixedBytes<24>,
}

impl RetUnlink {
    pub fn new(unlink_header_seqnum: u32, devid: u32, status: i32) -> Self {
        Self {
            header: UsbIpHeaderBasic::new(Command::RetUnlink, unlink_header_seqnum, devid, 0, 0),
            status: status as u32,
            padding: FixedBytes::zeroed(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PackedSize, EncodeBE, DecodeBE)]
#[repr(C)]
pub struct IsoPacketDescriptor {
    pub offset: u32,
    pub length: u32,
    pub actual_length: u32,
    pub status: u32,
}

/// Encode a [`PackedSize`]+[`EncodeBE`] value into a freshly allocated buffer.
pub fn encode<T: PackedSize + EncodeBE>(value: &T) -> Vec<u8> {
    let mut buf = vec![0u8; T::PACKED_LEN];
    value.encode(&mut buf);
    buf
}

/// Decode a [`PackedSize`]+[`DecodeBE`] value from the front of `bytes`.
///
/// Returns `None` if fewer than `T::PACKED_LEN` bytes are available — callers
/// use this to implement streaming "need more bytes" decoding.
pub fn decode<T: PackedSize + DecodeBE>(bytes: &[u8]) -> Option<T> {
    if bytes.len() < T::PACKED_LEN {
        return None;
    }
    Some(T::decode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_header_round_trips() {
        let h = OpHeader::new(OpCode::ReqDevlist, 0);
        let bytes = encode(&h);
        assert_eq!(bytes, [0x01, 0x11, 0x80, 0x05, 0, 0, 0, 0]);
        let back: OpHeader = decode(&bytes).unwrap();
        assert_eq!(back, h);
    }

    #[test]
    fn device_record_is_312_bytes() {
        assert_eq!(UsbDeviceRecord::PACKED_LEN, 312);
    }

    #[test]
    fn data_plane_headers_are_48_bytes() {
        assert_eq!(CmdSubmit::PACKED_LEN, 48);
        assert_eq!(RetSubmit::PACKED_LEN, 48);
        assert_eq!(CmdUnlink::PACKED_LEN, 48);
        assert_eq!(RetUnlink::PACKED_LEN, 48);
    }

    #[test]
    fn busid_nul_padding_preserved_through_round_trip() {
        let req = OpReqImport {
            header: OpHeader::new(OpCode::ReqImport, 0),
            busid: CharBuf::new("1-3").unwrap(),
        };
        let bytes = encode(&req);
        let back: OpReqImport = decode(&bytes).unwrap();
        assert_eq!(back.busid.as_str(), "1-3");
        assert_eq!(back.busid.as_bytes()[3], 0);
        assert_eq!(back, req);
    }

    #[test]
    fn ret_submit_carries_no_iso_descriptors_by_default() {
        let ret = RetSubmit::new(1, 0x0001_0003, 1, 0, 32);
        assert_eq!(ret.number_of_packets, 0);
    }
}
