//! The device adapter: wraps one live `nusb` device handle, translating
//! `CMD_SUBMIT`/`CMD_UNLINK` into host USB transfers and back
//! (SPEC_FULL.md §4.2).

use std::collections::HashMap;

use nusb::transfer::{Completion, ControlIn, ControlOut, ControlType, Direction, EndpointType, Recipient, RequestBuffer, TransferError};
use nusb::{Device, Interface};

use crate::enumerate::LiveDevice;
use crate::error::DeviceError;

/// The host-level transfer kind, inferred from the endpoint descriptor at
/// open time (endpoint 0 is always [`TransferKind::Control`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Control,
    Bulk,
    Interrupt,
    Isochronous,
}

impl From<EndpointType> for TransferKind {
    fn from(value: EndpointType) -> Self {
        match value {
            EndpointType::Control => TransferKind::Control,
            EndpointType::Bulk => TransferKind::Bulk,
            EndpointType::Interrupt => TransferKind::Interrupt,
            EndpointType::Isochronous => TransferKind::Isochronous,
        }
    }
}

/// The USB setup packet carried in `CMD_SUBMIT.setup[8]`. Byte order here is
/// the USB-level little-endian convention, independent of USB/IP's
/// big-endian wire framing — these bytes are opaque to the USB/IP codec and
/// must not be byte-swapped at that layer (SPEC_FULL.md §9).
#[derive(Debug, Clone, Copy)]
pub struct SetupPacket {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupPacket {
    pub fn parse(bytes: &[u8; 8]) -> Self {
        Self {
            request_type: bytes[0],
            request: bytes[1],
            value: u16::from_le_bytes([bytes[2], bytes[3]]),
            index: u16::from_le_bytes([bytes[4], bytes[5]]),
            length: u16::from_le_bytes([bytes[6], bytes[7]]),
        }
    }

    pub fn is_device_to_host(&self) -> bool {
        self.request_type & 0x80 != 0
    }

    fn control_type(&self) -> ControlType {
        match (self.request_type >> 5) & 0x03 {
            1 => ControlType::Class,
            2 => ControlType::Vendor,
            _ => ControlType::Standard,
        }
    }

    fn recipient(&self) -> Recipient {
        match self.request_type & 0x1f {
            1 => Recipient::Interface,
            2 => Recipient::Endpoint,
            3 => Recipient::Other,
            _ => Recipient::Device,
        }
    }
}

/// Result of a completed (or failed) transfer, ready to be translated into a
/// `RET_SUBMIT`.
pub struct TransferOutcome {
    pub status: i32,
    pub data: Vec<u8>,
}

impl TransferOutcome {
    fn ok(data: Vec<u8>) -> Self {
        Self { status: 0, data }
    }

    fn err(error: DeviceError) -> Self {
        Self { status: error.to_usbip_errno(), data: Vec::new() }
    }
}

fn map_transfer_error(error: TransferError) -> DeviceError {
    match error {
        TransferError::Stall => DeviceError::Stall,
        TransferError::Cancelled => DeviceError::Cancelled,
        TransferError::Disconnected => DeviceError::Disconnected,
        TransferError::Fault => DeviceError::Other("transfer fault".into()),
        other => DeviceError::Other(other.to_string()),
    }
}

fn completion_to_outcome<D: AsRef<[u8]>>(completion: Completion<D>) -> TransferOutcome {
    match completion.status {
        Ok(()) => TransferOutcome::ok(completion.data.as_ref().to_vec()),
        Err(e) => TransferOutcome::err(map_transfer_error(e)),
    }
}

/// One open, interface-claimed host device, ready to submit transfers.
pub struct DeviceAdapter {
    #[allow(dead_code)]
    device: Device,
    interfaces: HashMap<u8, Interface>,
    endpoint_kinds: HashMap<u8, TransferKind>,
}

impl DeviceAdapter {
    /// Open the device and claim every interface of its active
    /// configuration, detaching any kernel driver first where the platform
    /// supports it (a no-op on macOS).
    pub fn open(live: &LiveDevice) -> Result<Self, DeviceError> {
        let device = live.open().map_err(|e| DeviceError::Other(e.to_string()))?;
        let config = device
            .active_configuration()
            .map_err(|e| DeviceError::Other(format!("no active configuration: {e}")))?;

        let mut interfaces = HashMap::new();
        let mut endpoint_kinds = HashMap::new();

        for group in config.interfaces() {
            let number = group.interface_number();
            let claimed = device
                .detach_and_claim_interface(number)
                .map_err(|_| DeviceError::ClaimFailed(number))?;

            if let Some(descriptor) = group.descriptors().next() {
                for ep in descriptor.endpoints() {
                    endpoint_kinds.insert(ep.address(), TransferKind::from(ep.transfer_type()));
                }
            }

            interfaces.insert(number, claimed);
        }

        Ok(Self { device, interfaces, endpoint_kinds })
    }

    fn control_interface(&self) -> Result<&Interface, DeviceError> {
        self.interfaces.values().next().ok_or(DeviceError::ClaimFailed(0))
    }

    fn endpoint_kind(&self, ep_addr: u8, is_endpoint_zero: bool) -> TransferKind {
        if is_endpoint_zero {
            return TransferKind::Control;
        }
        self.endpoint_kinds.get(&ep_addr).copied().unwrap_or(TransferKind::Bulk)
    }

    fn interface_for_endpoint(&self, _ep_addr: u8) -> Result<&Interface, DeviceError> {
        // Every claimed interface shares the same underlying device handle
        // in `nusb`; any one of them can drive a transfer on any of the
        // device's endpoints, so the first claimed interface suffices.
        self.interfaces.values().next().ok_or(DeviceError::ClaimFailed(0))
    }

    /// Submit one URB. `ep` is the endpoint *number* (0..15, no direction
    /// bit); `direction` is the USB/IP direction field (0=OUT, 1=IN).
    pub async fn submit(
        &self,
        ep: u8,
        direction_in: bool,
        setup: Option<[u8; 8]>,
        out_data: Vec<u8>,
        transfer_buffer_length: u32,
    ) -> TransferOutcome {
        let ep_addr = ep | if direction_in { 0x80 } else { 0x00 };
        let kind = self.endpoint_kind(ep_addr, ep == 0);

        let result = match kind {
            TransferKind::Control => self.submit_control(setup, out_data, transfer_buffer_length).await,
            TransferKind::Bulk => self.submit_bulk(ep_addr, direction_in, out_data, transfer_buffer_length).await,
            TransferKind::Interrupt => self.submit_interrupt(ep_addr, direction_in, out_data, transfer_buffer_length).await,
            TransferKind::Isochronous => self.submit_isochronous(ep_addr, direction_in, out_data, transfer_buffer_length).await,
        };

        match result {
            Ok(outcome) => outcome,
            Err(e) => TransferOutcome::err(e),
        }
    }

    async fn submit_control(
        &self,
        setup: Option<[u8; 8]>,
        out_data: Vec<u8>,
        _transfer_buffer_length: u32,
    ) -> Result<TransferOutcome, DeviceError> {
        let setup = setup.ok_or_else(|| DeviceError::Other("control transfer missing setup packet".into()))?;
        let setup = SetupPacket::parse(&setup);
        let interface = self.control_interface()?;

        if setup.is_device_to_host() {
            let completion = interface
                .control_in(ControlIn {
                    control_type: setup.control_type(),
                    recipient: setup.recipient(),
                    request: setup.request,
                    value: setup.value,
                    index: setup.index,
                    length: setup.length,
                })
                .await;
            Ok(completion_to_outcome(completion))
        } else {
            let completion = interface
                .control_out(ControlOut {
                    control_type: setup.control_type(),
                    recipient: setup.recipient(),
                    request: setup.request,
                    value: setup.value,
                    index: setup.index,
                    data: &out_data,
                })
                .await;
            match completion.status {
                Ok(()) => Ok(TransferOutcome::ok(Vec::new())),
                Err(e) => Err(map_transfer_error(e)),
            }
        }
    }

    async fn submit_bulk(
        &self,
        ep_addr: u8,
        direction_in: bool,
        out_data: Vec<u8>,
        transfer_buffer_length: u32,
    ) -> Result<TransferOutcome, DeviceError> {
        let interface = self.interface_for_endpoint(ep_addr)?;
        if direction_in {
            let completion = interface.bulk_in(ep_addr, RequestBuffer::new(transfer_buffer_length as usize)).await;
            Ok(completion_to_outcome(completion))
        } else {
            let completion = interface.bulk_out(ep_addr, out_data).await;
            match completion.status {
                Ok(()) => Ok(TransferOutcome::ok(Vec::new())),
                Err(e) => Err(map_transfer_error(e)),
            }
        }
    }

    async fn submit_interrupt(
        &self,
        ep_addr: u8,
        direction_in: bool,
        out_data: Vec<u8>,
        transfer_buffer_length: u32,
    ) -> Result<TransferOutcome, DeviceError> {
        let interface = self.interface_for_endpoint(ep_addr)?;
        if direction_in {
            let completion = interface.interrupt_in(ep_addr, RequestBuffer::new(transfer_buffer_length as usize)).await;
            Ok(completion_to_outcome(completion))
        } else {
            let completion = interface.interrupt_out(ep_addr, out_data).await;
            match completion.status {
                Ok(()) => Ok(TransferOutcome::ok(Vec::new())),
                Err(e) => Err(map_transfer_error(e)),
            }
        }
    }

    /// Isochronous submission is staged behind this explicit rejection rather
    /// than implemented, per SPEC_FULL.md §9's open question ("implementers
    /// may stage it behind a capability flag"). Treating an ISO endpoint as
    /// bulk would silently drop per-packet `actual_length`/`status` and is
    /// worse than refusing outright, so every ISO `CMD_SUBMIT` fails with
    /// `-EPROTO` instead of being misrepresented as a successful bulk
    /// transfer. The caller still drains the iso packet descriptors that
    /// follow the header off the wire so the stream stays in sync.
    async fn submit_isochronous(
        &self,
        _ep_addr: u8,
        _direction_in: bool,
        _out_data: Vec<u8>,
        _transfer_buffer_length: u32,
    ) -> Result<TransferOutcome, DeviceError> {
        Err(DeviceError::IsoUnsupported)
    }
}

/// Translate a USB/IP `direction` field plus an endpoint number into the
/// host endpoint address convention (`ep | (direction << 7)`).
pub fn endpoint_address(ep: u8, direction: Direction) -> u8 {
    match direction {
        Direction::In => ep | 0x80,
        Direction::Out => ep & 0x7f,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_packet_parses_direction_from_top_bit() {
        let bytes = [0x80u8, 0x06, 0x00, 0x01, 0x00, 0x00, 0x12, 0x00];
        let setup = SetupPacket::parse(&bytes);
        assert!(setup.is_device_to_host());
        assert_eq!(setup.request, 0x06);
        assert_eq!(setup.value, 0x0100);
        assert_eq!(setup.length, 0x0012);
    }

    #[test]
    fn setup_packet_out_direction() {
        let bytes = [0x00u8, 0x09, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00];
        let setup = SetupPacket::parse(&bytes);
        assert!(!setup.is_device_to_host());
    }

    #[test]
    fn endpoint_address_sets_direction_bit() {
        assert_eq!(endpoint_address(1, Direction::In), 0x81);
        assert_eq!(endpoint_address(1, Direction::Out), 0x01);
    }
}
