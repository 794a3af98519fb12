//! The export table: an immutable-between-rescans snapshot of devices the
//! daemon is willing to serve, indexed by `busid` (SPEC_FULL.md §4.3).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::enumerate::LiveDevice;
use crate::proto::{CharBuf, UsbDeviceRecord, UsbInterfaceRecord};
use crate::speed::UsbIpSpeed;

/// One device the daemon offers for remote attach.
///
/// `attached` tracks the at-most-one-session-per-path invariant (SPEC_FULL.md
/// §3): `try_attach` is the only way to transition it, and it is atomic so
/// concurrent `OP_REQ_IMPORT`s on two connections cannot both win.
pub struct ExportEntry {
    pub busid: String,
    pub bus_num: u32,
    pub dev_num: u32,
    pub speed: UsbIpSpeed,
    pub vendor_id: u16,
    pub product_id: u16,
    pub bcd_device: u16,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub configuration_value: u8,
    pub num_configurations: u8,
    pub interfaces: Vec<InterfaceDescriptor>,
    pub device: LiveDevice,
    attached: AtomicBool,
}

#[derive(Debug, Clone, Copy)]
pub struct InterfaceDescriptor {
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
}

impl ExportEntry {
    pub fn from_live_device(device: LiveDevice) -> Self {
        let interfaces = device
            .interfaces
            .iter()
            .map(|i| InterfaceDescriptor { class: i.class, subclass: i.subclass, protocol: i.protocol })
            .collect();
        Self {
            busid: device.busid.clone(),
            bus_num: device.bus_num,
            dev_num: device.dev_num,
            speed: device.speed,
            vendor_id: device.vendor_id,
            product_id: device.product_id,
            bcd_device: device.bcd_device,
            class: device.class,
            subclass: device.subclass,
            protocol: device.protocol,
            configuration_value: device.configuration_value,
            num_configurations: device.num_configurations,
            interfaces,
            device,
            attached: AtomicBool::new(false),
        }
    }

    pub fn devid(&self) -> u32 {
        (self.bus_num << 16) | self.dev_num
    }

    /// Attempt to claim exclusive attachment for this entry. Returns `false`
    /// if another session already holds it.
    pub fn try_attach(&self) -> bool {
        self.attached
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn release(&self) {
        self.attached.store(false, Ordering::Release);
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    fn synthetic_path(&self) -> String {
        format!("/sys/devices/virtual/usb/{}", self.busid)
    }

    /// Build the on-wire device record (without trailing interface bytes).
    pub fn to_wire_record(&self) -> UsbDeviceRecord {
        UsbDeviceRecord {
            path: CharBuf::new_truncated(&self.synthetic_path()),
            busid: CharBuf::new_truncated(&self.busid),
            busnum: self.bus_num,
            devnum: self.dev_num,
            speed: self.speed.into(),
            id_vendor: self.vendor_id,
            id_product: self.product_id,
            bcd_device: self.bcd_device,
            b_device_class: self.class,
            b_device_sub_class: self.subclass,
            b_device_protocol: self.protocol,
            b_configuration_value: self.configuration_value,
            b_num_configurations: self.num_configurations,
            b_num_interfaces: self.interfaces.len() as u8,
        }
    }

    pub fn to_wire_interfaces(&self) -> Vec<UsbInterfaceRecord> {
        self.interfaces
            .iter()
            .map(|i| UsbInterfaceRecord {
                b_interface_class: i.class,
                b_interface_sub_class: i.subclass,
                b_interface_protocol: i.protocol,
                padding: 0,
            })
            .collect()
    }
}

/// Snapshot of exportable devices, rebuilt wholesale on rescan.
#[derive(Default)]
pub struct ExportTable {
    entries: HashMap<String, Arc<ExportEntry>>,
}

impl ExportTable {
    pub fn new(entries: Vec<ExportEntry>) -> Self {
        let entries = entries.into_iter().map(|e| (e.busid.clone(), Arc::new(e))).collect();
        Self { entries }
    }

    pub fn get(&self, busid: &str) -> Option<Arc<ExportEntry>> {
        self.entries.get(busid).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ExportEntry>> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enumerate::LiveDevice;

    #[test]
    fn at_most_one_attach_wins() {
        let entry = ExportEntry::from_live_device(LiveDevice::synthetic("1-3"));
        assert!(entry.try_attach());
        assert!(!entry.try_attach());
        entry.release();
        assert!(entry.try_attach());
    }

    #[test]
    fn devid_packs_bus_and_dev_num() {
        let entry = ExportEntry::from_live_device(LiveDevice::synthetic("1-3"));
        assert_eq!(entry.devid(), (1u32 << 16) | 3);
    }
}
