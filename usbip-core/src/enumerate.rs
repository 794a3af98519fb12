//! The device enumerator: a thin wrapper over `nusb::list_devices()` that
//! synthesizes the USB/IP `busid` from live topology and tolerates unreadable
//! string descriptors (see SPEC_FULL.md §4.8/§9).

use crate::error::EnumerationError;
use crate::speed::UsbIpSpeed;

#[derive(Debug, Clone)]
pub struct LiveInterface {
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
}

/// A USB device currently visible to the host, as reported fresh by the
/// platform USB stack — never cached across calls (see "Forced
/// re-enumeration" in SPEC_FULL.md §9).
#[derive(Debug)]
pub struct LiveDevice {
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
    pub interfaces: Vec<LiveInterface>,
    pub manufacturer: String,
    pub product: String,
    pub serial_number: String,
    info: Option<nusb::DeviceInfo>,
}

impl LiveDevice {
    /// Construct a device record with no backing platform handle, for tests
    /// that only need the descriptor fields (e.g. export-table shape tests).
    /// `open()` on such a device always fails.
    #[cfg(test)]
    pub fn synthetic(busid: &str) -> Self {
        Self {
            busid: busid.to_string(),
            bus_num: 1,
            dev_num: 3,
            speed: UsbIpSpeed::High,
            vendor_id: 0x1234,
            product_id: 0x5678,
            bcd_device: 0x0100,
            class: 0,
            subclass: 0,
            protocol: 0,
            configuration_value: 1,
            num_configurations: 1,
            interfaces: Vec::new(),
            manufacturer: String::new(),
            product: String::new(),
            serial_number: String::new(),
            info: None,
        }
    }

    /// Open and claim every interface of this device, ready for transfer
    /// submission. Lazily performed — not done during enumeration, which may
    /// run frequently (`list`) and must stay cheap and side-effect free.
    pub fn open(&self) -> Result<nusb::Device, EnumerationError> {
        self.info
            .as_ref()
            .ok_or_else(|| EnumerationError::Backend("no platform device handle".into()))?
            .open()
            .map_err(|e| EnumerationError::Backend(e.to_string()))
    }

    pub fn matches_binding(&self, vendor_id: u16, product_id: u16, serial_number: &str) -> bool {
        self.vendor_id == vendor_id
            && self.product_id == product_id
            && self.serial_number == serial_number
    }
}

fn synthesize_busid(info: &nusb::DeviceInfo) -> String {
    let bus = info.bus_number();
    let port_path: Vec<String> = info.port_chain().iter().map(|p| p.to_string()).collect();
    if port_path.is_empty() {
        format!("{bus}-0")
    } else {
        format!("{bus}-{}", port_path.join("."))
    }
}

fn clean(value: Option<&str>) -> String {
    // Some devices return strings with embedded NUL characters and trailing
    // garbage; truncate at the first NUL the way the original tool does.
    value.map(|s| s.split('\0').next().unwrap_or("").to_string()).unwrap_or_default()
}

/// Descriptor detail that requires opening the device (configuration value,
/// interface list). Best-effort: a device that refuses to open (busy,
/// permissions, mid-disconnect) still shows up in `list`, just with an empty
/// interface list — mirroring the original tool's tolerance of per-field
/// read failures rather than dropping the whole device.
struct OpenedDetail {
    configuration_value: u8,
    num_configurations: u8,
    interfaces: Vec<LiveInterface>,
}

fn opened_detail(info: &nusb::DeviceInfo) -> OpenedDetail {
    let Ok(device) = info.open() else {
        return OpenedDetail { configuration_value: 0, num_configurations: 0, interfaces: Vec::new() };
    };
    let num_configurations = device.configurations().count() as u8;
    let Ok(cfg) = device.active_configuration() else {
        return OpenedDetail { configuration_value: 0, num_configurations, interfaces: Vec::new() };
    };
    let interfaces = cfg
        .interfaces()
        .filter_map(|i| i.descriptors().next())
        .map(|d| LiveInterface { class: d.class(), subclass: d.subclass(), protocol: d.protocol() })
        .collect();
    OpenedDetail { configuration_value: cfg.configuration_value(), num_configurations, interfaces }
}

fn to_live_device(info: nusb::DeviceInfo) -> LiveDevice {
    let busid = synthesize_busid(&info);
    let detail = opened_detail(&info);
    LiveDevice {
        busid,
        bus_num: info.bus_number() as u32,
        dev_num: info.device_address() as u32,
        speed: info.speed().map(UsbIpSpeed::from).unwrap_or(UsbIpSpeed::Unknown),
        vendor_id: info.vendor_id(),
        product_id: info.product_id(),
        bcd_device: info.device_version(),
        class: info.class(),
        subclass: info.subclass(),
        protocol: info.protocol(),
        configuration_value: detail.configuration_value,
        num_configurations: detail.num_configurations,
        interfaces: detail.interfaces,
        manufacturer: clean(info.manufacturer_string()),
        product: clean(info.product_string()),
        serial_number: clean(info.serial_number()),
        info: Some(info),
    }
}

/// Enumerate all USB devices currently visible to the host.
///
/// A fresh query is issued on every call (no internal caching) so that
/// devices which went idle or were replugged between calls are picked back
/// up, mirroring the original tool's "force re-enumeration" behavior.
pub fn enumerate() -> Result<Vec<LiveDevice>, EnumerationError> {
    let devices = nusb::list_devices().map_err(|e| EnumerationError::Backend(e.to_string()))?;
    Ok(devices.map(to_live_device).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_truncates_at_first_nul() {
        assert_eq!(clean(Some("Acme\u{0}garbage")), "Acme");
        assert_eq!(clean(None), "");
    }
}
