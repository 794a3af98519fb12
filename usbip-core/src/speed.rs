use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum::EnumString;

/// USB/IP wire speed codes. Note these differ from `nusb::Speed`'s own
/// enumeration order, so a translation (see `From<nusb::Speed>`) is required
/// rather than a bit-for-bit reinterpret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum UsbIpSpeed {
    Unknown = 0,
    Low = 1,
    Full = 2,
    High = 3,
    Wireless = 4,
    Super = 5,
    SuperPlus = 6,
}

impl From<nusb::Speed> for UsbIpSpeed {
    fn from(speed: nusb::Speed) -> Self {
        match speed {
            nusb::Speed::Low => UsbIpSpeed::Low,
            nusb::Speed::Full => UsbIpSpeed::Full,
            nusb::Speed::High => UsbIpSpeed::High,
            nusb::Speed::Super => UsbIpSpeed::Super,
            nusb::Speed::SuperPlus => UsbIpSpeed::SuperPlus,
            _ => UsbIpSpeed::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_speed_is_code_3() {
        assert_eq!(u32::from(UsbIpSpeed::High), 3);
    }

    #[test]
    fn super_speed_is_code_5() {
        assert_eq!(u32::from(UsbIpSpeed::Super), 5);
    }
}
