//! Vendor/product/class display-name lookups for `usbipd list`, backed by
//! the baked-in `usb-ids` database (SPEC_FULL.md §4.9). This crate only ever
//! runs on macOS, so the Linux `udev` hardware database is never an option —
//! unlike the teacher, there is no `runtime-hwdb` half here.

#[cfg(feature = "baked-hwdb")]
pub fn vendor_name(vendor_id: u16) -> Option<&'static str> {
    usb_ids::Vendors::iter()
        .find(|v| v.id() == vendor_id)
        .map(|v| v.name())
}

#[cfg(feature = "baked-hwdb")]
pub fn product_name(vendor_id: u16, product_id: u16) -> Option<&'static str> {
    usb_ids::Vendors::iter()
        .find(|v| v.id() == vendor_id)
        .and_then(|v| v.devices().find(|d| d.id() == product_id))
        .map(|d| d.name())
}

#[cfg(feature = "baked-hwdb")]
pub fn class_name(class: u8) -> Option<&'static str> {
    usb_ids::Classes::iter().find(|c| c.id() == class).map(|c| c.name())
}

#[cfg(not(feature = "baked-hwdb"))]
pub fn vendor_name(_vendor_id: u16) -> Option<&'static str> {
    None
}

#[cfg(not(feature = "baked-hwdb"))]
pub fn product_name(_vendor_id: u16, _product_id: u16) -> Option<&'static str> {
    None
}

#[cfg(not(feature = "baked-hwdb"))]
pub fn class_name(_class: u8) -> Option<&'static str> {
    None
}

#[cfg(all(test, feature = "baked-hwdb"))]
mod tests {
    use super::*;

    #[test]
    fn unknown_vendor_is_none_not_a_panic() {
        assert_eq!(vendor_name(0xffff), None);
    }
}
