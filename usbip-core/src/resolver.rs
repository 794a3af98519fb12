//! The binding resolver: matches durable bindings against currently visible
//! devices to build the export table (SPEC_FULL.md §4.6).

use tracing::warn;

use crate::binding::BindingStore;
use crate::enumerate::{self, LiveDevice};
use crate::error::EnumerationError;
use crate::export::{ExportEntry, ExportTable};

/// Enumerate the host and build an [`ExportTable`] containing one entry for
/// every binding that currently matches a connected device. Bindings with no
/// matching device produce a warning and are skipped — this must tolerate a
/// transiently disconnected device rather than treat it as an error.
pub fn resolve(store: &BindingStore) -> Result<ExportTable, EnumerationError> {
    let devices = enumerate::enumerate()?;
    Ok(resolve_against(store, devices))
}

fn resolve_against(store: &BindingStore, mut devices: Vec<LiveDevice>) -> ExportTable {
    let mut entries = Vec::new();
    for binding in store.list() {
        let position = devices
            .iter()
            .position(|d| d.matches_binding(binding.vendor_id, binding.product_id, &binding.serial_number));
        match position {
            Some(index) => {
                let device = devices.remove(index);
                entries.push(ExportEntry::from_live_device(device));
            }
            None => {
                warn!(device = %binding.device_id(), "bound device not currently connected, skipping");
            }
        }
    }
    ExportTable::new(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_store(name: &str) -> BindingStore {
        let path = std::env::temp_dir().join(format!("usbipd-resolver-test-{name}-{}.json", std::process::id()));
        let _ = fs::remove_file(&path);
        BindingStore::open(path).unwrap()
    }

    #[test]
    fn unmatched_binding_is_skipped_not_errored() {
        let mut store = temp_store("unmatched");
        store.add(0x1234, 0x5678, "").unwrap();

        let table = resolve_against(&store, Vec::new());
        assert!(table.is_empty());
    }

    #[test]
    fn matched_binding_produces_an_entry() {
        let mut store = temp_store("matched");
        store.add(0x1234, 0x5678, "").unwrap();

        let device = LiveDevice::synthetic("1-3");
        let table = resolve_against(&store, vec![device]);
        assert_eq!(table.len(), 1);
        assert!(table.get("1-3").is_some());
    }
}
