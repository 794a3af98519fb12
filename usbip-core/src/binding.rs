//! The binding store: a durable `(vendor_id, product_id, serial_number) ->
//! bound` set, persisted as JSON (see SPEC_FULL.md §4.7/§9 and DESIGN.md for
//! why JSON rather than the original tool's XML).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::BindingStoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub vendor_id: u16,
    pub product_id: u16,
    #[serde(default)]
    pub serial_number: String,
}

impl Binding {
    pub fn device_id(&self) -> String {
        if self.serial_number.is_empty() {
            format!("{:04x}:{:04x}", self.vendor_id, self.product_id)
        } else {
            format!("{:04x}:{:04x}:{}", self.vendor_id, self.product_id, self.serial_number)
        }
    }

    fn matches(&self, vendor_id: u16, product_id: u16, serial_number: &str) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id && self.serial_number == serial_number
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    bindings: Vec<Binding>,
}

pub struct BindingStore {
    path: PathBuf,
    document: Document,
}

impl BindingStore {
    /// Open the store at the platform-default location
    /// (`$XDG_CONFIG_HOME/usbipd/bindings.json`, falling back to
    /// `~/.config/usbipd/bindings.json`), creating an empty store if none
    /// exists yet.
    pub fn open_default() -> Result<Self, BindingStoreError> {
        let dir = dirs::config_dir().ok_or(BindingStoreError::NoConfigDir)?.join("usbipd");
        Self::open(dir.join("bindings.json"))
    }

    pub fn open(path: impl Into<PathBuf>) -> Result<Self, BindingStoreError> {
        let path = path.into();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .map_err(|source| BindingStoreError::Write { path: path.display().to_string(), source })?;
            }
            let store = Self { path, document: Document::default() };
            store.persist()?;
            return Ok(store);
        }

        let raw = fs::read_to_string(&path)
            .map_err(|source| BindingStoreError::Read { path: path.display().to_string(), source })?;
        let document: Document = serde_json::from_str(&raw)
            .map_err(|source| BindingStoreError::Corrupt { path: path.display().to_string(), source })?;
        Ok(Self { path, document })
    }

    fn persist(&self) -> Result<(), BindingStoreError> {
        let serialized = serde_json::to_string_pretty(&self.document).expect("Document serialization is infallible");
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, serialized)
            .map_err(|source| BindingStoreError::Write { path: self.path.display().to_string(), source })?;
        fs::rename(&tmp_path, &self.path)
            .map_err(|source| BindingStoreError::Write { path: self.path.display().to_string(), source })?;
        Ok(())
    }

    pub fn list(&self) -> &[Binding] {
        &self.document.bindings
    }

    pub fn contains(&self, vendor_id: u16, product_id: u16, serial_number: &str) -> bool {
        self.document.bindings.iter().any(|b| b.matches(vendor_id, product_id, serial_number))
    }

    /// Returns `false` without mutating anything if the binding already exists.
    pub fn add(&mut self, vendor_id: u16, product_id: u16, serial_number: &str) -> Result<bool, BindingStoreError> {
        if self.contains(vendor_id, product_id, serial_number) {
            return Ok(false);
        }
        self.document.bindings.push(Binding {
            vendor_id,
            product_id,
            serial_number: serial_number.to_string(),
        });
        self.persist()?;
        Ok(true)
    }

    /// Returns `false` without mutating anything if no matching binding existed.
    pub fn remove(&mut self, vendor_id: u16, product_id: u16, serial_number: &str) -> Result<bool, BindingStoreError> {
        let before = self.document.bindings.len();
        self.document.bindings.retain(|b| !b.matches(vendor_id, product_id, serial_number));
        let removed = self.document.bindings.len() != before;
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    pub fn clear(&mut self) -> Result<usize, BindingStoreError> {
        let count = self.document.bindings.len();
        if count > 0 {
            self.document.bindings.clear();
            self.persist()?;
        }
        Ok(count)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("usbipd-test-{name}-{}.json", std::process::id()))
    }

    #[test]
    fn add_then_contains_then_remove() {
        let path = temp_store_path("roundtrip");
        let _ = fs::remove_file(&path);
        let mut store = BindingStore::open(&path).unwrap();

        assert!(!store.contains(0x1234, 0x5678, "SN1"));
        assert!(store.add(0x1234, 0x5678, "SN1").unwrap());
        assert!(store.contains(0x1234, 0x5678, "SN1"));

        assert!(store.remove(0x1234, 0x5678, "SN1").unwrap());
        assert!(!store.contains(0x1234, 0x5678, "SN1"));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn add_is_idempotent() {
        let path = temp_store_path("idempotent");
        let _ = fs::remove_file(&path);
        let mut store = BindingStore::open(&path).unwrap();

        assert!(store.add(1, 2, "").unwrap());
        assert!(!store.add(1, 2, "").unwrap());
        assert_eq!(store.list().len(), 1);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn empty_serial_only_matches_empty_serial() {
        let path = temp_store_path("empty-serial");
        let _ = fs::remove_file(&path);
        let mut store = BindingStore::open(&path).unwrap();

        store.add(1, 2, "").unwrap();
        assert!(store.contains(1, 2, ""));
        assert!(!store.contains(1, 2, "SOMETHING"));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn reopening_reloads_persisted_state() {
        let path = temp_store_path("persist");
        let _ = fs::remove_file(&path);
        {
            let mut store = BindingStore::open(&path).unwrap();
            store.add(0xaaaa, 0xbbbb, "XYZ").unwrap();
        }
        let store = BindingStore::open(&path).unwrap();
        assert!(store.contains(0xaaaa, 0xbbbb, "XYZ"));

        let _ = fs::remove_file(&path);
    }
}
