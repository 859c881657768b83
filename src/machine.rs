//! Host identity used to derive the device GUID sent with every store request.

use crate::error::{Result, StoreError};

pub trait Machine: Send + Sync {
    /// MAC address of the primary network interface, as `aa:bb:cc:dd:ee:ff`.
    fn mac_address(&self) -> Result<String>;
}

pub struct SystemMachine;

impl Machine for SystemMachine {
    fn mac_address(&self) -> Result<String> {
        match mac_address::get_mac_address() {
            Ok(Some(addr)) => Ok(addr.to_string()),
            Ok(None) => Err(StoreError::MacAddress(
                "no network interface with a hardware address".to_string(),
            )),
            Err(e) => Err(StoreError::MacAddress(e.to_string())),
        }
    }
}

/// Fixed address, for tests and `--guid`-less sandboxes.
pub struct StaticMachine(pub String);

impl Machine for StaticMachine {
    fn mac_address(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Uppercase hex of the MAC with separators removed.
pub fn guid_from_mac(mac: &str) -> String {
    mac.chars()
        .filter(|c| *c != ':' && *c != '-')
        .collect::<String>()
        .to_uppercase()
}
