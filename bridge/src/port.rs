use crate::errors::{Error, Result};
use tracing::{debug, info};

/// Name fragments of common USB-serial adapters (generic USB, CP210x, CH340, CDC-ACM).
const PREFERRED_MARKERS: [&str; 4] = ["usb", "slab", "wch", "acm"];

/// Chooses the device to open. An explicit, non-empty name always wins and
/// is not checked for existence.
pub fn select_port(explicit: Option<&str>, available: &[String]) -> Result<String> {
    if let Some(name) = explicit.filter(|name| !name.is_empty()) {
        return Ok(name.to_string());
    }

    let first = available.first().ok_or(Error::NoDeviceAvailable)?;

    let chosen = available
        .iter()
        .find(|name| is_preferred(name))
        .unwrap_or(first);

    Ok(chosen.clone())
}

fn is_preferred(name: &str) -> bool {
    let lower = name.to_lowercase();
    PREFERRED_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Lists attached serial devices in the order the OS reports them.
pub fn enumerate_ports() -> Result<Vec<String>> {
    let ports = serialport::available_ports().map_err(Error::Enumerate)?;
    let names: Vec<String> = ports.into_iter().map(|p| p.port_name).collect();
    debug!("Found {} serial device(s): {:?}", names.len(), names);
    Ok(names)
}

/// Resolves the device name, calling `enumerate` only when no override is configured.
pub fn resolve_port<F>(explicit: Option<&str>, enumerate: F) -> Result<String>
where
    F: FnOnce() -> Result<Vec<String>>,
{
    if let Some(name) = explicit.filter(|name| !name.is_empty()) {
        return Ok(name.to_string());
    }

    let port = select_port(None, &enumerate()?)?;
    info!("Auto-selected {}", port);
    Ok(port)
}
