//! Well-known port resolution.

use std::ffi::CString;

use gdomap_core::wire::{DEFAULT_PORT, SERVICE_NAME};

/// Port for the gdomap service: `configured` if non-zero, else the
/// platform service database entry, else [`DEFAULT_PORT`].
pub fn well_known_port(configured: u16) -> u16 {
    if configured != 0 {
        return configured;
    }
    service_port(SERVICE_NAME, "tcp").unwrap_or(DEFAULT_PORT)
}

/// Look a service up in the platform service database (`/etc/services`).
pub fn service_port(name: &str, proto: &str) -> Option<u16> {
    let name = CString::new(name).ok()?;
    let proto = CString::new(proto).ok()?;
    // getservbyname returns a pointer into static storage; copy the port out
    // before anything else can call it.
    let entry = unsafe { libc::getservbyname(name.as_ptr(), proto.as_ptr()) };
    if entry.is_null() {
        return None;
    }
    let raw = unsafe { (*entry).s_port };
    Some(u16::from_be(raw as u16))
}
