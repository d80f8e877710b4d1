//! Stable identifiers for drivers and instruments.
//!
//! Both identifiers are name-based (version 5) UUIDs in the URL namespace, so the same
//! input always yields the same id. A driver id hashes only the namespace prefix and the
//! module name: renaming the type or any method inside the file leaves it unchanged.

use uuid::Uuid;

/// Derive the id of the driver living in `module` under `namespace`.
pub fn driver_id(namespace: &str, module: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("{namespace}/{module}").as_bytes()).to_string()
}

/// Derive the id assigned to a newly created instrument.
///
/// Only called on creation; a later rename keeps the original id.
pub fn instrument_id(name: &str, driver_id: &str) -> String {
    Uuid::new_v5(
        &Uuid::NAMESPACE_URL,
        format!("instrument/{name}#{driver_id}").as_bytes(),
    )
    .to_string()
}
