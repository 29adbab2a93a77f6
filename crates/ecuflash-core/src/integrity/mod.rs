//! Calibration Integrity Engine (§4.4): per-variant CRC-protected zone
//! registry and the CRC-32C (Castagnoli) codec used to refresh and verify
//! the checksums a controller's boot loader checks before it will run a
//! calibration image.
//!
//! The zone registry follows the same "closed sum over a fixed set,
//! indexed by variant" shape used for other static tables in this crate:
//! a `BTreeMap<ControllerVariant, Vec<Zone>>` built once, rather than
//! dynamic discovery.

pub mod registry;
pub mod zonemap;

pub use registry::default_zone_map;
pub use zonemap::{CalibrationImage, CrcMismatch, Zone, ZoneMap, ZoneMapError};
