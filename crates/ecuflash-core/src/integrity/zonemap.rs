//! CRC-protected zones and the CRC-32C codec (§4.4, §8).
//!
//! Uses the `crc` crate's `CRC_32_ISCSI` algorithm constant, which matches
//! the spec's parameters exactly: polynomial `0x1EDC6F41`, init
//! `0xFFFFFFFF`, input and output reflected, final XOR `0xFFFFFFFF`.

use crate::types::ControllerVariant;
use crc::{Crc, CRC_32_ISCSI};

const CRC_ENGINE: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// One CRC-protected byte range and the 4-byte little-endian slot inside
/// the image that stores its checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Zone {
    pub start: usize,
    pub end: usize,
    pub crc_slot: usize,
}

impl Zone {
    pub fn new(start: usize, end: usize, crc_slot: usize) -> Self {
        Self { start, end, crc_slot }
    }

    fn crc_slot_range(&self) -> std::ops::Range<usize> {
        self.crc_slot..self.crc_slot + 4
    }

    fn overlaps(&self, other: &Zone) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Raised when two zones registered for the same variant overlap, or a
/// zone's CRC slot lies inside its own covered range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ZoneMapError {
    #[error("zone {0}..{1} overlaps zone {2}..{3}")]
    OverlappingZones(usize, usize, usize, usize),
    #[error("zone {0}..{1}'s CRC slot at {2} lies inside its own covered range")]
    CrcSlotInsideOwnZone(usize, usize, usize),
}

/// The ordered, non-overlapping zone list for one controller variant.
#[derive(Debug, Clone)]
pub struct ZoneMap {
    pub variant: ControllerVariant,
    zones: Vec<Zone>,
}

impl ZoneMap {
    /// Builds a zone map, validating the non-overlap and
    /// crc-slot-outside-own-zone invariants at registration time.
    pub fn new(variant: ControllerVariant, zones: Vec<Zone>) -> Result<Self, ZoneMapError> {
        for (i, zone) in zones.iter().enumerate() {
            if zone.crc_slot_range().start >= zone.start && zone.crc_slot_range().start < zone.end {
                return Err(ZoneMapError::CrcSlotInsideOwnZone(zone.start, zone.end, zone.crc_slot));
            }
            for other in &zones[i + 1..] {
                if zone.overlaps(other) {
                    return Err(ZoneMapError::OverlappingZones(zone.start, zone.end, other.start, other.end));
                }
            }
        }
        Ok(Self { variant, zones })
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }
}

/// A mismatch found by [`verify_all_crcs`]: the zone whose stored CRC does
/// not match its recomputed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrcMismatch {
    pub zone: Zone,
    pub stored: u32,
    pub computed: u32,
}

/// An in-memory calibration image bound to a variant.
#[derive(Debug, Clone)]
pub struct CalibrationImage {
    pub variant: ControllerVariant,
    pub bytes: Vec<u8>,
}

impl CalibrationImage {
    pub fn new(variant: ControllerVariant, bytes: Vec<u8>) -> Self {
        Self { variant, bytes }
    }
}

/// Computes the CRC-32C of the bytes covered by `zone`. Depends only on
/// `image[zone.start..zone.end]`.
pub fn compute_zone_crc(image: &[u8], zone: &Zone) -> u32 {
    CRC_ENGINE.checksum(&image[zone.start..zone.end])
}

/// Recomputes and writes back every zone's CRC, in registration order, as
/// little-endian bytes into its `crc_slot`. Idempotent: calling this twice
/// in a row leaves the image unchanged after the first call.
pub fn refresh_all_crcs(image: &mut [u8], map: &ZoneMap) {
    for zone in map.zones() {
        let crc = compute_zone_crc(image, zone);
        image[zone.crc_slot..zone.crc_slot + 4].copy_from_slice(&crc.to_le_bytes());
    }
}

/// Verifies every zone's stored CRC against its recomputed value,
/// returning every mismatch found (empty on success).
pub fn verify_all_crcs(image: &[u8], map: &ZoneMap) -> Result<(), Vec<CrcMismatch>> {
    let mut mismatches = Vec::new();
    for zone in map.zones() {
        let computed = compute_zone_crc(image, zone);
        let stored = u32::from_le_bytes(image[zone.crc_slot..zone.crc_slot + 4].try_into().unwrap());
        if stored != computed {
            mismatches.push(CrcMismatch { zone: *zone, stored, computed });
        }
    }
    if mismatches.is_empty() {
        Ok(())
    } else {
        Err(mismatches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_image() -> Vec<u8> {
        vec![0xAAu8; 64]
    }

    #[test]
    fn test_refresh_then_verify_is_idempotent() {
        let map = ZoneMap::new(ControllerVariant::Msd80, vec![Zone::new(0, 32, 32)]).unwrap();
        let mut image = sample_image();
        refresh_all_crcs(&mut image, &map);
        assert!(verify_all_crcs(&image, &map).is_ok());
        let first_pass = image.clone();
        refresh_all_crcs(&mut image, &map);
        assert_eq!(image, first_pass);
    }

    #[test]
    fn test_zone_crc_depends_only_on_its_own_bytes() {
        let zone = Zone::new(0, 16, 16);
        let mut image_a = vec![0u8; 20];
        let mut image_b = vec![0u8; 20];
        image_a[16..20].copy_from_slice(&[1, 2, 3, 4]);
        image_b[16..20].copy_from_slice(&[9, 9, 9, 9]);
        assert_eq!(compute_zone_crc(&image_a, &zone), compute_zone_crc(&image_b, &zone));
    }

    #[test]
    fn test_overlapping_zones_rejected() {
        let err = ZoneMap::new(ControllerVariant::Msd80, vec![Zone::new(0, 20, 40), Zone::new(10, 30, 60)]).unwrap_err();
        assert!(matches!(err, ZoneMapError::OverlappingZones(..)));
    }

    #[test]
    fn test_crc_slot_inside_own_zone_rejected() {
        let err = ZoneMap::new(ControllerVariant::Msd80, vec![Zone::new(0, 20, 4)]).unwrap_err();
        assert!(matches!(err, ZoneMapError::CrcSlotInsideOwnZone(..)));
    }

    #[test]
    fn test_verify_detects_tampered_crc() {
        let map = ZoneMap::new(ControllerVariant::Msd80, vec![Zone::new(0, 32, 32)]).unwrap();
        let mut image = sample_image();
        refresh_all_crcs(&mut image, &map);
        image[0] ^= 0xFF;
        let mismatches = verify_all_crcs(&image, &map).unwrap_err();
        assert_eq!(mismatches.len(), 1);
    }
}
