//! Static, variant-indexed zone map registry (§9's "closed sum over a
//! fixed set of table kinds", applied to CRC zones instead of heterogeneous
//! map descriptors).

use crate::integrity::zonemap::{Zone, ZoneMap, ZoneMapError};
use crate::types::{CALIBRATION_REGION_START, ControllerVariant};

/// Builds the zone map shipped for `variant`. Zones are addressed as
/// offsets into the full candidate image (consistent with the forbidden
/// region/rejected map registries), and live inside the calibration
/// sub-window (`CALIBRATION_REGION_START..CALIBRATION_REGION_END`) that
/// the orchestrator actually transmits. Both MSD80 and MSD81 share the
/// same layout in this implementation; a variant-specific override point
/// is `match variant { ... }` below should that change.
pub fn default_zone_map(variant: ControllerVariant) -> Result<ZoneMap, ZoneMapError> {
    let region_len = crate::types::CALIBRATION_REGION_LEN;
    let half = region_len / 2;
    let base = CALIBRATION_REGION_START;
    let zones = match variant {
        ControllerVariant::Msd80 | ControllerVariant::Msd81 => vec![
            Zone::new(base, base + half - 16, base + half - 16),
            Zone::new(base + half, base + region_len - 16, base + region_len - 16),
        ],
    };
    ZoneMap::new(variant, zones)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_zone_maps_are_valid_for_all_variants() {
        assert!(default_zone_map(ControllerVariant::Msd80).is_ok());
        assert!(default_zone_map(ControllerVariant::Msd81).is_ok());
    }
}
