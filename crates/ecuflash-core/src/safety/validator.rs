//! The seven-layer pre-flash validator (§4.5 Phase A, §8).
//!
//! Runs strictly in order; the first hard failure stops evaluation and
//! reports which layer (1-indexed) refused the image, matching the
//! `ValidationRefused { layer, details }` error shape.

use crate::error::OrchestratorError;
use crate::safety::registry::{forbidden_regions, rejected_map, validated_map};
use crate::types::{ControllerVariant, FULL_IMAGE_LEN};

/// A non-fatal finding surfaced to the caller for explicit acknowledgement
/// (layer 3's "unclassified diff" and layer 7's aggregation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    pub offset: usize,
    pub detail: String,
}

/// Successful Phase A result: no hard failure, plus whatever warnings were
/// collected along the way.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationOutcome {
    pub warnings: Vec<ValidationWarning>,
}

/// Runs all seven layers against `candidate`, diffed against `stock` when a
/// known-good reference image is available (layer 1 falls back to
/// "non-0xFF byte in a forbidden region" when it isn't).
pub fn validate_image(
    variant: ControllerVariant,
    candidate: &[u8],
    stock: Option<&[u8]>,
) -> Result<ValidationOutcome, OrchestratorError> {
    // Layer 1: forbidden-region intersection. `region.end` is inclusive, so
    // the scan runs through `region.end + 1` (exclusive) to cover it.
    for region in forbidden_regions(variant) {
        let touched = match stock {
            Some(stock) => (region.start..(region.end + 1).min(candidate.len()).min(stock.len()))
                .any(|i| candidate[i] != stock[i]),
            None => candidate[region.start..(region.end + 1).min(candidate.len())].iter().any(|&b| b != 0xFF),
        };
        if touched {
            return Err(refuse(1, format!("diff intersects forbidden region '{}' ({:#X}..={:#X})", region.label, region.start, region.end)));
        }
    }

    // Layer 2: rejected-map blacklist. Same inclusive-end convention as layer 1.
    for range in rejected_map(variant) {
        let touched = match stock {
            Some(stock) => (range.start..(range.end + 1).min(candidate.len()).min(stock.len()))
                .any(|i| candidate[i] != stock[i]),
            None => candidate[range.start..(range.end + 1).min(candidate.len())].iter().any(|&b| b != 0xFF),
        };
        if touched {
            return Err(refuse(2, format!("diff intersects blacklisted range '{}' ({:#X}..={:#X})", range.label, range.start, range.end)));
        }
    }

    // Layer 3: registry classification. Non-fatal; every modified byte
    // outside a ValidatedMap entry becomes a warning.
    let mut warnings = Vec::new();
    if let Some(stock) = stock {
        let maps = validated_map(variant);
        let mut offset = 0usize;
        while offset < candidate.len().min(stock.len()) {
            if candidate[offset] != stock[offset] {
                let classified = maps.iter().any(|m| offset >= m.offset && offset < m.offset + m.length);
                if !classified {
                    warnings.push(ValidationWarning {
                        offset,
                        detail: format!("unclassified modification at {:#X}", offset),
                    });
                }
            }
            offset += 1;
        }
    }

    // Layer 4: size.
    if candidate.len() != FULL_IMAGE_LEN {
        return Err(refuse(4, format!("image length {} does not match declared size {}", candidate.len(), FULL_IMAGE_LEN)));
    }

    // Layer 5: all-zero.
    if candidate.iter().all(|&b| b == 0x00) {
        return Err(refuse(5, "image is entirely zero bytes".to_string()));
    }

    // Layer 6: all-0xFF (erased, un-patched image).
    if candidate.iter().all(|&b| b == 0xFF) {
        return Err(refuse(6, "image is entirely 0xFF (erased, un-patched)".to_string()));
    }

    // Layer 7: warning aggregation is simply returning the accumulated list;
    // the orchestrator requires explicit caller acknowledgement before Phase B.
    Ok(ValidationOutcome { warnings })
}

fn refuse(layer: u8, details: String) -> OrchestratorError {
    OrchestratorError::ValidationRefused { layer, details }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn erased_image() -> Vec<u8> {
        vec![0xFFu8; FULL_IMAGE_LEN]
    }

    #[test]
    fn test_all_ff_image_rejected_at_layer_6() {
        let image = erased_image();
        let err = validate_image(ControllerVariant::Msd80, &image, None).unwrap_err();
        assert!(matches!(err, OrchestratorError::ValidationRefused { layer: 6, .. }));
    }

    #[test]
    fn test_all_zero_image_without_a_stock_reference_trips_layer_1_first() {
        // With no stock image, layer 1 falls back to "any non-0xFF byte in a
        // forbidden region", which an all-zero image also trips; strict
        // layer ordering means it is refused there rather than at layer 5.
        let image = vec![0x00u8; FULL_IMAGE_LEN];
        let err = validate_image(ControllerVariant::Msd80, &image, None).unwrap_err();
        assert!(matches!(err, OrchestratorError::ValidationRefused { layer: 1, .. }));
    }

    #[test]
    fn test_all_zero_image_identical_to_stock_rejected_at_layer_5() {
        // A stock reference identical to the candidate produces no diff at
        // all, so layers 1-3 pass trivially and the all-zero check at
        // layer 5 is the one that fires.
        let stock = vec![0x00u8; FULL_IMAGE_LEN];
        let image = stock.clone();
        let err = validate_image(ControllerVariant::Msd80, &image, Some(&stock)).unwrap_err();
        assert!(matches!(err, OrchestratorError::ValidationRefused { layer: 5, .. }));
    }

    #[test]
    fn test_wrong_size_rejected_at_layer_4() {
        let image = vec![0xFFu8; FULL_IMAGE_LEN - 1];
        let err = validate_image(ControllerVariant::Msd80, &image, None).unwrap_err();
        assert!(matches!(err, OrchestratorError::ValidationRefused { layer: 4, .. }));
    }

    #[test]
    fn test_diff_touching_forbidden_region_rejected_at_layer_1() {
        let mut image = erased_image();
        image[0x054A90] = 0x01;
        let err = validate_image(ControllerVariant::Msd80, &image, None).unwrap_err();
        assert!(matches!(err, OrchestratorError::ValidationRefused { layer: 1, .. }));
    }

    #[test]
    fn test_diff_at_forbidden_region_end_byte_inclusive_rejected_at_layer_1() {
        // 0x054B50 is the closed region's own end byte; a half-open scan
        // would miss it.
        let mut image = erased_image();
        image[0x054B50] = 0x01;
        let err = validate_image(ControllerVariant::Msd80, &image, None).unwrap_err();
        assert!(matches!(err, OrchestratorError::ValidationRefused { layer: 1, .. }));
    }


    #[test]
    fn test_unclassified_diff_is_a_warning_not_a_failure() {
        let stock = erased_image();
        let mut candidate = stock.clone();
        candidate[0x090000] = 0x42;
        let outcome = validate_image(ControllerVariant::Msd80, &candidate, Some(&stock)).unwrap();
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].offset, 0x090000);
    }

    #[test]
    fn test_classified_diff_produces_no_warning() {
        let stock = erased_image();
        let mut candidate = stock.clone();
        candidate[0x010010] = 0x42;
        let outcome = validate_image(ControllerVariant::Msd80, &candidate, Some(&stock)).unwrap();
        assert!(outcome.warnings.is_empty());
    }
}
