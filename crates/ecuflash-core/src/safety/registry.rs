//! Variant-keyed registries of [`ForbiddenRegion`], blacklisted byte
//! ranges, and [`ValidatedMap`] entries (§3, §4.5).

use crate::types::ControllerVariant;

/// A closed byte range (both `start` and `end` inclusive), addressed as an
/// offset into the full candidate image (see
/// [`crate::types::FULL_IMAGE_LEN`]), that no external write may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForbiddenRegion {
    pub start: usize,
    pub end: usize,
    pub label: &'static str,
}

/// A known-safe-to-edit calibration table, advisory for diff
/// classification and logging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedMap {
    pub offset: usize,
    pub length: usize,
    pub category: &'static str,
    pub label: &'static str,
}

/// A blacklisted, closed byte range (e.g. a boost-control checksum block)
/// that is rejected outright regardless of forbidden-region status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RejectedRange {
    pub start: usize,
    pub end: usize,
    pub label: &'static str,
}

/// Forbidden regions recorded for the primary variant, addressed as
/// offsets into the full candidate image (see [`crate::types::FULL_IMAGE_LEN`]):
/// both WGDC checksum blocks, the boot code block, and the flash counter.
pub fn forbidden_regions(_variant: ControllerVariant) -> &'static [ForbiddenRegion] {
    const REGIONS: &[ForbiddenRegion] = &[
        ForbiddenRegion { start: 0x000000, end: 0x007FFF, label: "boot code" },
        ForbiddenRegion { start: 0x054A90, end: 0x054B50, label: "WGDC checksum block A" },
        ForbiddenRegion { start: 0x05AD20, end: 0x05AD80, label: "WGDC checksum block B" },
        ForbiddenRegion { start: 0x1F0000, end: 0x200000, label: "flash counter" },
    ];
    REGIONS
}

/// Blacklisted ranges (boost-control checksum tables) for the primary variant.
pub fn rejected_map(_variant: ControllerVariant) -> &'static [RejectedRange] {
    const RANGES: &[RejectedRange] = &[
        RejectedRange { start: 0x054A90, end: 0x054B50, label: "boost-control checksum block" },
    ];
    RANGES
}

/// Calibration tables known to be safe to edit, used only to classify
/// diffs for logging; unclassified diffs are a warning, not a hard failure.
pub fn validated_map(_variant: ControllerVariant) -> &'static [ValidatedMap] {
    const TABLES: &[ValidatedMap] = &[
        ValidatedMap { offset: 0x010000, length: 0x4000, category: "fuel", label: "primary fuel map" },
        ValidatedMap { offset: 0x020000, length: 0x2000, category: "ignition", label: "ignition timing map" },
    ];
    TABLES
}
