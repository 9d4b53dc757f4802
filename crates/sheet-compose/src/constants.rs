//! Shared constants for sheet composition
//!
//! This module centralizes the sheet geometry and the magic numbers used
//! throughout the composition pipeline.

// =============================================================================
// Unit Conversion
// =============================================================================

/// Points per millimeter (1 inch = 72 points, 1 inch = 25.4mm)
pub const POINTS_PER_MM: f32 = 72.0 / 25.4; // ≈ 2.83465

/// Convert millimeters to points
#[inline]
pub fn mm_to_pt(mm: f32) -> f32 {
    mm * POINTS_PER_MM
}

/// Convert points to millimeters
#[inline]
pub fn pt_to_mm(pt: f32) -> f32 {
    pt / POINTS_PER_MM
}

// =============================================================================
// Sheet Geometry
// =============================================================================

/// Fixed output sheet width (317 mm roll width)
pub const SHEET_WIDTH_PT: f32 = 317.0 * POINTS_PER_MM; // ≈ 898.58

/// Tallest sheet the downstream print equipment accepts (980 mm)
pub const MAX_SHEET_HEIGHT_PT: f32 = 980.0 * POINTS_PER_MM; // ≈ 2778.00

/// Tolerance for accumulated f32 rounding in stack-height comparisons
pub const HEIGHT_EPSILON: f32 = 0.01;

// =============================================================================
// Default Page Dimensions
// =============================================================================

/// Default page width in points (US Letter) when a page has no MediaBox
pub const DEFAULT_PAGE_WIDTH_PT: f32 = 612.0;

/// Default page height in points (US Letter)
pub const DEFAULT_PAGE_HEIGHT_PT: f32 = 792.0;

/// Default page dimensions as tuple (width, height)
pub const DEFAULT_PAGE_DIMENSIONS: (f32, f32) = (DEFAULT_PAGE_WIDTH_PT, DEFAULT_PAGE_HEIGHT_PT);

// =============================================================================
// Standard Sheet Height Heuristic
// =============================================================================

/// How many leading sheets the height simulation inspects at most
pub const SIMULATED_SHEET_LIMIT: usize = 10;

/// A simulated sheet shorter than this fraction of the maximum is
/// considered atypical and skipped when choosing the standard height
pub const MIN_STANDARD_HEIGHT_FRACTION: f32 = 0.5;

// =============================================================================
// Form-Object Cache
// =============================================================================

/// Bounded number of copied page form objects kept addressable at once
pub const FORM_CACHE_CAPACITY: usize = 1000;

// =============================================================================
// Progress Reporting
// =============================================================================

/// Emit a dimension-scan event every this many pages
pub const DIMENSION_REPORT_INTERVAL: usize = 100;

/// Page-processing events fire at least every `total / 50` pages...
pub const PROGRESS_REPORT_DIVISOR: usize = 50;

/// ...but never more often than every 10 pages
pub const MIN_PROGRESS_PAGE_INTERVAL: usize = 10;

/// Percent band occupied by the dimension scan
pub const PERCENT_DIMENSIONS_START: f32 = 5.0;
pub const PERCENT_DIMENSIONS_END: f32 = 10.0;

/// Percent band occupied by page processing
pub const PERCENT_PAGES_START: f32 = 10.0;
pub const PERCENT_PAGES_END: f32 = 90.0;

/// Percent reported while the output document is compressed
pub const PERCENT_OPTIMIZING: f32 = 95.0;

/// Floor for the pages-per-second divisor in ETA computation
pub const MIN_PAGES_PER_SECOND: f32 = 0.1;
