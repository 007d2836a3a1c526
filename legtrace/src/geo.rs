//! Planar-to-WGS84 conversion at the output boundary (spec §4.6), grounded
//! in `bambam-core::util::geo_utils`'s use of `geo::Point`.

use geo::Point;

/// Converts a configured local metric CRS into WGS84 lat/lon. This crate
/// does not implement general-purpose CRS reprojection (the spec's
/// Non-goals exclude map-matching beyond the inputs already available); a
/// caller needing a real projection (e.g. via `proj`) supplies one through
/// this trait instead of the identity/affine default.
pub trait Converter: Send + Sync {
    fn to_wgs84(&self, x: f64, y: f64) -> Point<f64>;
}

/// A converter that treats planar coordinates as already being in WGS84
/// decimal degrees — correct only for test fixtures and callers whose local
/// CRS genuinely is lon/lat. Production callers should supply a
/// [`Converter`] backed by their configured `local_crs` (spec
/// `PipelineConfig::local_crs`).
pub struct IdentityConverter;

impl Converter for IdentityConverter {
    fn to_wgs84(&self, x: f64, y: f64) -> Point<f64> {
        Point::new(x, y)
    }
}
