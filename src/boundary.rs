use anyhow::{Context, Result};
use geo::{BoundingRect, Intersects, MultiPolygon, Point, Rect};
use serde_json::Value;
use std::path::Path;

/// The outer FIR boundary used by the geographic admission filter.
///
/// Containment is boundary-inclusive (a point exactly on an edge is inside)
/// and hole-aware. A pre-computed bounding box rejects far-away points before
/// the polygon test runs; the filter comfortably handles a full snapshot's
/// worth of points per tick.
pub struct FirBoundary {
    boundary: MultiPolygon<f64>,
    bbox: Rect<f64>,
}

impl FirBoundary {
    pub fn from_geojson(value: &Value) -> Result<Self> {
        let boundary = crate::geojson::multipolygon_from_value(value)
            .context("FIR polygon file is not a valid Polygon/MultiPolygon GeoJSON")?;
        let bbox = boundary
            .bounding_rect()
            .context("FIR polygon has no bounding box")?;
        Ok(Self { boundary, bbox })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read FIR polygon file {}", path.display()))?;
        let value: Value = serde_json::from_str(&raw)
            .with_context(|| format!("FIR polygon file {} is not valid JSON", path.display()))?;
        Self::from_geojson(&value)
    }

    /// Geographic admission test. Missing coordinates are admitted (the
    /// filter is conservative, never rejecting on absent data).
    pub fn contains(&self, latitude: Option<f64>, longitude: Option<f64>) -> bool {
        match (latitude, longitude) {
            (Some(lat), Some(lon)) => self.contains_point(lat, lon),
            _ => true,
        }
    }

    fn contains_point(&self, lat: f64, lon: f64) -> bool {
        let point = Point::new(lon, lat);
        self.bbox.intersects(&point) && self.boundary.intersects(&point)
    }
}
