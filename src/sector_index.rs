use anyhow::{Context, Result};
use geo::{BoundingRect, Intersects, MultiPolygon, Point, Rect};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;

struct Sector {
    name: String,
    boundary: MultiPolygon<f64>,
    bbox: Rect<f64>,
}

/// The ordered collection of named sector polygons.
///
/// Sectors may overlap, so a position can be in several at once. Containment
/// is boundary-inclusive, matching the FIR filter: a flight exactly on a
/// sector edge is in that sector.
pub struct SectorIndex {
    sectors: Vec<Sector>,
}

impl SectorIndex {
    pub fn from_geojson(value: &Value) -> Result<Self> {
        let sectors = crate::geojson::named_polygons_from_value(value)?
            .into_iter()
            .map(|(name, boundary)| {
                let bbox = boundary
                    .bounding_rect()
                    .with_context(|| format!("sector {:?} has no bounding box", name))?;
                Ok(Sector { name, boundary, bbox })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { sectors })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read sector file {}", path.display()))?;
        let value: Value = serde_json::from_str(&raw)
            .with_context(|| format!("Sector file {} is not valid JSON", path.display()))?;
        Self::from_geojson(&value)
    }

    pub fn len(&self) -> usize {
        self.sectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sectors.is_empty()
    }

    pub fn sector_names(&self) -> Vec<&str> {
        self.sectors.iter().map(|s| s.name.as_str()).collect()
    }

    /// Every sector whose polygon contains the position. Missing coordinates
    /// yield the empty set.
    pub fn sectors_containing(
        &self,
        latitude: Option<f64>,
        longitude: Option<f64>,
    ) -> HashSet<String> {
        let (lat, lon) = match (latitude, longitude) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => return HashSet::new(),
        };

        let point = Point::new(lon, lat);
        self.sectors
            .iter()
            .filter(|sector| sector.bbox.intersects(&point) && sector.boundary.intersects(&point))
            .map(|sector| sector.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn overlapping_sectors() -> SectorIndex {
        // Sector A covers x in [0, 6], sector B covers x in [4, 10]; both y in [0, 10]
        let doc = json!({
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "properties": { "name": "A" },
                    "geometry": {
                        "type": "Polygon",
                        "coordinates": [[[0.0, 0.0], [6.0, 0.0], [6.0, 10.0], [0.0, 10.0], [0.0, 0.0]]]
                    }
                },
                {
                    "type": "Feature",
                    "properties": { "name": "B" },
                    "geometry": {
                        "type": "Polygon",
                        "coordinates": [[[4.0, 0.0], [10.0, 0.0], [10.0, 10.0], [4.0, 10.0], [4.0, 0.0]]]
                    }
                }
            ]
        });
        SectorIndex::from_geojson(&doc).unwrap()
    }

    #[test]
    fn test_single_sector() {
        let index = overlapping_sectors();
        let found = index.sectors_containing(Some(5.0), Some(2.0));
        assert_eq!(found, HashSet::from(["A".to_string()]));
    }

    #[test]
    fn test_overlap_returns_both() {
        let index = overlapping_sectors();
        let found = index.sectors_containing(Some(5.0), Some(5.0));
        assert_eq!(found, HashSet::from(["A".to_string(), "B".to_string()]));
    }

    #[test]
    fn test_edge_point_is_inside() {
        let index = overlapping_sectors();
        // x = 6.0 is A's right edge and inside B
        let found = index.sectors_containing(Some(5.0), Some(6.0));
        assert!(found.contains("A"));
        assert!(found.contains("B"));
    }

    #[test]
    fn test_missing_coordinates_empty_set() {
        let index = overlapping_sectors();
        assert!(index.sectors_containing(None, Some(5.0)).is_empty());
        assert!(index.sectors_containing(Some(5.0), None).is_empty());
    }

    #[test]
    fn test_outside_all() {
        let index = overlapping_sectors();
        assert!(index.sectors_containing(Some(50.0), Some(50.0)).is_empty());
    }
}
