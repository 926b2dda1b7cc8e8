//! Minimal GeoJSON geometry extraction into `geo` types.
//!
//! Only Polygon and MultiPolygon geometries are accepted; everything the
//! reference files may wrap them in (Feature, FeatureCollection,
//! GeometryCollection) is unwrapped. Coordinates follow the GeoJSON
//! convention of [lon, lat].

use anyhow::{Context, Result};
use geo::{Coord, LineString, MultiPolygon, Polygon};
use serde_json::Value;

fn ring_from_coords(coords: &Value) -> Result<LineString<f64>> {
    let points = coords
        .as_array()
        .context("polygon ring is not an array")?
        .iter()
        .map(|pair| {
            let pair = pair.as_array().context("coordinate is not an array")?;
            let lon = pair
                .first()
                .and_then(Value::as_f64)
                .context("coordinate missing longitude")?;
            let lat = pair
                .get(1)
                .and_then(Value::as_f64)
                .context("coordinate missing latitude")?;
            Ok(Coord { x: lon, y: lat })
        })
        .collect::<Result<Vec<_>>>()?;

    if points.len() < 4 {
        anyhow::bail!("polygon ring has fewer than 4 coordinates");
    }
    Ok(LineString::from(points))
}

fn polygon_from_rings(rings: &Value) -> Result<Polygon<f64>> {
    let rings = rings.as_array().context("polygon is not an array of rings")?;
    let mut iter = rings.iter();
    let exterior = ring_from_coords(iter.next().context("polygon has no exterior ring")?)?;
    let interiors = iter.map(ring_from_coords).collect::<Result<Vec<_>>>()?;
    Ok(Polygon::new(exterior, interiors))
}

/// Extract a MultiPolygon from any reasonable GeoJSON wrapping of a Polygon
/// or MultiPolygon geometry.
pub fn multipolygon_from_value(value: &Value) -> Result<MultiPolygon<f64>> {
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .context("GeoJSON object missing \"type\"")?;

    match kind {
        "Polygon" => {
            let coords = value.get("coordinates").context("Polygon missing coordinates")?;
            Ok(MultiPolygon::new(vec![polygon_from_rings(coords)?]))
        }
        "MultiPolygon" => {
            let coords = value
                .get("coordinates")
                .and_then(Value::as_array)
                .context("MultiPolygon missing coordinates")?;
            let polygons = coords
                .iter()
                .map(polygon_from_rings)
                .collect::<Result<Vec<_>>>()?;
            if polygons.is_empty() {
                anyhow::bail!("MultiPolygon has no polygons");
            }
            Ok(MultiPolygon::new(polygons))
        }
        "Feature" => multipolygon_from_value(
            value.get("geometry").context("Feature missing geometry")?,
        ),
        "FeatureCollection" => {
            let features = value
                .get("features")
                .and_then(Value::as_array)
                .context("FeatureCollection missing features")?;
            let first = features
                .first()
                .context("FeatureCollection has no features")?;
            multipolygon_from_value(first)
        }
        "GeometryCollection" => {
            let geometries = value
                .get("geometries")
                .and_then(Value::as_array)
                .context("GeometryCollection missing geometries")?;
            let first = geometries
                .first()
                .context("GeometryCollection has no geometries")?;
            multipolygon_from_value(first)
        }
        other => anyhow::bail!("unsupported GeoJSON geometry type {:?}", other),
    }
}

/// Extract named (sector_name, geometry) pairs from a FeatureCollection.
/// The name is read from a `name`/`Name`/`NAME` property.
pub fn named_polygons_from_value(value: &Value) -> Result<Vec<(String, MultiPolygon<f64>)>> {
    let features = value
        .get("features")
        .and_then(Value::as_array)
        .context("sector file is not a FeatureCollection")?;

    let mut result = Vec::with_capacity(features.len());
    for feature in features {
        let properties = feature.get("properties").cloned().unwrap_or(Value::Null);
        let name = ["name", "Name", "NAME"]
            .iter()
            .find_map(|key| properties.get(key).and_then(Value::as_str))
            .context("sector feature missing a name property")?
            .to_string();
        let geometry = multipolygon_from_value(
            feature.get("geometry").context("sector feature missing geometry")?,
        )
        .with_context(|| format!("invalid geometry for sector {:?}", name))?;
        result.push((name, geometry));
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_polygon_with_hole() {
        let doc = json!({
            "type": "Polygon",
            "coordinates": [
                [[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0], [0.0, 0.0]],
                [[4.0, 4.0], [6.0, 4.0], [6.0, 6.0], [4.0, 6.0], [4.0, 4.0]]
            ]
        });
        let mp = multipolygon_from_value(&doc).unwrap();
        assert_eq!(mp.0.len(), 1);
        assert_eq!(mp.0[0].interiors().len(), 1);
    }

    #[test]
    fn test_feature_wrapping() {
        let doc = json!({
            "type": "Feature",
            "properties": {},
            "geometry": {
                "type": "MultiPolygon",
                "coordinates": [
                    [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]
                ]
            }
        });
        let mp = multipolygon_from_value(&doc).unwrap();
        assert_eq!(mp.0.len(), 1);
    }

    #[test]
    fn test_named_polygons() {
        let doc = json!({
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "properties": { "name": "ARL" },
                    "geometry": {
                        "type": "Polygon",
                        "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]
                    }
                }
            ]
        });
        let sectors = named_polygons_from_value(&doc).unwrap();
        assert_eq!(sectors.len(), 1);
        assert_eq!(sectors[0].0, "ARL");
    }

    #[test]
    fn test_point_geometry_rejected() {
        let doc = json!({ "type": "Point", "coordinates": [151.2, -33.8] });
        assert!(multipolygon_from_value(&doc).is_err());
    }

    #[test]
    fn test_short_ring_rejected() {
        let doc = json!({
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [1.0, 0.0], [0.0, 0.0]]]
        });
        assert!(multipolygon_from_value(&doc).is_err());
    }
}
