//! Geo Registry: loads GeoJSON polygon sets from a directory once, keyed by
//! lowercased filename stem, with self-intersection repair and an R-tree
//! spatial index for point-query narrowing.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use geo::{BooleanOps, BoundingRect, Relate};
use geo_types::Geometry;
use rstar::{RTree, RTreeObject, AABB};
use tracing::warn;

use crate::error::GeoError;
use crate::models::FeatureProperties;

/// One loaded and (if necessary) repaired polygon feature.
#[derive(Debug, Clone)]
pub struct PolygonFeature {
    pub geometry: Geometry<f64>,
    pub properties: FeatureProperties,
}

struct IndexedEnvelope {
    index: usize,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedEnvelope {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Features loaded from one file or group of files, in load order.
struct FeatureSet {
    features: Vec<PolygonFeature>,
    index: RTree<IndexedEnvelope>,
}

impl FeatureSet {
    fn build(features: Vec<PolygonFeature>) -> Self {
        let entries: Vec<IndexedEnvelope> = features
            .iter()
            .enumerate()
            .filter_map(|(index, f)| envelope_of(&f.geometry).map(|envelope| IndexedEnvelope { index, envelope }))
            .collect();
        Self {
            index: RTree::bulk_load(entries),
            features,
        }
    }

    /// Candidate features whose envelope contains the point; the caller
    /// still runs the exact contains/touches/intersects test.
    fn candidates_near(&self, lon: f64, lat: f64) -> Vec<&PolygonFeature> {
        if self.features.len() <= 8 {
            return self.features.iter().collect();
        }
        let point = [lon, lat];
        self.index
            .locate_all_at_point(&point)
            .map(|e| &self.features[e.index])
            .collect()
    }
}

fn envelope_of(geometry: &Geometry<f64>) -> Option<AABB<[f64; 2]>> {
    let rect = geometry.bounding_rect()?;
    Some(AABB::from_corners(
        [rect.min().x, rect.min().y],
        [rect.max().x, rect.max().y],
    ))
}

/// Immutable, post-init registry of all loaded polygon sets.
pub struct GeoRegistry {
    /// Insertion order matters: `find_by_keyword` preserves load order.
    sets: Vec<(String, FeatureSet)>,
}

impl GeoRegistry {
    /// Loads every `*.geojson`/`*.json` file in `dir`. Unreadable or
    /// malformed files are skipped with a warning rather than aborting the
    /// whole load — a missing directory is fatal at boot, a single bad
    /// file is not.
    pub fn load(dir: &Path) -> Result<Self, GeoError> {
        let entries = fs::read_dir(dir).map_err(|source| GeoError::DirectoryUnreadable {
            path: dir.display().to_string(),
            source,
        })?;

        let mut sets = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let is_geo_file = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("geojson") || ext.eq_ignore_ascii_case("json"))
                .unwrap_or(false);
            if !is_geo_file {
                continue;
            }
            let stem = match path.file_stem().and_then(|s| s.to_str()) {
                Some(s) => s.to_lowercase(),
                None => continue,
            };
            match load_file(&path) {
                Ok(features) => {
                    let count = features.len();
                    sets.push((stem.clone(), FeatureSet::build(features)));
                    tracing::info!(file = %path.display(), key = %stem, shapes = count, "loaded geo feature set");
                }
                Err(err) => warn!(file = %path.display(), %err, "skipping unreadable/malformed geo file"),
            }
        }

        Ok(Self { sets })
    }

    /// Union of all feature sets whose key contains `keyword`
    /// (case-insensitive), preserving load order. `None` if no key matches —
    /// the distinguished "no such keyword" result.
    pub fn find_by_keyword(&self, keyword: &str) -> Option<Vec<&PolygonFeature>> {
        let needle = keyword.to_lowercase();
        let mut out = Vec::new();
        for (key, set) in &self.sets {
            if key.contains(&needle) {
                out.extend(set.features.iter());
            }
        }
        if out.is_empty() {
            None
        } else {
            Some(out)
        }
    }

    /// Like `find_by_keyword`, but pre-filtered to features whose envelope
    /// could plausibly contain `(lon, lat)` using each set's R-tree.
    pub fn candidates_by_keyword(&self, keyword: &str, lon: f64, lat: f64) -> Vec<&PolygonFeature> {
        let needle = keyword.to_lowercase();
        let mut out = Vec::new();
        for (key, set) in &self.sets {
            if key.contains(&needle) {
                out.extend(set.candidates_near(lon, lat));
            }
        }
        out
    }
}

fn load_file(path: &Path) -> Result<Vec<PolygonFeature>, GeoError> {
    let raw = fs::read_to_string(path).map_err(|source| GeoError::DirectoryUnreadable {
        path: path.display().to_string(),
        source,
    })?;
    let geojson: geojson::GeoJson = raw.parse().map_err(|source| GeoError::MalformedFile {
        file: path.display().to_string(),
        source,
    })?;

    let raw_features = match geojson {
        geojson::GeoJson::FeatureCollection(fc) => fc.features,
        geojson::GeoJson::Feature(f) => vec![f],
        geojson::GeoJson::Geometry(g) => vec![geojson::Feature {
            bbox: None,
            geometry: Some(g),
            id: None,
            properties: None,
            foreign_members: None,
        }],
    };

    let mut out = Vec::with_capacity(raw_features.len());
    for feature in raw_features {
        let Some(geom) = feature.geometry else { continue };
        let parsed: Geometry<f64> = match Geometry::try_from(geom) {
            Ok(g) => g,
            Err(source) => {
                warn!(file = %path.display(), %source, "dropping feature with unconvertible geometry");
                continue;
            }
        };

        let geometry = match repair_if_needed(parsed) {
            Ok(g) => g,
            Err(reason) => {
                let err = GeoError::RepairFailed { file: path.display().to_string(), reason };
                warn!(%err, "dropping feature");
                continue;
            }
        };

        let properties = feature
            .properties
            .and_then(|p| serde_json::from_value(serde_json::Value::Object(p)).ok())
            .unwrap_or_default();

        out.push(PolygonFeature { geometry, properties });
    }

    Ok(out)
}

/// Validates (a cheap self-intersection check on the exterior ring) and, if
/// invalid, attempts a zero-width-buffer-equivalent repair via self-union,
/// mirroring shapely's `buffer(0)` idiom without pulling in a buffering
/// crate. Returns the repair failure reason if the union still leaves
/// nothing behind.
fn repair_if_needed(geometry: Geometry<f64>) -> Result<Geometry<f64>, String> {
    match &geometry {
        Geometry::Polygon(poly) => {
            if is_simple_ring(poly.exterior()) {
                return Ok(geometry);
            }
            let repaired = poly.union(poly);
            if repaired.0.is_empty() {
                Err("self-union of invalid polygon produced an empty result".to_string())
            } else if repaired.0.len() == 1 {
                Ok(Geometry::Polygon(repaired.0.into_iter().next().unwrap()))
            } else {
                Ok(Geometry::MultiPolygon(repaired))
            }
        }
        Geometry::MultiPolygon(mp) => {
            let all_simple = mp.0.iter().all(|p| is_simple_ring(p.exterior()));
            if all_simple {
                return Ok(geometry);
            }
            let mut acc = geo_types::MultiPolygon::new(vec![]);
            for poly in &mp.0 {
                acc = acc.union(&geo_types::MultiPolygon::new(vec![poly.clone()]));
            }
            if acc.0.is_empty() {
                Err("self-union of invalid multipolygon produced an empty result".to_string())
            } else {
                Ok(Geometry::MultiPolygon(acc))
            }
        }
        _ => Ok(geometry),
    }
}

/// Naive O(n^2) segment-pair self-intersection check for a ring's edges,
/// skipping adjacent edges (which always share an endpoint).
fn is_simple_ring(ring: &geo_types::LineString<f64>) -> bool {
    let coords = ring.0.as_slice();
    let n = coords.len();
    if n < 4 {
        return true;
    }
    for i in 0..n - 1 {
        let a1 = coords[i];
        let a2 = coords[i + 1];
        for j in (i + 1)..n - 1 {
            if j == i || (i == 0 && j == n - 2) {
                continue;
            }
            if j == i + 1 || j == i.wrapping_sub(1) {
                continue;
            }
            let b1 = coords[j];
            let b2 = coords[j + 1];
            if segments_cross((a1.x, a1.y), (a2.x, a2.y), (b1.x, b1.y), (b2.x, b2.y)) {
                return false;
            }
        }
    }
    true
}

fn segments_cross(p1: (f64, f64), p2: (f64, f64), p3: (f64, f64), p4: (f64, f64)) -> bool {
    fn cross(o: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
        (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
    }
    let d1 = cross(p3, p4, p1);
    let d2 = cross(p3, p4, p2);
    let d3 = cross(p1, p2, p3);
    let d4 = cross(p1, p2, p4);
    ((d1 > 0.0) != (d2 > 0.0)) && ((d3 > 0.0) != (d4 > 0.0))
}

/// A point exactly on a polygon boundary counts as inside.
pub fn contains_or_touches(geometry: &Geometry<f64>, point: geo_types::Point<f64>) -> bool {
    use geo::Contains;
    if geometry.contains(&point) {
        return true;
    }
    geometry.relate(&point).is_touches()
}
