//! GeoJSON output for the rendering layer.
//!
//! Segments become `LineString` features carrying their scores; arrows
//! become `Point` features carrying rotation and size.

use serde_json::{json, Value};

use crate::arrows::ArrowFeature;
use crate::scoring::ScoredSegment;

/// Scored segments as a GeoJSON `FeatureCollection`.
pub fn segments_feature_collection(segments: &[ScoredSegment]) -> Value {
    let features: Vec<Value> = segments
        .iter()
        .map(|s| {
            json!({
                "type": "Feature",
                "geometry": {
                    "type": "LineString",
                    "coordinates": [s.start.to_array(), s.end.to_array()],
                },
                "properties": {
                    "index": s.index,
                    "headwindRaw": s.stats.headwind_raw,
                    "grade": s.stats.grade,
                    "climbPenalty": s.stats.climb_penalty,
                    "sufferRaw": s.stats.suffer_raw,
                    "normalizedScore": s.stats.normalized_score,
                },
            })
        })
        .collect();

    json!({ "type": "FeatureCollection", "features": features })
}

/// Wind arrows as a GeoJSON `FeatureCollection`.
pub fn arrows_feature_collection(arrows: &[ArrowFeature]) -> Value {
    let features: Vec<Value> = arrows
        .iter()
        .map(|a| {
            json!({
                "type": "Feature",
                "geometry": {
                    "type": "Point",
                    "coordinates": a.position.to_array(),
                },
                "properties": {
                    "rotation": a.rotation,
                    "size": a.size,
                    "speed": a.speed_kmh,
                    "direction": a.direction_from,
                },
            })
        })
        .collect();

    json!({ "type": "FeatureCollection", "features": features })
}
