//! Per-segment suffer scoring.
//!
//! Every consecutive pair of route points becomes one segment. A segment's
//! raw score is the headwind it faces (from the nearest wind sample at the
//! chosen forecast hour) plus a penalty for climbing. Raw scores are then
//! normalized against the hardest segment of the route.
//!
//! Edges a route travels more than once, as on an out-and-back, are shifted
//! sideways so each pass renders as its own line: the first pass moves
//! `overlap_offset_m` to one side, the next pass the same distance to the
//! other, alternating after that.

use log::debug;
use rstar::{PointDistance, RTree, RTreeObject, AABB};
use serde::Serialize;
use std::collections::HashMap;

use crate::geo_utils::{angular_difference, bearing, haversine_distance, offset_point, EdgeKey};
use crate::wind::HourlyWindEntry;
use crate::{Coordinate, SamplePoint, ScoringConfig};

/// Scores attached to one route segment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SegmentStats {
    /// Wind component opposing travel, km/h, never negative
    pub headwind_raw: f64,
    /// Signed rise over run, clamped to ±max_grade
    pub grade: f64,
    /// Suffer points from climbing, zero on descents
    pub climb_penalty: f64,
    pub suffer_raw: f64,
    /// `suffer_raw` relative to the route maximum, in [0, 1]
    pub normalized_score: f64,
}

/// One scored segment ready for rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredSegment {
    /// Index of the segment's first route point
    pub index: usize,
    /// Rendered start, offset when the edge is traversed more than once
    pub start: Coordinate,
    /// Rendered end
    pub end: Coordinate,
    /// Travel bearing, degrees
    pub bearing: f64,
    /// Great-circle length of the original segment, meters
    pub distance_m: f64,
    /// Lateral offset applied, meters (0 for edges traversed once)
    pub offset_m: f64,
    pub stats: SegmentStats,
}

/// Headwind felt when travelling along `bearing_deg` into wind blowing from
/// `wind_from_deg`.
///
/// Equals `speed` head-on, falls with the angle, and is zero from 90° on.
pub fn headwind_component(speed_kmh: f64, bearing_deg: f64, wind_from_deg: f64) -> f64 {
    let diff = angular_difference(bearing_deg, wind_from_deg);
    if diff >= 90.0 {
        return 0.0;
    }
    (speed_kmh * diff.to_radians().cos()).max(0.0)
}

/// Clamped grade over `distance_m`, or `None` when the segment is too short.
pub fn segment_grade(
    start_elevation: f64,
    end_elevation: f64,
    distance_m: f64,
    config: &ScoringConfig,
) -> Option<f64> {
    if distance_m < config.min_segment_distance {
        return None;
    }
    let grade = (end_elevation - start_elevation) / distance_m;
    Some(grade.clamp(-config.max_grade, config.max_grade))
}

/// Climb penalty for a grade. Descents are free.
pub fn climb_penalty(grade: f64, config: &ScoringConfig) -> f64 {
    if grade > 0.0 {
        config.climb_penalty_factor * grade
    } else {
        0.0
    }
}

// ============================================================================
// Nearest sample lookup
// ============================================================================

/// A wind sample point with its index for R-tree queries
#[derive(Debug, Clone, Copy)]
struct IndexedSample {
    idx: usize,
    lat: f64,
    lng: f64,
}

impl RTreeObject for IndexedSample {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.lat, self.lng])
    }
}

impl PointDistance for IndexedSample {
    // Squared degrees: fine at route scale, skewed near the poles
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dlat = self.lat - point[0];
        let dlng = self.lng - point[1];
        dlat * dlat + dlng * dlng
    }
}

fn build_sample_index(samples: &[SamplePoint]) -> RTree<IndexedSample> {
    let indexed: Vec<IndexedSample> = samples
        .iter()
        .enumerate()
        .filter(|(_, s)| s.latitude.is_finite() && s.longitude.is_finite())
        .map(|(i, s)| IndexedSample {
            idx: i,
            lat: s.latitude,
            lng: s.longitude,
        })
        .collect();
    RTree::bulk_load(indexed)
}

// ============================================================================
// Scoring
// ============================================================================

/// Score every segment of `route`.
///
/// `wind` holds the cached series for each entry of `samples` (same order);
/// a missing series or hour counts as calm. `elevations` is used only when
/// `include_elevation` is set and it has one value per route point.
///
/// Returns an empty vector for routes with fewer than two points.
pub fn score_route(
    route: &[Coordinate],
    samples: &[SamplePoint],
    wind: &[Option<&[HourlyWindEntry]>],
    hour_index: usize,
    elevations: &[f64],
    include_elevation: bool,
    config: &ScoringConfig,
) -> Vec<ScoredSegment> {
    if route.len() < 2 {
        return Vec::new();
    }

    let sample_index = build_sample_index(samples);
    let use_elevation = include_elevation && elevations.len() == route.len();
    if include_elevation && !use_elevation {
        debug!(
            "[Scoring] Elevation covers {}/{} points, scoring wind only",
            elevations.len(),
            route.len()
        );
    }

    let mut edge_counts: HashMap<EdgeKey, usize> = HashMap::new();
    for pair in route.windows(2) {
        let key = EdgeKey::new(&pair[0], &pair[1], config.edge_key_precision);
        *edge_counts.entry(key).or_insert(0) += 1;
    }
    // Passes so far and the bearing of the first pass, per repeated edge
    let mut edge_passes: HashMap<EdgeKey, (usize, f64)> = HashMap::new();

    let mut segments: Vec<ScoredSegment> = Vec::with_capacity(route.len() - 1);
    for (i, pair) in route.windows(2).enumerate() {
        let (a, b) = (&pair[0], &pair[1]);
        let travel_bearing = bearing(a, b);
        let mid = [
            (a.latitude + b.latitude) / 2.0,
            (a.longitude + b.longitude) / 2.0,
        ];

        // A malformed point has no nearest sample; its segments score calm
        let nearest = if mid.iter().all(|v| v.is_finite()) {
            sample_index.nearest_neighbor(&mid)
        } else {
            None
        };
        let entry = nearest
            .and_then(|s| wind.get(s.idx).copied().flatten())
            .and_then(|series| series.get(hour_index));
        let headwind_raw = entry.map_or(0.0, |w| {
            headwind_component(w.speed_kmh, travel_bearing, w.direction_deg as f64)
        });

        let distance_m = haversine_distance(a, b);
        let mut grade = 0.0;
        let mut climb = 0.0;
        if use_elevation {
            if let Some(g) = segment_grade(elevations[i], elevations[i + 1], distance_m, config) {
                grade = g;
                climb = climb_penalty(g, config);
            }
        }

        let key = EdgeKey::new(a, b, config.edge_key_precision);
        let (start, end, offset_m) = if edge_counts.get(&key).copied().unwrap_or(0) > 1 {
            let passes = edge_passes.entry(key).or_insert((0, travel_bearing));
            let sign = if passes.0 % 2 == 0 { 1.0 } else { -1.0 };
            passes.0 += 1;
            let offset_m = sign * config.overlap_offset_m;
            let perpendicular = passes.1 + 90.0;
            (
                offset_point(a, perpendicular, offset_m),
                offset_point(b, perpendicular, offset_m),
                offset_m,
            )
        } else {
            (*a, *b, 0.0)
        };

        segments.push(ScoredSegment {
            index: i,
            start,
            end,
            bearing: travel_bearing,
            distance_m,
            offset_m,
            stats: SegmentStats {
                headwind_raw,
                grade,
                climb_penalty: climb,
                suffer_raw: headwind_raw + climb,
                normalized_score: 0.0,
            },
        });
    }

    normalize(&mut segments, config.normalize_epsilon);
    segments
}

/// Divide every raw score by the route maximum, floored at `epsilon`.
fn normalize(segments: &mut [ScoredSegment], epsilon: f64) {
    let max_raw = segments
        .iter()
        .map(|s| s.stats.suffer_raw)
        .fold(0.0, f64::max)
        .max(epsilon);

    for segment in segments.iter_mut() {
        segment.stats.normalized_score = (segment.stats.suffer_raw / max_raw).clamp(0.0, 1.0);
    }
}

/// Aggregate figures for a scored route.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RouteSummary {
    pub segment_count: usize,
    pub total_distance_m: f64,
    /// Distance-weighted mean of normalized scores
    pub mean_score: f64,
    pub max_suffer_raw: f64,
    /// Index of the highest-scoring segment
    pub hardest_segment: Option<usize>,
}

/// Summarize a scored route.
pub fn summarize(segments: &[ScoredSegment]) -> RouteSummary {
    let total_distance_m: f64 = segments.iter().map(|s| s.distance_m).sum();
    let weighted: f64 = segments
        .iter()
        .map(|s| s.stats.normalized_score * s.distance_m)
        .sum();
    let hardest = segments.iter().max_by(|x, y| {
        x.stats
            .suffer_raw
            .partial_cmp(&y.stats.suffer_raw)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    RouteSummary {
        segment_count: segments.len(),
        total_distance_m,
        mean_score: if total_distance_m > 0.0 {
            weighted / total_distance_m
        } else {
            0.0
        },
        max_suffer_raw: hardest.map_or(0.0, |s| s.stats.suffer_raw),
        hardest_segment: hardest.map(|s| s.index),
    }
}
