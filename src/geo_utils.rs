//! Geographic utilities: bearings, distances, small offsets and the rounded
//! coordinate keys every cache in this crate is indexed by.
//!
//! All functions are pure. Inputs are unrestricted reals and NaN propagates.

use crate::Coordinate;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Initial great-circle bearing from `a` to `b`, in degrees within [0, 360).
///
/// # Example
/// ```
/// use route_suffer::Coordinate;
/// use route_suffer::geo_utils::bearing;
///
/// let north = bearing(&Coordinate::new(0.0, 0.0), &Coordinate::new(0.0, 1.0));
/// assert!(north.abs() < 1e-9);
/// ```
pub fn bearing(a: &Coordinate, b: &Coordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let y = d_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lon.cos();

    y.atan2(x).to_degrees().rem_euclid(360.0)
}

/// Smallest unsigned angle between two bearings, in degrees within [0, 180].
pub fn angular_difference(a: f64, b: f64) -> f64 {
    let diff = (a - b).rem_euclid(360.0);
    if diff > 180.0 {
        360.0 - diff
    } else {
        diff
    }
}

/// Great-circle distance between two coordinates in meters.
pub fn haversine_distance(a: &Coordinate, b: &Coordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Displace `point` by `distance_m` along `bearing_deg` using a flat-earth
/// approximation.
///
/// Only meaningful for short distances (tens of meters). Negative distances
/// displace towards the opposite bearing.
pub fn offset_point(point: &Coordinate, bearing_deg: f64, distance_m: f64) -> Coordinate {
    let theta = bearing_deg.to_radians();
    let d_north = distance_m * theta.cos();
    let d_east = distance_m * theta.sin();

    let d_lat = (d_north / EARTH_RADIUS_M).to_degrees();
    let d_lon = (d_east / (EARTH_RADIUS_M * point.latitude.to_radians().cos())).to_degrees();

    Coordinate::new(point.longitude + d_lon, point.latitude + d_lat)
}

/// Coordinate rounded to a fixed number of decimal places, usable as a hash key.
///
/// Four decimals is roughly an 11 m grid, five roughly 1 m. Two queries that
/// round to the same key share one cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoordKey {
    lat_e: i64,
    lng_e: i64,
    precision: u32,
}

impl CoordKey {
    /// Round a latitude/longitude pair to `precision` decimal places.
    ///
    /// Non-finite components map to `i64::MIN`, which no finite coordinate
    /// rounds to, so they never share a key with a real location.
    pub fn new(latitude: f64, longitude: f64, precision: u32) -> Self {
        let scale = 10f64.powi(precision as i32);
        Self {
            lat_e: scaled(latitude, scale),
            lng_e: scaled(longitude, scale),
            precision,
        }
    }

    /// Whether both components came from finite input.
    pub fn is_finite(&self) -> bool {
        self.lat_e != i64::MIN && self.lng_e != i64::MIN
    }

    /// Key for a route coordinate.
    pub fn from_coordinate(coord: &Coordinate, precision: u32) -> Self {
        Self::new(coord.latitude, coord.longitude, precision)
    }

    /// Rounded latitude in degrees, NaN for non-finite input.
    pub fn latitude(&self) -> f64 {
        self.unscaled(self.lat_e)
    }

    /// Rounded longitude in degrees, NaN for non-finite input.
    pub fn longitude(&self) -> f64 {
        self.unscaled(self.lng_e)
    }

    fn unscaled(&self, value: i64) -> f64 {
        if value == i64::MIN {
            return f64::NAN;
        }
        value as f64 / 10f64.powi(self.precision as i32)
    }
}

fn scaled(value: f64, scale: f64) -> i64 {
    if value.is_finite() {
        (value * scale).round() as i64
    } else {
        i64::MIN
    }
}

impl std::fmt::Display for CoordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let p = self.precision as usize;
        write!(f, "{:.*},{:.*}", p, self.latitude(), p, self.longitude())
    }
}

/// Direction-independent identity of a route edge.
///
/// Both endpoints are rounded and stored in sorted order, so `a → b` and
/// `b → a` produce the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeKey(CoordKey, CoordKey);

impl EdgeKey {
    pub fn new(a: &Coordinate, b: &Coordinate, precision: u32) -> Self {
        let ka = CoordKey::from_coordinate(a, precision);
        let kb = CoordKey::from_coordinate(b, precision);
        if ka <= kb {
            EdgeKey(ka, kb)
        } else {
            EdgeKey(kb, ka)
        }
    }
}
