//! Fixed-point coordinates.
//!
//! Node positions are stored as scaled integers at 1e-7 degree resolution so
//! that consecutive positions can be delta and zig-zag encoded without drift.

use geo::Coord;

/// Scale factor between decimal degrees and fixed-point units.
pub const FIXED_POINT_SCALE: f64 = 10_000_000.0;

/// A longitude/latitude pair in 1e-7 degree units.
///
/// The all-zero pair doubles as the "absent" marker in sector storage, so a
/// node placed exactly at (0, 0) cannot be distinguished from a missing one.
///
/// # Examples
/// ```
/// use osmweave_core::CoordinatePair;
///
/// let pair = CoordinatePair::from_degrees(13.404_954, 52.520_008);
/// assert_eq!(pair.lon, 134_049_540);
/// assert_eq!(pair.lat, 525_200_080);
/// assert!(!pair.is_absent());
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CoordinatePair {
    /// Longitude in 1e-7 degrees.
    pub lon: i32,
    /// Latitude in 1e-7 degrees.
    pub lat: i32,
}

impl CoordinatePair {
    /// Sentinel for "no coordinate stored".
    pub const ABSENT: Self = Self { lon: 0, lat: 0 };

    /// Build a pair directly from fixed-point components.
    #[must_use]
    pub const fn new(lon: i32, lat: i32) -> Self {
        Self { lon, lat }
    }

    /// Convert decimal degrees, rounding half up to the nearest unit.
    #[must_use]
    pub fn from_degrees(lon: f64, lat: f64) -> Self {
        Self {
            lon: degrees_to_fixed(lon),
            lat: degrees_to_fixed(lat),
        }
    }

    /// Whether this is the absent sentinel.
    #[must_use]
    pub const fn is_absent(self) -> bool {
        self.lon == 0 && self.lat == 0
    }

    /// Longitude in decimal degrees.
    #[must_use]
    #[expect(clippy::float_arithmetic, reason = "fixed-point scaling")]
    pub fn lon_degrees(self) -> f64 {
        f64::from(self.lon) / FIXED_POINT_SCALE
    }

    /// Latitude in decimal degrees.
    #[must_use]
    #[expect(clippy::float_arithmetic, reason = "fixed-point scaling")]
    pub fn lat_degrees(self) -> f64 {
        f64::from(self.lat) / FIXED_POINT_SCALE
    }

    /// Convert to a `geo` coordinate with `x = lon` and `y = lat`.
    #[must_use]
    pub fn to_coord(self) -> Coord<f64> {
        Coord {
            x: self.lon_degrees(),
            y: self.lat_degrees(),
        }
    }
}

impl From<CoordinatePair> for Coord<f64> {
    fn from(pair: CoordinatePair) -> Self {
        pair.to_coord()
    }
}

/// Scale a degree value to fixed point.
///
/// Values are expected to be validated beforehand; anything outside the
/// `i32` range saturates.
#[must_use]
#[expect(
    clippy::float_arithmetic,
    clippy::cast_possible_truncation,
    reason = "rounding to fixed point saturates at the i32 range"
)]
pub fn degrees_to_fixed(value: f64) -> i32 {
    (value * FIXED_POINT_SCALE + 0.5).floor() as i32
}

/// Whether `lon`/`lat` lie within WGS84 bounds.
#[must_use]
pub fn is_valid_lon_lat(lon: f64, lat: f64) -> bool {
    (-180.0..=180.0).contains(&lon) && (-90.0..=90.0).contains(&lat)
}

/// Return a coordinate for `lon`/`lat` when both are within WGS84 bounds.
#[must_use]
pub fn validated_coord(lon: f64, lat: f64) -> Option<Coord<f64>> {
    is_valid_lon_lat(lon, lat).then_some(Coord { x: lon, y: lat })
}
