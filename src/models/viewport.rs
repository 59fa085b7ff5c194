//! Map viewport in projected (Web Mercator, EPSG:3857) coordinates.

use std::f64::consts::FRAC_PI_4;

use super::Coordinate;

/// WGS84 semi-major axis used by the spherical Mercator projection
const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Latitude limit of the square Mercator world
const MAX_LAT: f64 = 85.051_128_779_806_59;

/// Projected point in metres
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapPoint {
    pub x: f64,
    pub y: f64,
}

impl MapPoint {
    pub fn project(coordinate: Coordinate) -> Self {
        let lat = coordinate.lat.clamp(-MAX_LAT, MAX_LAT).to_radians();
        Self {
            x: EARTH_RADIUS_M * coordinate.lon.to_radians(),
            y: EARTH_RADIUS_M * (FRAC_PI_4 + lat / 2.0).tan().ln(),
        }
    }

    pub fn unproject(&self) -> Coordinate {
        let lon = (self.x / EARTH_RADIUS_M).to_degrees();
        let lat = (2.0 * (self.y / EARTH_RADIUS_M).exp().atan() - 2.0 * FRAC_PI_4).to_degrees();
        Coordinate {
            lat: lat.clamp(-90.0, 90.0),
            lon: lon.clamp(-180.0, 180.0),
        }
    }
}

/// Axis-aligned rectangle of projected points
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapRect {
    pub min: MapPoint,
    pub max: MapPoint,
}

impl MapRect {
    /// Build from any two opposite corners
    pub fn from_corners(a: MapPoint, b: MapPoint) -> Self {
        Self {
            min: MapPoint {
                x: a.x.min(b.x),
                y: a.y.min(b.y),
            },
            max: MapPoint {
                x: a.x.max(b.x),
                y: a.y.max(b.y),
            },
        }
    }

    pub fn contains(&self, point: MapPoint) -> bool {
        (self.min.x..=self.max.x).contains(&point.x) && (self.min.y..=self.max.y).contains(&point.y)
    }

    pub fn center(&self) -> MapPoint {
        MapPoint {
            x: (self.min.x + self.max.x) / 2.0,
            y: (self.min.y + self.max.y) / 2.0,
        }
    }
}

/// Visible region of the map
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    rect: MapRect,
}

impl Viewport {
    pub fn new(rect: MapRect) -> Self {
        Self { rect }
    }

    /// Region described by a center and a lat/lon span in degrees
    pub fn from_region(center: Coordinate, lat_delta: f64, lon_delta: f64) -> Self {
        let half_lat = lat_delta.abs() / 2.0;
        let half_lon = lon_delta.abs() / 2.0;
        Self::from_bbox(
            center.lon - half_lon,
            center.lat - half_lat,
            center.lon + half_lon,
            center.lat + half_lat,
        )
    }

    /// Region described by a geographic bounding box.
    ///
    /// Boxes crossing the antimeridian are not supported: the corners are
    /// normalised, so `min_lon > max_lon` describes the complementary span
    /// through longitude 0 rather than the one through 180.
    pub fn from_bbox(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        let corner = |lat: f64, lon: f64| {
            MapPoint::project(Coordinate {
                lat: lat.clamp(-MAX_LAT, MAX_LAT),
                lon: lon.clamp(-180.0, 180.0),
            })
        };
        Self {
            rect: MapRect::from_corners(corner(min_lat, min_lon), corner(max_lat, max_lon)),
        }
    }

    pub fn rect(&self) -> &MapRect {
        &self.rect
    }

    pub fn center(&self) -> Coordinate {
        self.rect.center().unproject()
    }

    /// Geographic bounds as `[minLon, minLat, maxLon, maxLat]`
    pub fn bbox(&self) -> [f64; 4] {
        let min = self.rect.min.unproject();
        let max = self.rect.max.unproject();
        [min.lon, min.lat, max.lon, max.lat]
    }

    pub fn contains(&self, coordinate: Coordinate) -> bool {
        self.rect.contains(MapPoint::project(coordinate))
    }
}
