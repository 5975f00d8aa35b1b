//! Great-circle geometry and unit conversions shared by the classifier and
//! the upstream adapters. Pure functions, no state.

/// Mean Earth radius in kilometers (IUGG mean radius)
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Meters/second to knots
pub const MS_TO_KNOTS: f64 = 1.943_844_492_4;

/// Meters to feet
pub const METERS_TO_FEET: f64 = 3.280_839_895;

/// Meters/second to feet/minute
pub const MS_TO_FPM: f64 = 196.850_393_7;

/// Kilometers per nautical mile
pub const KM_PER_NM: f64 = 1.852;

/// Calculate the great-circle distance between two points using the
/// Haversine formula. Returns distance in kilometers.
pub fn distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Initial great-circle bearing from (lat1, lon1) toward (lat2, lon2)
/// Returns degrees true in [0, 360)
pub fn bearing_deg(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let y = delta_lon.sin() * lat2_rad.cos();
    let x = lat1_rad.cos() * lat2_rad.sin() - lat1_rad.sin() * lat2_rad.cos() * delta_lon.cos();

    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

/// Calculate the angular difference between two headings in degrees
/// Returns the smallest angle between the two headings (0-180 degrees)
pub fn angular_difference(angle1: f64, angle2: f64) -> f64 {
    let diff = (angle1 - angle2).abs() % 360.0;
    if diff > 180.0 { 360.0 - diff } else { diff }
}

/// Latitude/longitude rectangle enclosing a radius circle around a point.
/// Used to build upstream area queries; slightly oversized is fine since the
/// classifier re-checks the true great-circle distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

/// Derive the bounding box for `radius_km` around a reference point.
/// One degree of latitude spans ~110.574 km; longitude degrees shrink with
/// cos(latitude). Clamped to valid coordinate ranges near the poles.
pub fn bounding_box(lat: f64, lon: f64, radius_km: f64) -> BoundingBox {
    const KM_PER_DEG_LAT: f64 = 110.574;
    const KM_PER_DEG_LON_EQUATOR: f64 = 111.320;

    let dlat = radius_km / KM_PER_DEG_LAT;
    let cos_lat = lat.to_radians().cos().max(0.01);
    let dlon = radius_km / (KM_PER_DEG_LON_EQUATOR * cos_lat);

    BoundingBox {
        lat_min: (lat - dlat).max(-90.0),
        lat_max: (lat + dlat).min(90.0),
        lon_min: (lon - dlon).max(-180.0),
        lon_max: (lon + dlon).min(180.0),
    }
}
