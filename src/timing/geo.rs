use crate::track::GeoPoint;

/// Mean Earth radius (m)
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters between two lat/lon pairs in degrees
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).max(0.0).sqrt());
    EARTH_RADIUS_M * c
}

pub fn distance_to(lat: f64, lon: f64, target: &GeoPoint) -> f64 {
    haversine_distance(lat, lon, target.lat, target.lon)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_same_point_is_zero() {
        assert_eq!(haversine_distance(45.0, 9.0, 45.0, 9.0), 0.0);
    }

    #[test]
    fn test_one_degree_of_latitude() {
        let d = haversine_distance(0.0, 0.0, 1.0, 0.0);
        assert!((d - 111_195.0).abs() < 1.0, "got {}", d);
    }

    #[test]
    fn test_small_offsets_are_meter_scale() {
        // ~1.11m north
        let d = haversine_distance(45.0, 9.0, 45.00001, 9.0);
        assert!((d - 1.112).abs() < 0.01, "got {}", d);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_distance_is_symmetric(
            lat1 in -80.0f64..80.0,
            lon1 in -179.0f64..179.0,
            lat2 in -80.0f64..80.0,
            lon2 in -179.0f64..179.0,
        ) {
            let ab = haversine_distance(lat1, lon1, lat2, lon2);
            let ba = haversine_distance(lat2, lon2, lat1, lon1);
            prop_assert!(ab >= 0.0);
            prop_assert!((ab - ba).abs() < 1e-6);
        }
    }
}
