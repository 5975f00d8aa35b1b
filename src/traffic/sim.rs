//! Synthetic traffic generator for demo and testing without a live
//! upstream. Seedable, so a given seed replays the same traffic. Swappable
//! with the real adapters behind [`TrafficSource`].

use chrono::Utc;
use rand::{RngExt, SeedableRng, rngs::StdRng};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::AirportConfig;
use crate::geo;
use crate::snapshot::AircraftSnapshot;
use crate::traffic::{FetchError, TrafficSource};

/// Identity pool size. Keys repeat across fetches so a simulated aircraft
/// keeps its alert lifecycle from cycle to cycle.
const SIM_FLEET: u32 = 6;

/// Glide slope approximation: a 3 degree descent is about 172 ft of
/// altitude per kilometer of distance to the threshold.
const FT_PER_KM_ON_SLOPE: f64 = 172.0;

pub struct SimSource {
    airport: AirportConfig,
    rng: Mutex<StdRng>,
}

impl SimSource {
    pub fn new(airport: &AirportConfig, seed: u64) -> Self {
        debug!("simulation source seeded with {}", seed);
        Self {
            airport: airport.clone(),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

#[async_trait::async_trait]
impl TrafficSource for SimSource {
    async fn fetch(&self) -> Result<Vec<AircraftSnapshot>, FetchError> {
        let mut rng = self.rng.lock().await;
        let count = rng.random_range(1..=4);
        let batch = (0..count)
            .map(|_| synth_snapshot(&mut rng, &self.airport))
            .collect();
        Ok(batch)
    }

    fn name(&self) -> &str {
        "sim"
    }
}

/// One synthetic aircraft on plausible approach geometry: inside the
/// radius, descending on roughly a 3 degree slope, tracking toward the
/// field (or down a runway heading when close in). Roughly one in ten is
/// painted just above the surface to exercise the landing path.
fn synth_snapshot(rng: &mut StdRng, airport: &AirportConfig) -> AircraftSnapshot {
    let id = rng.random_range(0..SIM_FLEET);
    let bearing_from_field: f64 = rng.random_range(0.0..360.0);
    let landing = rng.random_bool(0.1);

    let distance_km = if landing {
        rng.random_range(0.5..3.0)
    } else {
        rng.random_range(5.0..airport.radius_km.max(6.0))
    };

    let lat = airport.latitude
        + distance_km * bearing_from_field.to_radians().cos() / 110.574;
    let lon = airport.longitude
        + distance_km * bearing_from_field.to_radians().sin()
            / (111.320 * airport.latitude.to_radians().cos());

    let track_deg = if !landing
        && distance_km <= airport.close_in_radius_km
        && !airport.runway_headings_deg.is_empty()
    {
        // Established on final: fly a runway heading
        let idx = rng.random_range(0..airport.runway_headings_deg.len());
        airport.runway_headings_deg[idx]
    } else {
        // Inbound: point at the field with a little wobble
        let to_field = geo::bearing_deg(lat, lon, airport.latitude, airport.longitude);
        (to_field + rng.random_range(-10.0..10.0)).rem_euclid(360.0)
    };

    let (altitude_ft, ground_speed_kt, vertical_rate_fpm) = if landing {
        (
            rng.random_range(20.0..150.0),
            rng.random_range(15.0..45.0),
            rng.random_range(-300.0..-50.0),
        )
    } else {
        let on_slope = distance_km * FT_PER_KM_ON_SLOPE + rng.random_range(-400.0..400.0);
        (
            on_slope.max(300.0),
            rng.random_range(120.0..180.0),
            rng.random_range(-900.0..-500.0),
        )
    };

    AircraftSnapshot {
        hex: Some(format!("sim{:03x}", id)),
        callsign: Some(format!("SIM{:03}", id)),
        latitude: lat,
        longitude: lon,
        altitude_ft: Some(altitude_ft),
        ground_speed_kt: Some(ground_speed_kt),
        track_deg: Some(track_deg),
        vertical_rate_fpm: Some(vertical_rate_fpm),
        seen_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_batches_stay_inside_radius() {
        let airport = AirportConfig::default();
        let source = SimSource::new(&airport, 7);

        for _ in 0..20 {
            let batch = source.fetch().await.unwrap();
            assert!(!batch.is_empty() && batch.len() <= 4);
            for snap in &batch {
                let distance = geo::distance_km(
                    snap.latitude,
                    snap.longitude,
                    airport.latitude,
                    airport.longitude,
                );
                assert!(
                    distance <= airport.radius_km + 1.0,
                    "aircraft at {:.1} km",
                    distance
                );
                assert!(snap.altitude_ft.is_some());
                assert!(snap.vertical_rate_fpm.unwrap() < 0.0);
            }
        }
    }

    #[tokio::test]
    async fn test_tracks_point_at_field_or_down_a_runway() {
        let airport = AirportConfig::default();
        let source = SimSource::new(&airport, 11);

        for _ in 0..20 {
            for snap in source.fetch().await.unwrap() {
                let track = snap.track_deg.unwrap();
                let to_field = geo::bearing_deg(
                    snap.latitude,
                    snap.longitude,
                    airport.latitude,
                    airport.longitude,
                );
                let toward_field = geo::angular_difference(track, to_field) <= 15.0;
                let down_a_runway = airport
                    .runway_headings_deg
                    .iter()
                    .any(|h| geo::angular_difference(track, *h) < 0.01);
                assert!(
                    toward_field || down_a_runway,
                    "track {:.0} neither inbound ({:.0}) nor a runway heading",
                    track,
                    to_field
                );
            }
        }
    }

    #[tokio::test]
    async fn test_same_seed_replays_same_traffic() {
        let airport = AirportConfig::default();
        let a = SimSource::new(&airport, 42);
        let b = SimSource::new(&airport, 42);

        for _ in 0..5 {
            let batch_a = a.fetch().await.unwrap();
            let batch_b = b.fetch().await.unwrap();
            assert_eq!(batch_a.len(), batch_b.len());
            for (x, y) in batch_a.iter().zip(batch_b.iter()) {
                assert_eq!(x.hex, y.hex);
                assert_eq!(x.latitude, y.latitude);
                assert_eq!(x.longitude, y.longitude);
                assert_eq!(x.altitude_ft, y.altitude_ft);
            }
        }
    }

    #[tokio::test]
    async fn test_different_seeds_differ() {
        let airport = AirportConfig::default();
        let a = SimSource::new(&airport, 1);
        let b = SimSource::new(&airport, 2);

        let batch_a = a.fetch().await.unwrap();
        let batch_b = b.fetch().await.unwrap();
        let same = batch_a.len() == batch_b.len()
            && batch_a
                .iter()
                .zip(batch_b.iter())
                .all(|(x, y)| x.latitude == y.latitude && x.longitude == y.longitude);
        assert!(!same);
    }
}
