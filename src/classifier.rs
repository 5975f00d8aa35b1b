//! Approach classification and landing detection. Pure decision functions
//! over one snapshot plus the airport config; the alert store owns what
//! happens to the verdicts.

use crate::config::{AirportConfig, GateStrategy};
use crate::geo;
use crate::snapshot::AircraftSnapshot;
use tracing::trace;

/// Ground speeds at or below this are taxi/hold noise; the ETA gate cannot
/// produce a meaningful estimate from them.
pub const MIN_ETA_SPEED_KT: f64 = 20.0;

/// An aircraft observed below the landing altitude and speed thresholds is
/// treated as landed. Evaluated before approach classification on every
/// snapshot and takes precedence over it.
pub fn is_landed(snapshot: &AircraftSnapshot, airport: &AirportConfig) -> bool {
    matches!(
        (snapshot.altitude_ft, snapshot.ground_speed_kt),
        (Some(altitude_ft), Some(speed_kt))
            if altitude_ft < airport.landing_altitude_ft && speed_kt < airport.landing_speed_kt
    )
}

/// Decide whether one snapshot looks like an approach to the configured
/// field. Gates are AND-ed in order; every gate fails closed on definitive
/// disqualifying evidence, and only the directional and speed gates fail
/// open on missing data, since track and speed are often absent from older
/// transponders.
pub fn is_approaching(snapshot: &AircraftSnapshot, airport: &AirportConfig) -> bool {
    let distance_km = geo::distance_km(
        snapshot.latitude,
        snapshot.longitude,
        airport.latitude,
        airport.longitude,
    );

    // Gate 1: inside the search radius
    if distance_km > airport.radius_km {
        return false;
    }

    // Gate 2: altitude known and at or below the ceiling. Unknown altitude
    // rejects; never alert on incomplete altitude data.
    let Some(altitude_ft) = snapshot.altitude_ft else {
        trace!("{}: altitude unknown, rejecting", snapshot.label());
        return false;
    };
    if altitude_ft > airport.altitude_ceiling_ft {
        return false;
    }

    // Gate 3: a climbing aircraft is not on approach
    if let Some(rate_fpm) = snapshot.vertical_rate_fpm
        && rate_fpm > 0.0
    {
        trace!(
            "{}: climbing at {:.0} fpm, rejecting",
            snapshot.label(),
            rate_fpm
        );
        return false;
    }

    // Gate 4: directional gate. Unknown track never rejects.
    if let Some(track_deg) = snapshot.track_deg
        && !track_gate_passes(snapshot, airport, distance_km, track_deg)
    {
        return false;
    }

    // Gate 5: coarse ETA from current distance and ground speed
    if let Some(speed_kt) = snapshot.ground_speed_kt
        && speed_kt > MIN_ETA_SPEED_KT
    {
        let eta_minutes = distance_km / (speed_kt * geo::KM_PER_NM / 60.0);
        if eta_minutes > airport.max_eta_minutes {
            trace!(
                "{}: ETA {:.1} min exceeds {:.1} min, rejecting",
                snapshot.label(),
                eta_minutes,
                airport.max_eta_minutes
            );
            return false;
        }
    }

    true
}

fn track_gate_passes(
    snapshot: &AircraftSnapshot,
    airport: &AirportConfig,
    distance_km: f64,
    track_deg: f64,
) -> bool {
    match airport.gate_strategy {
        GateStrategy::BearingToDestination => {
            let bearing_deg = geo::bearing_deg(
                snapshot.latitude,
                snapshot.longitude,
                airport.latitude,
                airport.longitude,
            );
            let deviation = geo::angular_difference(track_deg, bearing_deg);
            if deviation > airport.max_bearing_deviation_deg {
                trace!(
                    "{}: track {:.0} deviates {:.0} deg from field bearing {:.0}, rejecting",
                    snapshot.label(),
                    track_deg,
                    deviation,
                    bearing_deg
                );
                return false;
            }
            true
        }
        GateStrategy::RunwayAlignment => {
            // Only meaningful close in. Farther out the aircraft may still
            // be holding or vectoring and its instantaneous track does not
            // match any runway yet.
            if distance_km > airport.close_in_radius_km {
                return true;
            }
            let aligned = airport
                .runway_headings_deg
                .iter()
                .any(|heading| geo::angular_difference(track_deg, *heading) <= airport.runway_tolerance_deg);
            if !aligned {
                trace!(
                    "{}: track {:.0} aligns with no runway at {:.1} km, rejecting",
                    snapshot.label(),
                    track_deg,
                    distance_km
                );
            }
            aligned
        }
    }
}
