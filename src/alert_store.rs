//! Per-aircraft alert lifecycle. One record per flight key, three mutually
//! exclusive states, transitions driven by poll-cycle observations and
//! operator acknowledgements.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::events::{AlertEvent, AlertSummary};
use crate::snapshot::{AircraftSnapshot, FlightKey};

/// One aircraft's position in the alert lifecycle.
///
/// A key maps to exactly one record, so the states are mutually exclusive
/// by construction. `Landed` is terminal for the session: the approach
/// episode is closed and nothing short of a pruned record reopens it.
#[derive(Debug, Clone)]
pub enum AlertRecord {
    Alerting {
        snapshot: AircraftSnapshot,
        first_seen_at: DateTime<Utc>,
    },
    Acknowledged {
        snapshot: AircraftSnapshot,
        acked_at: DateTime<Utc>,
    },
    Landed {
        snapshot: AircraftSnapshot,
        landed_at: DateTime<Utc>,
    },
}

/// Outcome of an acknowledgement request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    Acknowledged,
    /// Not currently alerting: never seen, already acknowledged, or landed
    UnknownKey,
}

/// Mutex-guarded record map. The poll orchestrator is the only writer
/// during ingestion; acknowledgements from the web edge serialize against
/// it through the same lock, and seed reads take it too so observers get a
/// consistent point-in-time view.
#[derive(Default)]
pub struct AlertStore {
    records: Mutex<HashMap<FlightKey, AlertRecord>>,
}

impl AlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one classified observation through the state machine. Returns
    /// the lifecycle event this observation triggered, if any; emission
    /// happens only on transitions, never on re-observation of a state.
    pub async fn observe(
        &self,
        key: FlightKey,
        snapshot: &AircraftSnapshot,
        approaching: bool,
        landed: bool,
    ) -> Option<AlertEvent> {
        let mut records = self.records.lock().await;

        let event = if landed {
            // Case 1: landing takes precedence over everything else and
            // evicts Alerting/Acknowledged. Re-observing a landed aircraft
            // changes nothing.
            if matches!(records.get(&key), Some(AlertRecord::Landed { .. })) {
                None
            } else {
                records.insert(
                    key.clone(),
                    AlertRecord::Landed {
                        snapshot: snapshot.clone(),
                        landed_at: snapshot.seen_at,
                    },
                );
                info!("{} landed", snapshot.label());
                metrics::counter!("alerts.landed_total").increment(1);
                Some(AlertEvent::landed(key, snapshot))
            }
        } else if approaching {
            match records.get_mut(&key) {
                // Case 2: already alerting. Keep the episode's age, refresh
                // the last known snapshot for a later acknowledgement.
                Some(AlertRecord::Alerting { snapshot: last, .. }) => {
                    *last = snapshot.clone();
                    None
                }
                // Case 3: acknowledged or landed suppresses re-alerting
                Some(_) => None,
                // Case 4: new approach episode
                None => {
                    records.insert(
                        key.clone(),
                        AlertRecord::Alerting {
                            snapshot: snapshot.clone(),
                            first_seen_at: snapshot.seen_at,
                        },
                    );
                    info!("approach alert for {}", snapshot.label());
                    metrics::counter!("alerts.approach_total").increment(1);
                    Some(AlertEvent::approach_alert(key, snapshot))
                }
            }
        } else {
            // Case 5: not qualifying this cycle. An aircraft that drifts out
            // of the gates keeps its record; only landing or an operator
            // closes an episode. Refresh the alerting snapshot so an ack
            // still captures the latest known position.
            if let Some(AlertRecord::Alerting { snapshot: last, .. }) = records.get_mut(&key) {
                *last = snapshot.clone();
            }
            None
        };

        update_gauges(&records);
        event
    }

    /// Operator acknowledgement. Moves an Alerting record to Acknowledged,
    /// capturing the last known snapshot and the time of the ack. Anything
    /// else reports `UnknownKey` back to the requester.
    pub async fn acknowledge(&self, key: &FlightKey) -> AckOutcome {
        let mut records = self.records.lock().await;
        let outcome = match records.remove(key) {
            Some(AlertRecord::Alerting { snapshot, .. }) => {
                info!("alert for {} acknowledged", key);
                records.insert(
                    key.clone(),
                    AlertRecord::Acknowledged {
                        snapshot,
                        acked_at: Utc::now(),
                    },
                );
                metrics::counter!("alerts.acknowledged_total").increment(1);
                AckOutcome::Acknowledged
            }
            Some(other) => {
                debug!("ack for {} ignored, not alerting", key);
                records.insert(key.clone(), other);
                metrics::counter!("alerts.ack_unknown_total").increment(1);
                AckOutcome::UnknownKey
            }
            None => {
                debug!("ack for unknown key {}", key);
                metrics::counter!("alerts.ack_unknown_total").increment(1);
                AckOutcome::UnknownKey
            }
        };
        update_gauges(&records);
        outcome
    }

    /// Currently alerting aircraft, sorted by key for stable output
    pub async fn current_alerts(&self) -> Vec<AlertSummary> {
        let records = self.records.lock().await;
        let mut summaries: Vec<AlertSummary> = records
            .iter()
            .filter_map(|(key, record)| match record {
                AlertRecord::Alerting { snapshot, .. } => {
                    Some(AlertSummary::new(key.clone(), snapshot))
                }
                _ => None,
            })
            .collect();
        summaries.sort_by(|a, b| a.key.as_str().cmp(b.key.as_str()));
        summaries
    }

    /// Currently acknowledged aircraft, sorted by key for stable output
    pub async fn current_acknowledged(&self) -> Vec<AlertSummary> {
        let records = self.records.lock().await;
        let mut summaries: Vec<AlertSummary> = records
            .iter()
            .filter_map(|(key, record)| match record {
                AlertRecord::Acknowledged { snapshot, .. } => {
                    Some(AlertSummary::new(key.clone(), snapshot))
                }
                _ => None,
            })
            .collect();
        summaries.sort_by(|a, b| a.key.as_str().cmp(b.key.as_str()));
        summaries
    }

    /// Point read of one record
    pub async fn get(&self, key: &FlightKey) -> Option<AlertRecord> {
        self.records.lock().await.get(key).cloned()
    }

    /// Drop Landed records older than `retention`. Alerting and Acknowledged
    /// records are never pruned; an open episode belongs to the operator.
    /// Returns the number of records removed.
    pub async fn prune_landed(&self, retention: Duration) -> usize {
        let cutoff = Utc::now() - retention;
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|_, record| match record {
            AlertRecord::Landed { landed_at, .. } => *landed_at > cutoff,
            _ => true,
        });
        let removed = before - records.len();
        if removed > 0 {
            debug!("pruned {} landed records", removed);
            update_gauges(&records);
        }
        removed
    }
}

fn update_gauges(records: &HashMap<FlightKey, AlertRecord>) {
    let mut alerting = 0.0;
    let mut acknowledged = 0.0;
    let mut landed = 0.0;
    for record in records.values() {
        match record {
            AlertRecord::Alerting { .. } => alerting += 1.0,
            AlertRecord::Acknowledged { .. } => acknowledged += 1.0,
            AlertRecord::Landed { .. } => landed += 1.0,
        }
    }
    metrics::gauge!("alerts.alerting").set(alerting);
    metrics::gauge!("alerts.acknowledged").set(acknowledged);
    metrics::gauge!("alerts.landed").set(landed);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_snapshot(hex: &str) -> AircraftSnapshot {
        AircraftSnapshot {
            hex: Some(hex.to_string()),
            callsign: Some("TEST1".to_string()),
            latitude: 47.2,
            longitude: -122.3,
            altitude_ft: Some(4000.0),
            ground_speed_kt: Some(140.0),
            track_deg: Some(340.0),
            vertical_rate_fpm: Some(-700.0),
            seen_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_alert_emitted_once_per_episode() {
        let store = AlertStore::new();
        let snap = test_snapshot("abc123");
        let key = snap.flight_key();

        let first = store.observe(key.clone(), &snap, true, false).await;
        assert!(matches!(first, Some(AlertEvent::ApproachAlert { .. })));

        let second = store.observe(key.clone(), &snap, true, false).await;
        assert!(second.is_none());
        let third = store.observe(key, &snap, true, false).await;
        assert!(third.is_none());
    }

    #[tokio::test]
    async fn test_first_seen_preserved_across_reobservation() {
        let store = AlertStore::new();
        let mut snap = test_snapshot("abc123");
        let key = snap.flight_key();

        store.observe(key.clone(), &snap, true, false).await;
        let first_seen = match store.get(&key).await {
            Some(AlertRecord::Alerting { first_seen_at, .. }) => first_seen_at,
            other => panic!("expected Alerting, got {:?}", other),
        };

        snap.seen_at = snap.seen_at + Duration::seconds(30);
        snap.altitude_ft = Some(3000.0);
        store.observe(key.clone(), &snap, true, false).await;

        match store.get(&key).await {
            Some(AlertRecord::Alerting {
                first_seen_at,
                snapshot,
            }) => {
                assert_eq!(first_seen_at, first_seen);
                // snapshot refreshed even though the episode's age is kept
                assert_eq!(snapshot.altitude_ft, Some(3000.0));
            }
            other => panic!("expected Alerting, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_acknowledge_moves_to_acknowledged() {
        let store = AlertStore::new();
        let snap = test_snapshot("abc123");
        let key = snap.flight_key();

        store.observe(key.clone(), &snap, true, false).await;
        assert_eq!(store.acknowledge(&key).await, AckOutcome::Acknowledged);

        assert!(store.current_alerts().await.is_empty());
        let acked = store.current_acknowledged().await;
        assert_eq!(acked.len(), 1);
        assert_eq!(acked[0].key, key);

        // A second ack finds nothing alerting
        assert_eq!(store.acknowledge(&key).await, AckOutcome::UnknownKey);
    }

    #[tokio::test]
    async fn test_acknowledge_unknown_key() {
        let store = AlertStore::new();
        let key = FlightKey::from("nobody");
        assert_eq!(store.acknowledge(&key).await, AckOutcome::UnknownKey);
    }

    #[tokio::test]
    async fn test_acknowledged_suppresses_realert() {
        let store = AlertStore::new();
        let snap = test_snapshot("abc123");
        let key = snap.flight_key();

        store.observe(key.clone(), &snap, true, false).await;
        store.acknowledge(&key).await;

        for _ in 0..3 {
            let event = store.observe(key.clone(), &snap, true, false).await;
            assert!(event.is_none());
        }
        assert!(matches!(
            store.get(&key).await,
            Some(AlertRecord::Acknowledged { .. })
        ));
    }

    #[tokio::test]
    async fn test_landing_overrides_alerting() {
        let store = AlertStore::new();
        let snap = test_snapshot("abc123");
        let key = snap.flight_key();

        store.observe(key.clone(), &snap, true, false).await;
        let event = store.observe(key.clone(), &snap, false, true).await;
        assert!(matches!(event, Some(AlertEvent::Landed { .. })));

        assert!(store.current_alerts().await.is_empty());
        assert!(store.current_acknowledged().await.is_empty());
        assert!(matches!(
            store.get(&key).await,
            Some(AlertRecord::Landed { .. })
        ));
    }

    #[tokio::test]
    async fn test_landing_overrides_acknowledged() {
        let store = AlertStore::new();
        let snap = test_snapshot("abc123");
        let key = snap.flight_key();

        store.observe(key.clone(), &snap, true, false).await;
        store.acknowledge(&key).await;
        let event = store.observe(key.clone(), &snap, false, true).await;
        assert!(matches!(event, Some(AlertEvent::Landed { .. })));
        assert!(store.current_acknowledged().await.is_empty());
    }

    #[tokio::test]
    async fn test_landed_emitted_once_and_terminal() {
        let store = AlertStore::new();
        let snap = test_snapshot("abc123");
        let key = snap.flight_key();

        let first = store.observe(key.clone(), &snap, false, true).await;
        assert!(first.is_some());
        let again = store.observe(key.clone(), &snap, false, true).await;
        assert!(again.is_none());

        // Landed is terminal: a later qualifying observation stays silent
        let after = store.observe(key.clone(), &snap, true, false).await;
        assert!(after.is_none());
        assert!(matches!(
            store.get(&key).await,
            Some(AlertRecord::Landed { .. })
        ));
    }

    #[tokio::test]
    async fn test_states_are_exclusive() {
        let store = AlertStore::new();
        let snap = test_snapshot("abc123");
        let key = snap.flight_key();

        // Arbitrary sequence; the key must never appear in two listings
        store.observe(key.clone(), &snap, true, false).await;
        store.acknowledge(&key).await;
        store.observe(key.clone(), &snap, true, false).await;
        store.observe(key.clone(), &snap, false, false).await;

        let alerting = store.current_alerts().await;
        let acked = store.current_acknowledged().await;
        assert!(!(alerting.iter().any(|s| s.key == key) && acked.iter().any(|s| s.key == key)));
        assert_eq!(alerting.len() + acked.len(), 1);
    }

    #[tokio::test]
    async fn test_non_qualifying_observation_keeps_record() {
        let store = AlertStore::new();
        let snap = test_snapshot("abc123");
        let key = snap.flight_key();

        store.observe(key.clone(), &snap, true, false).await;
        // Drifted out of the gates without landing
        let event = store.observe(key.clone(), &snap, false, false).await;
        assert!(event.is_none());
        assert_eq!(store.current_alerts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_listings_sorted_by_key() {
        let store = AlertStore::new();
        for hex in ["ccc333", "aaa111", "bbb222"] {
            let snap = test_snapshot(hex);
            store.observe(snap.flight_key(), &snap, true, false).await;
        }
        let alerts = store.current_alerts().await;
        let keys: Vec<&str> = alerts.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, vec!["aaa111", "bbb222", "ccc333"]);
    }

    #[tokio::test]
    async fn test_prune_landed_only() {
        let store = AlertStore::new();
        let landed = test_snapshot("dead01");
        let alerting = test_snapshot("beef02");

        store
            .observe(landed.flight_key(), &landed, false, true)
            .await;
        store
            .observe(alerting.flight_key(), &alerting, true, false)
            .await;

        let removed = store.prune_landed(Duration::zero()).await;
        assert_eq!(removed, 1);
        assert!(store.get(&landed.flight_key()).await.is_none());
        assert!(store.get(&alerting.flight_key()).await.is_some());

        // Fresh landings survive a long retention
        store
            .observe(landed.flight_key(), &landed, false, true)
            .await;
        assert_eq!(store.prune_landed(Duration::hours(6)).await, 0);
    }
}
