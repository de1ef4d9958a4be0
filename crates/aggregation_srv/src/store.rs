//! In-memory aggregation state.
//!
//! One mutex guards the whole data model: station buckets, producer
//! liveness, and the most-recent pointer. The request worker takes it
//! for the duration of a handler, the checkpointer takes it just long
//! enough to clone a snapshot, so uploads and queries always observe a
//! consistent state.

use std::collections::HashMap;

use crate::Checkpoint;

/// A JSON object body, fields preserved verbatim.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// Checkpoint framing key carrying an observation's Lamport timestamp.
const FRAME_TIMESTAMP: &str = "timestamp";

/// Checkpoint framing key carrying an observation's producer id.
const FRAME_SERVER_ID: &str = "ServerId";

/// One stored weather observation. Immutable once stored; observations
/// are never evicted, only hidden by the liveness rule.
#[derive(Debug, Clone)]
pub struct Observation {
    /// The uploaded JSON body, exactly as received.
    pub body: JsonMap,

    /// The Lamport timestamp the upload carried.
    pub timestamp: i64,

    /// The id of the producer that uploaded it.
    pub producer: String,
}

#[derive(Debug, Clone)]
struct Inner {
    /// Station id to observations, most recent Lamport timestamp first.
    buckets: HashMap<String, Vec<Observation>>,

    /// Producer id to the wall-clock millis of its last upload.
    liveness: HashMap<String, i64>,

    /// The station named by the upload with the largest Lamport
    /// timestamp seen so far. Ties keep the earlier arrival.
    most_recent_station: Option<String>,

    /// The largest Lamport timestamp seen on any upload, `-1` until the
    /// first one arrives.
    latest_put_timestamp: i64,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            buckets: HashMap::new(),
            liveness: HashMap::new(),
            most_recent_station: None,
            latest_put_timestamp: -1,
        }
    }
}

/// The aggregation server data model.
#[derive(Debug)]
pub struct Store {
    liveness_window_ms: i64,
    inner: std::sync::Mutex<Inner>,
}

impl Store {
    /// Construct an empty store. Producers silent for longer than
    /// `liveness_window` have their observations hidden from queries.
    pub fn new(liveness_window: std::time::Duration) -> Self {
        Self {
            liveness_window_ms: liveness_window.as_millis() as i64,
            inner: std::sync::Mutex::new(Inner::default()),
        }
    }

    /// Store an upload: refresh the producer's liveness, insert the
    /// observation into its station bucket, and advance the most-recent
    /// pointer when the timestamp is strictly newer than anything seen.
    /// One atomic step under the store mutex.
    pub fn insert(
        &self,
        station_id: &str,
        body: JsonMap,
        timestamp: i64,
        producer: &str,
        now_ms: i64,
    ) {
        let mut inner = self.inner.lock().unwrap();

        inner.liveness.insert(producer.to_string(), now_ms);

        let bucket =
            inner.buckets.entry(station_id.to_string()).or_default();
        // descending by timestamp; on a tie the later insert takes the
        // head slot
        let at = bucket
            .iter()
            .position(|o| o.timestamp <= timestamp)
            .unwrap_or(bucket.len());
        bucket.insert(
            at,
            Observation {
                body,
                timestamp,
                producer: producer.to_string(),
            },
        );

        if timestamp > inner.latest_put_timestamp {
            inner.latest_put_timestamp = timestamp;
            inner.most_recent_station = Some(station_id.to_string());
        }
    }

    /// Answer a query: the newest observation for the station that the
    /// caller is allowed to see.
    ///
    /// A missing or empty station id falls back to the station of the
    /// most recent upload. An observation is visible only when its
    /// timestamp is at or before the Lamport value the caller
    /// presented, and its producer has uploaded within the liveness
    /// window.
    pub fn select(
        &self,
        station_id: Option<&str>,
        lamport: i64,
        now_ms: i64,
    ) -> Option<JsonMap> {
        let inner = self.inner.lock().unwrap();

        let station = match station_id {
            Some(s) if !s.is_empty() => s,
            _ => inner.most_recent_station.as_deref()?,
        };

        inner.buckets.get(station)?.iter().find_map(|o| {
            let visible = o.timestamp <= lamport
                && inner.liveness.get(&o.producer).is_some_and(|last| {
                    now_ms - last <= self.liveness_window_ms
                });
            visible.then(|| o.body.clone())
        })
    }

    /// Clone the full state into its serialized checkpoint shape,
    /// stamping the given Lamport clock value.
    pub fn snapshot(&self, lamport_time: i64) -> Checkpoint {
        let inner = self.inner.lock().unwrap().clone();

        let weather_data_map = inner
            .buckets
            .into_iter()
            .map(|(station, bucket)| {
                let entries = bucket
                    .into_iter()
                    .map(|o| {
                        let mut fields = o.body;
                        fields.insert(
                            FRAME_TIMESTAMP.into(),
                            o.timestamp.into(),
                        );
                        fields.insert(
                            FRAME_SERVER_ID.into(),
                            o.producer.into(),
                        );
                        fields
                    })
                    .collect();
                (station, entries)
            })
            .collect();

        Checkpoint {
            weather_data_map,
            server_timestamp_map: inner.liveness,
            most_recent_station_id: inner.most_recent_station,
            latest_put_timestamp: inner.latest_put_timestamp,
            lamport_time,
        }
    }

    /// Replace the full state from a loaded checkpoint and return the
    /// stored Lamport clock value.
    ///
    /// Buckets are re-sorted on the way in and every referenced
    /// producer is guaranteed a liveness entry again, so the ordering
    /// and bookkeeping invariants hold before any request is served.
    /// Entries that lost their framing keys are dropped.
    pub fn restore(&self, checkpoint: Checkpoint) -> i64 {
        let mut liveness = checkpoint.server_timestamp_map;

        let buckets = checkpoint
            .weather_data_map
            .into_iter()
            .map(|(station, entries)| {
                let mut bucket = entries
                    .into_iter()
                    .filter_map(|mut fields| {
                        let timestamp = fields
                            .remove(FRAME_TIMESTAMP)?
                            .as_i64()?;
                        let producer = match fields.remove(FRAME_SERVER_ID) {
                            Some(serde_json::Value::String(p)) => p,
                            _ => return None,
                        };
                        liveness.entry(producer.clone()).or_insert(0);
                        Some(Observation {
                            body: fields,
                            timestamp,
                            producer,
                        })
                    })
                    .collect::<Vec<_>>();
                // stable, so the written head order survives ties
                bucket.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
                (station, bucket)
            })
            .collect();

        *self.inner.lock().unwrap() = Inner {
            buckets,
            liveness,
            most_recent_station: checkpoint
                .most_recent_station_id
                .filter(|s| !s.is_empty()),
            latest_put_timestamp: checkpoint.latest_put_timestamp,
        };

        checkpoint.lamport_time
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn body(json: &str) -> JsonMap {
        serde_json::from_str(json).unwrap()
    }

    fn store() -> Store {
        Store::new(std::time::Duration::from_secs(30))
    }

    #[test]
    fn bucket_head_has_max_timestamp() {
        let s = store();
        s.insert("A", body(r#"{"id":"A","v":1}"#), 3, "P1", 0);
        s.insert("A", body(r#"{"id":"A","v":2}"#), 9, "P1", 0);
        s.insert("A", body(r#"{"id":"A","v":3}"#), 5, "P1", 0);

        let got = s.select(Some("A"), 100, 0).unwrap();
        assert_eq!(2, got["v"]);
    }

    #[test]
    fn tie_later_insert_wins_head() {
        let s = store();
        s.insert("A", body(r#"{"id":"A","v":"old"}"#), 5, "P1", 0);
        s.insert("A", body(r#"{"id":"A","v":"new"}"#), 5, "P2", 0);

        let got = s.select(Some("A"), 100, 0).unwrap();
        assert_eq!("new", got["v"]);
    }

    #[test]
    fn visibility_is_bounded_by_presented_clock() {
        let s = store();
        s.insert("A", body(r#"{"id":"A","v":1}"#), 2, "P1", 0);
        s.insert("A", body(r#"{"id":"A","v":2}"#), 8, "P1", 0);

        // clock 5 must not see the timestamp-8 observation
        let got = s.select(Some("A"), 5, 0).unwrap();
        assert_eq!(1, got["v"]);

        // clock 1 sees nothing at all
        assert!(s.select(Some("A"), 1, 0).is_none());
    }

    #[test]
    fn silent_producer_is_hidden_until_it_pushes_again() {
        let s = store();
        s.insert("A", body(r#"{"id":"A","v":1}"#), 1, "P1", 1_000);

        // within the window
        assert!(s.select(Some("A"), 10, 20_000).is_some());

        // 31s after the last upload
        assert!(s.select(Some("A"), 10, 32_000).is_none());

        // a new upload re-arms liveness and the old observation
        // becomes visible again
        s.insert("A", body(r#"{"id":"A","v":2}"#), 2, "P1", 40_000);
        let got = s.select(Some("A"), 1, 40_001).unwrap();
        assert_eq!(1, got["v"]);
    }

    #[test]
    fn missing_station_defaults_to_most_recent() {
        let s = store();
        s.insert("A", body(r#"{"id":"A","v":1}"#), 1, "P1", 0);
        s.insert("B", body(r#"{"id":"B","v":2}"#), 2, "P1", 0);

        let got = s.select(None, 100, 0).unwrap();
        assert_eq!("B", got["id"]);

        // empty station id behaves the same as absent
        let got = s.select(Some(""), 100, 0).unwrap();
        assert_eq!("B", got["id"]);
    }

    #[test]
    fn most_recent_keeps_earlier_arrival_on_tie() {
        let s = store();
        s.insert("A", body(r#"{"id":"A"}"#), 7, "P1", 0);
        s.insert("B", body(r#"{"id":"B"}"#), 7, "P2", 0);

        let got = s.select(None, 100, 0).unwrap();
        assert_eq!("A", got["id"]);
    }

    #[test]
    fn empty_store_selects_nothing() {
        assert!(store().select(None, 100, 0).is_none());
        assert!(store().select(Some("A"), 100, 0).is_none());
    }

    #[test]
    fn snapshot_restore_round_trip() {
        let s = store();
        s.insert("A", body(r#"{"id":"A","temp":25}"#), 5, "P1", 1_000);
        s.insert("A", body(r#"{"id":"A","temp":26}"#), 9, "P2", 2_000);
        s.insert("B", body(r#"{"id":"B","temp":-3}"#), 7, "P1", 3_000);

        let checkpoint = s.snapshot(42);
        assert_eq!(42, checkpoint.lamport_time);
        assert_eq!(9, checkpoint.latest_put_timestamp);
        assert_eq!(
            Some("A"),
            checkpoint.most_recent_station_id.as_deref(),
        );

        let restored = store();
        assert_eq!(42, restored.restore(checkpoint));

        // bodies round-trip without the framing keys leaking in
        let got = restored.select(Some("A"), 100, 3_000).unwrap();
        assert_eq!(body(r#"{"id":"A","temp":26}"#), got);
        let got = restored.select(Some("B"), 100, 3_000).unwrap();
        assert_eq!(body(r#"{"id":"B","temp":-3}"#), got);

        // and the snapshot of the restored store matches
        let again = restored.snapshot(42);
        let reference = s.snapshot(42);
        assert_eq!(reference.weather_data_map, again.weather_data_map);
        assert_eq!(
            reference.most_recent_station_id,
            again.most_recent_station_id,
        );
        assert_eq!(
            reference.latest_put_timestamp,
            again.latest_put_timestamp,
        );
    }

    #[test]
    fn restore_resorts_buckets() {
        let checkpoint: Checkpoint = serde_json::from_str(
            r#"{
                "weatherDataMap": {
                    "A": [
                        {"id":"A","v":1,"timestamp":2,"ServerId":"P1"},
                        {"id":"A","v":2,"timestamp":8,"ServerId":"P1"}
                    ]
                },
                "serverTimestampMap": {},
                "mostRecentStationId": "A",
                "latestPutTimestamp": 8,
                "lamportTime": 9
            }"#,
        )
        .unwrap();

        let s = store();
        s.restore(checkpoint);

        // liveness for P1 was re-created (at epoch 0, so expired until
        // the producer pushes again)
        assert!(s.select(Some("A"), 100, 60_000).is_none());

        let got = s.select(Some("A"), 100, 10_000).unwrap();
        assert_eq!(2, got["v"]);
    }
}
