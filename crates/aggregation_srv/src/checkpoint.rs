//! Durable state checkpointing.
//!
//! The whole server state is rewritten as one JSON document on a fixed
//! interval. Loading is forgiving (a missing or corrupt file just means
//! starting empty), writing is atomic: the document goes to a temp file
//! in the target directory first and is renamed over the old one, so a
//! crash mid-write can never leave a torn checkpoint behind.

use std::collections::HashMap;

use crate::JsonMap;

/// The serialized shape of the full aggregation server state.
///
/// Observation entries carry their Lamport timestamp and producer id
/// inline as `"timestamp"` / `"ServerId"` fields; arrays are written
/// most recent first.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// Station id to its observation entries, newest first.
    pub weather_data_map: HashMap<String, Vec<JsonMap>>,

    /// Producer id to the wall-clock millis of its last upload.
    pub server_timestamp_map: HashMap<String, i64>,

    /// The station of the most recent upload, if any upload happened.
    #[serde(default)]
    pub most_recent_station_id: Option<String>,

    /// The largest Lamport timestamp seen on any upload, `-1` if none.
    pub latest_put_timestamp: i64,

    /// The Lamport clock value at snapshot time.
    pub lamport_time: i64,
}

/// Load a checkpoint from disk. A missing or unreadable file is logged
/// and yields `None` so the server continues with empty state; startup
/// never aborts over a checkpoint.
pub fn load(path: &std::path::Path) -> Option<Checkpoint> {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(?path, "no checkpoint file, starting empty");
            return None;
        }
        Err(err) => {
            tracing::warn!(?path, ?err, "checkpoint unreadable, starting empty");
            return None;
        }
    };

    match serde_json::from_slice(&raw) {
        Ok(checkpoint) => Some(checkpoint),
        Err(err) => {
            tracing::warn!(?path, ?err, "checkpoint corrupt, starting empty");
            None
        }
    }
}

/// Atomically replace the checkpoint file with the given state.
pub fn save(
    path: &std::path::Path,
    checkpoint: &Checkpoint,
) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => std::path::Path::new("."),
    };

    let tmp = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer(&tmp, checkpoint)?;
    tmp.as_file().sync_data()?;
    tmp.persist(path).map_err(|err| err.error)?;

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample() -> Checkpoint {
        serde_json::from_str(
            r#"{
                "weatherDataMap": {
                    "IDS60901": [
                        {"id":"IDS60901","temp":25,"timestamp":5,"ServerId":"S1"}
                    ]
                },
                "serverTimestampMap": {"S1": 1700000000000},
                "mostRecentStationId": "IDS60901",
                "latestPutTimestamp": 5,
                "lamportTime": 6
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn save_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");

        let checkpoint = sample();
        save(&path, &checkpoint).unwrap();

        let loaded = load(&path).unwrap();
        assert_eq!(checkpoint.weather_data_map, loaded.weather_data_map);
        assert_eq!(
            checkpoint.server_timestamp_map,
            loaded.server_timestamp_map,
        );
        assert_eq!(
            checkpoint.most_recent_station_id,
            loaded.most_recent_station_id,
        );
        assert_eq!(
            checkpoint.latest_put_timestamp,
            loaded.latest_put_timestamp,
        );
        assert_eq!(checkpoint.lamport_time, loaded.lamport_time);
    }

    #[test]
    fn wire_key_names_are_stable() {
        let json = serde_json::to_value(sample()).unwrap();
        for key in [
            "weatherDataMap",
            "serverTimestampMap",
            "mostRecentStationId",
            "latestPutTimestamp",
            "lamportTime",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert_eq!(
            "S1",
            json["weatherDataMap"]["IDS60901"][0]["ServerId"],
        );
        assert_eq!(5, json["weatherDataMap"]["IDS60901"][0]["timestamp"]);
    }

    #[test]
    fn missing_file_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(&dir.path().join("nope.json")).is_none());
    }

    #[test]
    fn corrupt_file_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(&path, b"{ this is not json").unwrap();
        assert!(load(&path).is_none());
    }

    #[test]
    fn missing_most_recent_station_is_tolerated() {
        let loaded: Checkpoint = serde_json::from_str(
            r#"{
                "weatherDataMap": {},
                "serverTimestampMap": {},
                "latestPutTimestamp": -1,
                "lamportTime": 0
            }"#,
        )
        .unwrap();
        assert!(loaded.most_recent_station_id.is_none());
    }
}
