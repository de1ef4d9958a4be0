use weathervane_aggregation_srv::{AggregationSrv, Config};

use weathervane_aggregation_client::*;

/// Spawn a server whose checkpoint file lives in a private temp dir.
fn test_srv() -> (AggregationSrv, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::testing();
    config.checkpoint_path = dir.path().join("data.json");
    (AggregationSrv::new(config).unwrap(), dir)
}

#[test]
fn put_then_get_round_trip() {
    let (s, _dir) = test_srv();

    let observation =
        text_to_json("id: IDS60901\nair_temp: 13.3\nwind_dir: S\n").unwrap();

    blocking_put(s.listen_addr(), "producer-1", &observation).unwrap();

    let got =
        blocking_get(s.listen_addr(), "client-1", Some("IDS60901")).unwrap();
    assert_eq!(observation, got);

    // querying with no station answers for the most recent upload
    let got = blocking_get(s.listen_addr(), "client-1", None).unwrap();
    assert_eq!(observation, got);
}

#[test]
fn get_unknown_station_is_rejected() {
    let (s, _dir) = test_srv();

    let err = blocking_get(s.listen_addr(), "client-1", Some("NOPE"))
        .unwrap_err();
    assert!(err.to_string().contains("404 Data Not Found"));
}

#[test]
fn put_without_station_is_rejected() {
    let (s, _dir) = test_srv();

    let observation = text_to_json("air_temp: 13.3\n").unwrap();
    let err = blocking_put(s.listen_addr(), "producer-1", &observation)
        .unwrap_err();
    assert!(err.to_string().contains("400 Null StationId"));
}

#[test]
fn retry_gives_up_after_the_configured_attempts() {
    // nothing is listening here
    let addr = {
        let (s, _dir) = test_srv();
        let addr = s.listen_addr();
        drop(s);
        addr
    };

    let observation = text_to_json("id: A\n").unwrap();
    let start = std::time::Instant::now();
    let err = blocking_put_with_retry(
        addr,
        "producer-1",
        &observation,
        3,
        std::time::Duration::from_millis(10),
    )
    .unwrap_err();

    assert!(matches!(err, weathervane_api::WvError::Io(_)));
    // two inter-attempt waits happened
    assert!(start.elapsed() >= std::time::Duration::from_millis(20));
}

#[test]
fn generated_participant_ids_are_unique() {
    assert_ne!(random_participant_id(), random_participant_id());
    assert_eq!(32, random_participant_id().len());
}
