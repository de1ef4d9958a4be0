//! Client apis for the weathervane aggregation server.
//!
//! Two callers live here: the content producer, which uploads weather
//! observations read from flat text files, and the query client, which
//! fetches the most recent observation at a station. Both follow the
//! same wire contract: read the server's advertised Lamport value from
//! the handshake line, stamp it on the request, read the one response
//! line.

#![deny(missing_docs)]

use std::io::{BufRead, Write};

use weathervane_api::*;

mod report;
pub use report::*;

/// A JSON observation object.
pub type Observation = serde_json::Map<String, serde_json::Value>;

/// Generate a random stable participant id for a producer or query
/// client that was not configured with one.
pub fn random_participant_id() -> String {
    use rand::RngCore;
    let mut bytes = [0; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// One full protocol exchange: connect, read the advertised Lamport
/// value, send the request stamped with it, read the single response
/// line.
fn blocking_exchange(
    addr: impl std::net::ToSocketAddrs,
    build: impl FnOnce(i64) -> Request,
) -> WvResult<String> {
    let mut stream = std::net::TcpStream::connect(addr)?;
    let mut reader = std::io::BufReader::new(stream.try_clone()?);

    let mut handshake = String::new();
    reader.read_line(&mut handshake)?;
    let lamport = handshake
        .trim()
        .parse()
        .map_err(|_| WvError::codec("bad handshake line"))?;

    stream.write_all(&build(lamport).encode())?;
    stream.flush()?;

    let mut response = String::new();
    reader.read_line(&mut response)?;
    if response.is_empty() {
        return Err(WvError::codec("server closed without responding"));
    }

    Ok(response.trim_end_matches(&['\r', '\n'][..]).to_string())
}

/// Upload one observation to the aggregation server. The observation
/// must carry an `id` field naming its station.
///
/// Note the `blocking_` prefix. This is a hint to the caller that if
/// the function is used in an async context, it should be treated as a
/// blocking operation.
pub fn blocking_put(
    addr: impl std::net::ToSocketAddrs,
    producer_id: &str,
    observation: &Observation,
) -> WvResult<()> {
    let body = serde_json::Value::Object(observation.clone())
        .to_string()
        .into_bytes();

    let res = blocking_exchange(addr, |lamport| {
        Request::put(producer_id, lamport, body)
    })?;

    if res == Response::Ok.to_string() {
        Ok(())
    } else {
        Err(WvError::rejected(res))
    }
}

/// Upload one observation with the standard producer retry contract:
/// up to `attempts` tries spaced `retry_interval` apart, stopping at
/// the first acceptance.
///
/// Note the `blocking_` prefix. This is a hint to the caller that if
/// the function is used in an async context, it should be treated as a
/// blocking operation.
pub fn blocking_put_with_retry(
    addr: impl std::net::ToSocketAddrs + Clone,
    producer_id: &str,
    observation: &Observation,
    attempts: usize,
    retry_interval: std::time::Duration,
) -> WvResult<()> {
    let mut last_err = WvError::codec("no upload attempts were made");

    for attempt in 0..attempts {
        if attempt > 0 {
            std::thread::sleep(retry_interval);
        }
        match blocking_put(addr.clone(), producer_id, observation) {
            Ok(()) => return Ok(()),
            Err(err) => {
                tracing::warn!(?err, attempt, "observation upload failed");
                last_err = err;
            }
        }
    }

    Err(last_err)
}

/// Fetch the most recent visible observation, for the named station or
/// for the station of the most recent upload when `station_id` is
/// `None`.
///
/// Note the `blocking_` prefix. This is a hint to the caller that if
/// the function is used in an async context, it should be treated as a
/// blocking operation.
pub fn blocking_get(
    addr: impl std::net::ToSocketAddrs,
    client_id: &str,
    station_id: Option<&str>,
) -> WvResult<Observation> {
    let res = blocking_exchange(addr, |lamport| {
        Request::get(client_id, lamport, station_id)
    })?;

    // error responses lead with a status code; a found observation is
    // a bare json body with no status framing
    if res.starts_with("400") || res.starts_with("404") || res.starts_with("500")
    {
        return Err(WvError::rejected(res));
    }

    serde_json::from_str(&res)
        .map_err(|_| WvError::codec("response is not a json observation"))
}
