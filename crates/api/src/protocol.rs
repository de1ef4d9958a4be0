//! Weathervane wire codec.
//!
//! A request is a start line (`<METHOD> <path> HTTP/1.1`), zero or more
//! `Key: value` header lines with case-sensitive keys, a blank line, and
//! a body of exactly the byte length declared in `Content-Length`
//! (absent means zero). A response is a single line: either a
//! three-digit status with a reason phrase, or a raw JSON observation
//! body. There are no response headers and no chunked framing; the
//! connection closes after the line.

use crate::{WvError, WvResult};

/// Header carrying the stable id of the sending participant.
pub const HEADER_SERVER_ID: &str = "ServerId";

/// Header carrying the sender's Lamport timestamp.
pub const HEADER_LAMPORT_CLOCK: &str = "LamportClock";

/// Header naming the station a query is about.
pub const HEADER_STATION_ID: &str = "StationId";

/// Header declaring the request body length in bytes.
pub const HEADER_CONTENT_LENGTH: &str = "Content-Length";

/// Header declaring the request body media type.
pub const HEADER_CONTENT_TYPE: &str = "Content-Type";

/// Request path used by producer uploads.
pub const PUT_PATH: &str = "/uploadData";

/// Request path used by queries.
pub const GET_PATH: &str = "/weather.json";

/// A decoded weathervane request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// The request method verbatim. Only `GET` and `PUT` are
    /// recognized; anything else draws `400 Bad Request` downstream.
    pub method: String,

    /// The request path verbatim.
    pub path: String,

    /// All header lines in arrival order. Unknown headers are preserved
    /// verbatim but ignored.
    pub headers: Vec<(String, String)>,

    /// The request body bytes.
    pub body: Vec<u8>,
}

impl Request {
    /// Construct a producer upload request.
    pub fn put(producer_id: &str, lamport: i64, body: Vec<u8>) -> Self {
        Self {
            method: "PUT".into(),
            path: PUT_PATH.into(),
            headers: vec![
                (HEADER_SERVER_ID.into(), producer_id.into()),
                (HEADER_LAMPORT_CLOCK.into(), lamport.to_string()),
                (HEADER_CONTENT_TYPE.into(), "application/json".into()),
                (HEADER_CONTENT_LENGTH.into(), body.len().to_string()),
            ],
            body,
        }
    }

    /// Construct a query request, optionally naming a station.
    pub fn get(client_id: &str, lamport: i64, station_id: Option<&str>) -> Self {
        let mut headers = vec![
            (HEADER_SERVER_ID.into(), client_id.into()),
            (HEADER_LAMPORT_CLOCK.into(), lamport.to_string()),
        ];
        if let Some(station_id) = station_id {
            headers.push((HEADER_STATION_ID.into(), station_id.into()));
        }
        Self {
            method: "GET".into(),
            path: GET_PATH.into(),
            headers,
            body: Vec::new(),
        }
    }

    /// Decode a request from its raw wire bytes.
    pub fn parse(raw: &[u8]) -> WvResult<Self> {
        let mut pos = 0;

        let start = next_line(raw, &mut pos)?;
        let mut start = start.split(' ');
        let method = match start.next() {
            Some(m) if !m.is_empty() => m.to_string(),
            _ => return Err(WvError::codec("empty start line")),
        };
        let path = match start.next() {
            Some(p) if !p.is_empty() => p.to_string(),
            _ => return Err(WvError::codec("start line missing path")),
        };

        let mut headers = Vec::new();
        loop {
            let line = next_line(raw, &mut pos)?;
            if line.is_empty() {
                break;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| WvError::codec("malformed header line"))?;
            // a single space after the colon is tolerated
            let value = value.strip_prefix(' ').unwrap_or(value);
            headers.push((name.to_string(), value.to_string()));
        }

        let out = Self {
            method,
            path,
            headers,
            body: Vec::new(),
        };

        let body = match out.header(HEADER_CONTENT_LENGTH) {
            None => Vec::new(),
            Some(len) => {
                let len: usize = len
                    .trim()
                    .parse()
                    .map_err(|_| WvError::codec("bad Content-Length"))?;
                if raw.len() - pos < len {
                    return Err(WvError::codec("body shorter than declared"));
                }
                raw[pos..pos + len].to_vec()
            }
        };

        Ok(Self { body, ..out })
    }

    /// Look up a header value by case-sensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// The `LamportClock` header as an integer, defaulting to 0 when
    /// missing or malformed.
    pub fn lamport(&self) -> i64 {
        self.header(HEADER_LAMPORT_CLOCK)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    /// Encode this request into its raw wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128 + self.body.len());
        out.extend_from_slice(
            format!("{} {} HTTP/1.1\r\n", self.method, self.path).as_bytes(),
        );
        for (name, value) in &self.headers {
            out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

/// Read one `\r\n`-terminated line starting at `pos`, advancing `pos`
/// past the terminator. A bare `\n` is tolerated.
fn next_line<'a>(raw: &'a [u8], pos: &mut usize) -> WvResult<&'a str> {
    let nl = raw[*pos..]
        .iter()
        .position(|b| *b == b'\n')
        .ok_or_else(|| WvError::codec("missing line terminator"))?;
    let mut line = &raw[*pos..*pos + nl];
    *pos += nl + 1;
    if let [head @ .., b'\r'] = line {
        line = head;
    }
    std::str::from_utf8(line)
        .map_err(|_| WvError::codec("request is not utf8"))
}

/// A weathervane response: one line, connection closed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// An upload was accepted.
    Ok,

    /// The request method was not recognized or the request itself
    /// could not be decoded.
    BadRequest,

    /// An upload arrived without a producer id.
    NullServerId,

    /// An upload body carried no station id.
    NullStationId,

    /// An upload body was not parseable JSON.
    JsonError,

    /// A query matched no visible observation.
    NotFound,

    /// A query succeeded: the stored observation body, verbatim. Note
    /// there is no status line before the body on query success.
    Observation(String),
}

impl std::fmt::Display for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => f.write_str("200 OK"),
            Self::BadRequest => f.write_str("400 Bad Request"),
            Self::NullServerId => f.write_str("400 Null ServerId"),
            Self::NullStationId => f.write_str("400 Null StationId"),
            Self::JsonError => f.write_str("400 JSON Error"),
            Self::NotFound => f.write_str("404 Data Not Found"),
            Self::Observation(body) => f.write_str(body),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn put_round_trip() {
        let req =
            Request::put("producer-1", 5, br#"{"id":"IDS60901"}"#.to_vec());
        let parsed = Request::parse(&req.encode()).unwrap();
        assert_eq!(req, parsed);
        assert_eq!("PUT", parsed.method);
        assert_eq!(PUT_PATH, parsed.path);
        assert_eq!(Some("producer-1"), parsed.header(HEADER_SERVER_ID));
        assert_eq!(5, parsed.lamport());
        assert_eq!(br#"{"id":"IDS60901"}"#.to_vec(), parsed.body);
    }

    #[test]
    fn get_round_trip_without_station() {
        let req = Request::get("client-1", 9, None);
        let parsed = Request::parse(&req.encode()).unwrap();
        assert_eq!("GET", parsed.method);
        assert_eq!(None, parsed.header(HEADER_STATION_ID));
        assert_eq!(9, parsed.lamport());
        assert!(parsed.body.is_empty());
    }

    #[test]
    fn header_names_are_case_sensitive() {
        let raw = b"GET /weather.json HTTP/1.1\r\nserverid: x\r\n\r\n";
        let parsed = Request::parse(raw).unwrap();
        assert_eq!(None, parsed.header(HEADER_SERVER_ID));
        assert_eq!(Some("x"), parsed.header("serverid"));
    }

    #[test]
    fn unknown_headers_are_preserved() {
        let raw = b"GET /weather.json HTTP/1.1\r\nX-Whatever: keep me\r\n\r\n";
        let parsed = Request::parse(raw).unwrap();
        assert_eq!(Some("keep me"), parsed.header("X-Whatever"));
    }

    #[test]
    fn single_space_after_colon_is_optional() {
        let raw = b"GET /weather.json HTTP/1.1\r\nStationId:ABC\r\n\r\n";
        assert_eq!(
            Some("ABC"),
            Request::parse(raw).unwrap().header(HEADER_STATION_ID),
        );
        // only one space is stripped
        let raw = b"GET /weather.json HTTP/1.1\r\nStationId:  ABC\r\n\r\n";
        assert_eq!(
            Some(" ABC"),
            Request::parse(raw).unwrap().header(HEADER_STATION_ID),
        );
    }

    #[test]
    fn missing_content_length_means_empty_body() {
        let raw = b"PUT /uploadData HTTP/1.1\r\n\r\nstray bytes";
        assert!(Request::parse(raw).unwrap().body.is_empty());
    }

    #[test]
    fn body_is_exactly_declared_length() {
        let raw =
            b"PUT /uploadData HTTP/1.1\r\nContent-Length: 2\r\n\r\n{}\ntrail";
        assert_eq!(b"{}".to_vec(), Request::parse(raw).unwrap().body);
    }

    #[test]
    fn truncated_body_is_an_error() {
        let raw = b"PUT /uploadData HTTP/1.1\r\nContent-Length: 10\r\n\r\n{}";
        assert!(Request::parse(raw).is_err());
    }

    #[test]
    fn malformed_lamport_defaults_to_zero() {
        let raw =
            b"GET /weather.json HTTP/1.1\r\nLamportClock: pretzel\r\n\r\n";
        assert_eq!(0, Request::parse(raw).unwrap().lamport());
    }

    #[test]
    fn malformed_header_line_is_an_error() {
        let raw = b"GET /weather.json HTTP/1.1\r\nno colon here\r\n\r\n";
        assert!(Request::parse(raw).is_err());
    }

    #[test]
    fn bare_newline_terminators_are_tolerated() {
        let raw = b"GET /weather.json HTTP/1.1\nStationId: A\n\n";
        let parsed = Request::parse(raw).unwrap();
        assert_eq!(Some("A"), parsed.header(HEADER_STATION_ID));
    }

    #[test]
    fn response_lines() {
        assert_eq!("200 OK", Response::Ok.to_string());
        assert_eq!("400 Bad Request", Response::BadRequest.to_string());
        assert_eq!("400 Null ServerId", Response::NullServerId.to_string());
        assert_eq!("400 Null StationId", Response::NullStationId.to_string());
        assert_eq!("400 JSON Error", Response::JsonError.to_string());
        assert_eq!("404 Data Not Found", Response::NotFound.to_string());
        assert_eq!(
            r#"{"id":"X"}"#,
            Response::Observation(r#"{"id":"X"}"#.into()).to_string(),
        );
    }
}
