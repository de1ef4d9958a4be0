//! config types.

/// Configuration for running an AggregationSrv.
#[derive(Debug, Clone)]
pub struct Config {
    /// The address at which to listen.
    ///
    /// Defaults:
    /// - `testing = "127.0.0.1:0"`
    /// - `production = "0.0.0.0:4567"`
    pub listen_address: std::net::SocketAddr,

    /// The duration the acceptor blocks waiting for an incoming
    /// connection before checking whether the server is shutting down.
    ///
    /// Setting this very high will make ctrl-c / server shutdown slow.
    /// Setting this very low will increase cpu overhead.
    ///
    /// Defaults:
    /// - `testing = 10ms`
    /// - `production = 5s`
    pub accept_poll_timeout: std::time::Duration,

    /// The duration the worker blocks on the connection hand-off queue
    /// before checking whether the server is shutting down.
    ///
    /// Defaults:
    /// - `testing = 10ms`
    /// - `production = 2s`
    pub queue_poll_timeout: std::time::Duration,

    /// Capacity of the bounded hand-off queue between the acceptor and
    /// the worker. The acceptor blocks once this many connections are
    /// waiting.
    ///
    /// Defaults:
    /// - `testing = 32`
    /// - `production = 64`
    pub handoff_capacity: usize,

    /// Per-connection read timeout. The worker is single-threaded, so
    /// without this a stalled peer would starve every other connection.
    ///
    /// Defaults:
    /// - `testing = 1s`
    /// - `production = 10s`
    pub read_timeout: std::time::Duration,

    /// Producers that have not uploaded within this window are treated
    /// as not contributing data: their observations are hidden from
    /// queries until the producer pushes again. Nothing is deleted.
    ///
    /// Defaults:
    /// - `testing = 30s`
    /// - `production = 30s`
    pub liveness_window: std::time::Duration,

    /// The path of the JSON checkpoint file. Loaded at startup if it
    /// exists, rewritten atomically on every checkpoint.
    ///
    /// Defaults:
    /// - `testing = "data.json"`
    /// - `production = "data.json"`
    pub checkpoint_path: std::path::PathBuf,

    /// The interval at which the checkpointer persists server state.
    ///
    /// Defaults:
    /// - `testing = 60s`
    /// - `production = 15s`
    pub checkpoint_interval: std::time::Duration,
}

impl Config {
    /// Get an aggregation server config suitable for testing.
    ///
    /// Note the long checkpoint interval: tests that exercise
    /// checkpointing shorten it (and point `checkpoint_path` into a
    /// temp dir) explicitly, everything else should never hit the
    /// periodic save.
    pub fn testing() -> Self {
        Self {
            listen_address: (std::net::Ipv4Addr::LOCALHOST, 0).into(),
            accept_poll_timeout: std::time::Duration::from_millis(10),
            queue_poll_timeout: std::time::Duration::from_millis(10),
            handoff_capacity: 32,
            read_timeout: std::time::Duration::from_secs(1),
            liveness_window: std::time::Duration::from_secs(30),
            checkpoint_path: "data.json".into(),
            checkpoint_interval: std::time::Duration::from_secs(60),
        }
    }

    /// Get an aggregation server config suitable for production.
    pub fn production() -> Self {
        Self {
            listen_address: (std::net::Ipv4Addr::UNSPECIFIED, 4567).into(),
            accept_poll_timeout: std::time::Duration::from_secs(5),
            queue_poll_timeout: std::time::Duration::from_secs(2),
            handoff_capacity: 64,
            read_timeout: std::time::Duration::from_secs(10),
            liveness_window: std::time::Duration::from_secs(30),
            checkpoint_path: "data.json".into(),
            checkpoint_interval: std::time::Duration::from_secs(15),
        }
    }
}
