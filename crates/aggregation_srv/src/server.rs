//! aggregation server types.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;

use weathervane_api::*;

use crate::*;

/// Print out a message if this thread dies.
struct ThreadGuard(&'static str);

impl Drop for ThreadGuard {
    fn drop(&mut self) {
        tracing::warn!("{}", self.0);
    }
}

/// An actual weathervane aggregation server instance.
///
/// This server is built to be direct, light-weight, and responsive.
/// On the server-side, as one aspect toward accomplishing this, we are
/// eschewing async code in favor of os thread workers: one acceptor,
/// one request worker, one checkpointer. Because the request worker is
/// single-threaded, uploads and queries are totally ordered and the
/// handlers run without any per-map locking beyond the store mutex
/// shared with the checkpointer.
pub struct AggregationSrv {
    cont: Arc<AtomicBool>,
    workers: Vec<std::thread::JoinHandle<std::io::Result<()>>>,
    addr: std::net::SocketAddr,
}

impl Drop for AggregationSrv {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

impl AggregationSrv {
    /// Construct a new AggregationSrv instance listening on tcp.
    pub fn new(config: Config) -> std::io::Result<Self> {
        let listener =
            TcpAcceptor::bind(config.listen_address, config.read_timeout)?;
        Self::with_listener(config, Box::new(listener))
    }

    /// Run the server over an already-bound listener. Tests drive this
    /// with the in-memory transport.
    pub fn with_listener(
        config: Config,
        listener: DynListener,
    ) -> std::io::Result<Self> {
        let config = Arc::new(config);

        // atomic flag for telling worker threads to shutdown
        let cont = Arc::new(AtomicBool::new(true));

        let clock = LamportClock::default();
        let store = Arc::new(Store::new(config.liveness_window));

        // restore previous state before serving any request
        if let Some(checkpoint) = crate::checkpoint::load(&config.checkpoint_path)
        {
            let stored = store.restore(checkpoint);
            clock.resume(stored);
            tracing::info!(
                lamport = clock.current(),
                "restored state from checkpoint"
            );
        }

        let addr = listener.local_addr()?;
        tracing::info!(%addr, "listening");

        // bounded hand-off queue between the acceptor and the worker
        let (handoff, incoming) =
            std::sync::mpsc::sync_channel(config.handoff_capacity);

        let mut workers = Vec::with_capacity(3);

        {
            let config = config.clone();
            let cont = cont.clone();
            let clock = clock.clone();
            workers.push(std::thread::spawn(move || {
                acceptor(config, cont, clock, listener, handoff)
            }));
        }

        {
            let config = config.clone();
            let cont = cont.clone();
            let clock = clock.clone();
            let store = store.clone();
            workers.push(std::thread::spawn(move || {
                worker(config, cont, clock, store, incoming)
            }));
        }

        {
            let cont = cont.clone();
            workers.push(std::thread::spawn(move || {
                checkpointer(config, cont, clock, store)
            }));
        }

        Ok(Self {
            cont,
            workers,
            addr,
        })
    }

    /// Shutdown the server, returning an error result if any of the
    /// worker threads had panicked.
    pub fn shutdown(&mut self) -> std::io::Result<()> {
        let mut is_err = false;
        self.cont.store(false, Ordering::SeqCst);
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                is_err = true;
            }
        }
        if is_err {
            Err(std::io::Error::other("Failure shutting down worker thread"))
        } else {
            Ok(())
        }
    }

    /// Get the bound listening address of this server.
    pub fn listen_addr(&self) -> std::net::SocketAddr {
        self.addr
    }
}

/// Accept connections, greet each with the current Lamport value, hand
/// them to the worker. The greeting reads the clock without ticking it:
/// the peer needs to know what the server knows now, the tick happens
/// on actual message receipt.
fn acceptor(
    config: Arc<Config>,
    cont: Arc<AtomicBool>,
    clock: LamportClock,
    mut listener: DynListener,
    handoff: SyncSender<DynConnection>,
) -> std::io::Result<()> {
    let _g = ThreadGuard("acceptor thread has ended");

    while cont.load(Ordering::SeqCst) {
        let mut conn = match listener.accept(config.accept_poll_timeout)? {
            Some(conn) => conn,
            None => continue,
        };

        if let Err(err) = conn.write_line(&clock.current().to_string()) {
            tracing::debug!(?err, "failed to greet connection");
            continue;
        }

        if handoff.send(conn).is_err() {
            // worker is gone, nothing left to accept for
            break;
        }
    }

    Ok(())
}

/// Drain the hand-off queue one connection at a time: decode, dispatch,
/// respond, close. A failing connection is logged and dropped, never
/// fatal to the worker.
fn worker(
    config: Arc<Config>,
    cont: Arc<AtomicBool>,
    clock: LamportClock,
    store: Arc<Store>,
    incoming: Receiver<DynConnection>,
) -> std::io::Result<()> {
    let _g = ThreadGuard("request worker thread has ended");

    while cont.load(Ordering::SeqCst) {
        let conn = match incoming.recv_timeout(config.queue_poll_timeout) {
            Ok(conn) => conn,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let handler = Handler {
            clock: &clock,
            store: &store,
            conn,
        };

        if let Err(err) = handler.handle() {
            tracing::warn!(?err, "connection failed");
        }
    }

    Ok(())
}

struct Handler<'lt> {
    clock: &'lt LamportClock,
    store: &'lt Store,
    conn: DynConnection,
}

impl Handler<'_> {
    /// Run the request to completion and write the one response line.
    /// The connection closes when `self.conn` drops.
    fn handle(mut self) -> std::io::Result<()> {
        let response = self.handle_inner()?;
        self.conn.write_line(&response.to_string())
    }

    /// Decode and dispatch. Undecodable requests still get a response
    /// line; only transport failures surface as errors.
    fn handle_inner(&mut self) -> std::io::Result<Response> {
        let raw = self.conn.read_request()?;

        let req = match Request::parse(&raw) {
            Ok(req) => req,
            Err(err) => {
                tracing::debug!(?err, "undecodable request");
                return Ok(Response::BadRequest);
            }
        };

        self.clock.observe(req.lamport());

        match req.method.as_str() {
            "PUT" => Ok(self.handle_put(&req)),
            "GET" => Ok(self.handle_get(&req)),
            _ => Ok(Response::BadRequest),
        }
    }

    /// Validate and store an uploaded observation.
    fn handle_put(&mut self, req: &Request) -> Response {
        let producer = match req.header(HEADER_SERVER_ID) {
            Some(p) if !p.is_empty() => p.to_string(),
            _ => return Response::NullServerId,
        };

        let body: JsonMap = match serde_json::from_slice(&req.body) {
            Ok(body) => body,
            Err(_) => return Response::JsonError,
        };

        let station = match body.get("id").and_then(|v| v.as_str()) {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => return Response::NullStationId,
        };

        self.store.insert(
            &station,
            body,
            req.lamport(),
            &producer,
            crate::now_ms(),
        );

        Response::Ok
    }

    /// Answer a query with the newest visible observation.
    fn handle_get(&mut self, req: &Request) -> Response {
        let found = self.store.select(
            req.header(HEADER_STATION_ID),
            req.lamport(),
            crate::now_ms(),
        );

        match found {
            Some(body) => Response::Observation(
                serde_json::Value::Object(body).to_string(),
            ),
            None => Response::NotFound,
        }
    }
}

/// Periodically persist the full state; take one parting snapshot on
/// shutdown so a clean exit loses nothing.
fn checkpointer(
    config: Arc<Config>,
    cont: Arc<AtomicBool>,
    clock: LamportClock,
    store: Arc<Store>,
) -> std::io::Result<()> {
    let _g = ThreadGuard("checkpointer thread has ended");

    let mut last_save = std::time::Instant::now();

    while cont.load(Ordering::SeqCst) {
        std::thread::sleep(config.queue_poll_timeout);

        if last_save.elapsed() >= config.checkpoint_interval {
            last_save = std::time::Instant::now();
            save_state(&config, &clock, &store);
        }
    }

    save_state(&config, &clock, &store);

    Ok(())
}

fn save_state(config: &Config, clock: &LamportClock, store: &Store) {
    let checkpoint = store.snapshot(clock.current());
    match crate::checkpoint::save(&config.checkpoint_path, &checkpoint) {
        Ok(()) => {
            tracing::debug!(path = ?config.checkpoint_path, "state saved");
        }
        Err(err) => {
            tracing::warn!(?err, "failed to save state");
        }
    }
}
