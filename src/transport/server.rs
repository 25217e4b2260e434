//! MJPEG streaming server.
//!
//! A nonblocking accept loop on its own thread, one thread per connection.
//! Each `GET /` session owns a `StreamLoop` (its own frame source and cooldown
//! state); the detector and alert sink are shared. Sessions are cancelled when
//! the client closes its socket, stops reading, or the server is stopped. A
//! watcher thread reads the client side so a hang-up is noticed even while
//! no frames are being written.

use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::io::{ErrorKind, Read};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use super::http::{read_request, write_json_response};
use super::mjpeg::{write_part, write_stream_header, JpegEncoder};
use crate::alert::{AlertCue, AlertSink};
use crate::detect::SharedDetector;
use crate::ingest::{connect_source, FrameSource, SourceSettings};
use crate::pipeline::{CancelToken, DecisionSettings, FramePipeline, StreamLoop};

const ACCEPT_POLL: Duration = Duration::from_millis(50);
const CLIENT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);
const HANGUP_POLL: Duration = Duration::from_millis(100);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub addr: String,
    pub max_streams: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:5000".to_string(),
            max_streams: 1,
        }
    }
}

/// Frame sources parked between sessions.
#[derive(Clone, Default)]
pub struct SourcePool {
    parked: Arc<Mutex<Vec<Box<dyn FrameSource>>>>,
}

impl SourcePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn park(&self, source: Box<dyn FrameSource>) {
        match self.parked.lock() {
            Ok(mut parked) => parked.push(source),
            Err(_) => log::warn!("source pool lock poisoned; dropping released source"),
        }
    }

    pub fn take(&self) -> Option<Box<dyn FrameSource>> {
        self.parked.lock().ok().and_then(|mut parked| parked.pop())
    }

    pub fn len(&self) -> usize {
        self.parked.lock().map(|parked| parked.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-session settings.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionSettings {
    pub decision: DecisionSettings,
    pub source: SourceSettings,
    pub jpeg_quality: u8,
    pub retry_delay: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            decision: DecisionSettings::default(),
            source: SourceSettings::default(),
            jpeg_quality: 80,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Builds a `StreamLoop` for each new client.
#[derive(Clone)]
pub struct SessionFactory {
    detector: SharedDetector,
    sink: Arc<dyn AlertSink>,
    cue: AlertCue,
    settings: SessionSettings,
    pool: SourcePool,
}

impl SessionFactory {
    pub fn new(
        detector: SharedDetector,
        sink: Arc<dyn AlertSink>,
        cue: AlertCue,
        settings: SessionSettings,
        pool: SourcePool,
    ) -> Self {
        Self {
            detector,
            sink,
            cue,
            settings,
            pool,
        }
    }

    /// Reuse a parked source or open a new one, with a fresh cooldown state.
    pub fn open(&self, cancel: CancelToken) -> Result<StreamLoop> {
        let source = match self.pool.take() {
            Some(source) => source,
            None => connect_source(&self.settings.source)?,
        };
        let pipeline = FramePipeline::new(
            self.detector.clone(),
            self.sink.clone(),
            self.cue.clone(),
            &self.settings.decision,
        );
        Ok(StreamLoop::new(
            source,
            pipeline,
            JpegEncoder::new(self.settings.jpeg_quality),
            cancel,
            self.settings.retry_delay,
        ))
    }

    pub fn release(&self, stream: StreamLoop) {
        self.pool.park(stream.into_source());
    }
}

#[derive(Default)]
struct SessionTable {
    next_id: AtomicU64,
    active: Mutex<HashMap<u64, CancelToken>>,
}

impl SessionTable {
    fn admit(&self, max_streams: usize) -> Option<(u64, CancelToken)> {
        let mut active = self.active.lock().ok()?;
        if active.len() >= max_streams {
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let cancel = CancelToken::new();
        active.insert(id, cancel.clone());
        Some((id, cancel))
    }

    fn remove(&self, id: u64) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&id);
        }
    }

    fn cancel_all(&self) {
        if let Ok(active) = self.active.lock() {
            for cancel in active.values() {
                cancel.cancel();
            }
        }
    }

    fn active_count(&self) -> usize {
        self.active.lock().map(|active| active.len()).unwrap_or(0)
    }
}

#[derive(Debug)]
pub struct StreamHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    sessions: Arc<SessionTable>,
    join: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for SessionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTable")
            .field("active", &self.active_count())
            .finish()
    }
}

impl StreamHandle {
    pub fn active_streams(&self) -> usize {
        self.sessions.active_count()
    }

    /// Stop accepting, cancel every session and wait for them to finish.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        self.sessions.cancel_all();
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("stream server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct StreamServer {
    cfg: ServerConfig,
    factory: SessionFactory,
}

impl StreamServer {
    pub fn new(cfg: ServerConfig, factory: SessionFactory) -> Self {
        Self { cfg, factory }
    }

    pub fn spawn(self) -> Result<StreamHandle> {
        if self.cfg.max_streams == 0 {
            return Err(anyhow!("max_streams must be at least 1"));
        }
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .with_context(|| format!("invalid listen address '{}'", self.cfg.addr))?;
        let listener = TcpListener::bind(configured_addr)
            .with_context(|| format!("bind stream server to {}", configured_addr))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let sessions = Arc::new(SessionTable::default());
        let shutdown_thread = shutdown.clone();
        let sessions_thread = sessions.clone();
        let join = std::thread::Builder::new()
            .name("stream-accept".to_string())
            .spawn(move || {
                if let Err(err) = run_accept(
                    listener,
                    self.cfg.max_streams,
                    self.factory,
                    sessions_thread,
                    shutdown_thread,
                ) {
                    log::error!("stream server stopped: {}", err);
                }
            })?;

        log::info!("stream server listening on http://{}/", addr);
        Ok(StreamHandle {
            addr,
            shutdown,
            sessions,
            join: Some(join),
        })
    }
}

fn run_accept(
    listener: TcpListener,
    max_streams: usize,
    factory: SessionFactory,
    sessions: Arc<SessionTable>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let mut workers: Vec<JoinHandle<()>> = Vec::new();
    let result = loop {
        if shutdown.load(Ordering::SeqCst) {
            break Ok(());
        }
        workers.retain(|worker| !worker.is_finished());
        match listener.accept() {
            Ok((stream, peer)) => {
                let factory = factory.clone();
                let sessions = sessions.clone();
                let spawned = std::thread::Builder::new()
                    .name(format!("stream-{}", peer))
                    .spawn(move || {
                        if let Err(err) =
                            handle_connection(stream, peer, &factory, &sessions, max_streams)
                        {
                            log::warn!("request from {} rejected: {}", peer, err);
                        }
                    });
                match spawned {
                    Ok(worker) => workers.push(worker),
                    Err(err) => log::warn!("connection thread for {} failed: {}", peer, err),
                }
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
                continue;
            }
            Err(err) => break Err(err.into()),
        }
    };

    sessions.cancel_all();
    for worker in workers {
        if worker.join().is_err() {
            log::warn!("stream session thread panicked");
        }
    }
    result
}

fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    factory: &SessionFactory,
    sessions: &SessionTable,
    max_streams: usize,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    let request = read_request(&mut stream)?;
    if request.method != "GET" {
        write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
        return Ok(());
    }
    match request.path.as_str() {
        "/" => {}
        "/health" => {
            let body = serde_json::json!({
                "status": "ok",
                "active_streams": sessions.active_count(),
            });
            write_json_response(&mut stream, 200, &body.to_string())?;
            return Ok(());
        }
        _ => {
            write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#)?;
            return Ok(());
        }
    }

    let Some((id, cancel)) = sessions.admit(max_streams) else {
        log::warn!("stream from {} refused: {} streams active", peer, max_streams);
        write_json_response(&mut stream, 503, r#"{"error":"too_many_streams"}"#)?;
        return Ok(());
    };
    let result = serve_stream(&mut stream, peer, factory, cancel);
    sessions.remove(id);
    result
}

fn serve_stream(
    stream: &mut TcpStream,
    peer: SocketAddr,
    factory: &SessionFactory,
    cancel: CancelToken,
) -> Result<()> {
    let mut session = match factory.open(cancel.clone()) {
        Ok(session) => session,
        Err(err) => {
            write_json_response(stream, 503, r#"{"error":"source_unavailable"}"#)?;
            return Err(err);
        }
    };
    stream.set_write_timeout(Some(CLIENT_WRITE_TIMEOUT))?;
    if let Err(err) = write_stream_header(stream) {
        factory.release(session);
        return Err(err.into());
    }
    log::info!("stream client {} connected", peer);
    let watcher = match spawn_hangup_watcher(stream, peer, cancel.clone()) {
        Ok(watcher) => Some(watcher),
        Err(err) => {
            log::warn!("hang-up watcher for {} not started: {}", peer, err);
            None
        }
    };

    for encoded in &mut session {
        if let Err(err) = write_part(stream, &encoded.jpeg) {
            log::info!("stream client {} disconnected: {}", peer, err);
            break;
        }
    }
    cancel.cancel();
    if let Some(watcher) = watcher {
        if watcher.join().is_err() {
            log::warn!("hang-up watcher for {} panicked", peer);
        }
    }

    let stats = session.stats();
    log::info!(
        "stream session {} ended: emitted={} flagged={} alerts={}",
        peer,
        stats.frames_emitted,
        stats.frames_flagged,
        stats.alerts_fired
    );
    factory.release(session);
    Ok(())
}

/// Cancel the session once the client closes or resets its end. Request
/// bytes sent after the headers are discarded.
fn spawn_hangup_watcher(
    stream: &TcpStream,
    peer: SocketAddr,
    cancel: CancelToken,
) -> Result<JoinHandle<()>> {
    let mut reader = stream.try_clone()?;
    reader.set_read_timeout(Some(HANGUP_POLL))?;
    let join = std::thread::Builder::new()
        .name(format!("hangup-{}", peer))
        .spawn(move || {
            let mut scratch = [0u8; 256];
            while !cancel.is_cancelled() {
                match reader.read(&mut scratch) {
                    Ok(0) => {
                        log::info!("stream client {} hung up", peer);
                        cancel.cancel();
                    }
                    Ok(_) => {}
                    Err(err)
                        if matches!(
                            err.kind(),
                            ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                        ) => {}
                    Err(err) => {
                        log::info!("stream client {} connection lost: {}", peer, err);
                        cancel.cancel();
                    }
                }
            }
        })?;
    Ok(join)
}
