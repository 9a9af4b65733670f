//! gridq daemon - online TD agent serving a tile-grid game client
//!
//! The game client connects over TCP and sends one observation per frame;
//! the daemon answers every request with one line: the buttons to hold, or
//! nothing held when the request was dropped. Accepted frames also train on
//! the previous transition before the answer goes out. One client is served at a
//! time; every connection starts a fresh session.
//!
//! Storage locations (config.json, network.gqi):
//! - Linux: ~/.local/share/gridq/
//! - Windows: %APPDATA%\gridq\
//! - MacOS: ~/Library/Application Support/gridq/
//! - or `$GRIDQ_DATA_DIR` when set

use std::fs::File;
use std::io::{BufReader, BufWriter, Write as _};

use futures_util::{SinkExt, StreamExt};
use gridq::config::AgentConfig;
use gridq::network::ValueNetwork;
use gridq::session::{ClosedSession, Phase, Session, SessionEnd};
use gridq::storage;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::time;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

mod framing;
mod paths;

use framing::{FrameCodec, Inbound};
use paths::AppPaths;

#[derive(Error, Debug)]
enum DaemonError {
    #[error("{0}")]
    Paths(String),

    #[error("config {path}: {source}")]
    Config {
        path: String,
        #[source]
        source: gridq::Error,
    },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),
}

// ═══════════════════════════════════════════════════════════════════════════
// Configuration & persistence
// ═══════════════════════════════════════════════════════════════════════════

fn load_config(paths: &AppPaths) -> Result<AgentConfig, DaemonError> {
    let path = paths.config_file();
    if !path.exists() {
        info!("No config at {:?}; using defaults", path);
        return Ok(AgentConfig::default());
    }
    let text = std::fs::read_to_string(&path).map_err(|e| DaemonError::Config {
        path: path.display().to_string(),
        source: e.into(),
    })?;
    let cfg = AgentConfig::from_json(&text).map_err(|source| DaemonError::Config {
        path: path.display().to_string(),
        source,
    })?;
    info!("Loaded config from {:?}", path);
    Ok(cfg)
}

fn load_network(paths: &AppPaths) -> Option<ValueNetwork> {
    let path = paths.network_file();
    if !path.exists() {
        info!("No saved network at {:?}; first session starts fresh", path);
        return None;
    }
    let loaded = File::open(&path)
        .map_err(gridq::Error::from)
        .and_then(|f| storage::load_network_from(&mut BufReader::new(f)));
    match loaded {
        Ok(net) => {
            info!(
                "Loaded network from {:?} (vision size {}, {} params)",
                path,
                net.vision_size(),
                net.param_count()
            );
            Some(net)
        }
        Err(e) => {
            warn!("Could not load network from {:?}: {}", path, e);
            None
        }
    }
}

fn save_network(paths: &AppPaths, net: &ValueNetwork) -> gridq::Result<()> {
    let path = paths.network_file();
    let file = File::create(&path).map_err(|source| gridq::Error::Io {
        operation: format!("create {}", path.display()),
        source,
    })?;
    let mut w = BufWriter::new(file);
    storage::save_network_to(net, &mut w)?;
    w.flush()?;
    info!("✓ Network saved to {:?}", path);
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
// Session loop
// ═══════════════════════════════════════════════════════════════════════════

/// Serve one connection until it times out, closes, or fails.
///
/// Every read is bounded by the configured timeout. Each request gets exactly
/// one line back; a dropped request is answered with the nothing-held line so
/// a lock-step client never waits on a reply that is not coming.
async fn serve<S>(stream: S, session: &mut Session) -> SessionEnd
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let timeout = session.config().read_timeout();
    let mut framed = Framed::new(stream, FrameCodec::new(session.config().read_buffer_size));

    loop {
        let inbound = match time::timeout(timeout, framed.next()).await {
            Err(_) => return SessionEnd::Timeout,
            Ok(None) => return SessionEnd::PeerClosed,
            Ok(Some(Err(e))) => return SessionEnd::Transport(e.to_string()),
            Ok(Some(Ok(inbound))) => inbound,
        };

        let response = match inbound {
            Inbound::Frame(raw) => handle_frame(session, &raw),
            Inbound::Oversized(len) => {
                warn!("Dropped oversized frame ({} bytes)", len);
                session.record_dropped();
                session.drop_response()
            }
            Inbound::Truncated(len) => {
                // The peer already closed its side; nobody is reading a reply.
                warn!("Dropped {} trailing bytes without END", len);
                session.record_dropped();
                continue;
            }
        };

        if let Err(e) = framed.send(response).await {
            return SessionEnd::Transport(e.to_string());
        }
    }
}

/// Run one request through the session and pick the reply line.
fn handle_frame(session: &mut Session, raw: &str) -> String {
    let report = match session.on_message(raw) {
        Ok(report) => report,
        Err(e) => {
            if e.is_frame_local() {
                warn!("Dropped frame: {}", e);
            } else {
                error!("Frame processing failed: {}", e);
            }
            return session.drop_response();
        }
    };

    if report.network_built {
        let state = session.state();
        info!(
            "Value network ready: vision size {}, {} params",
            state.vision_size().unwrap_or_default(),
            state.network.get().map(|n| n.param_count()).unwrap_or(0)
        );
    }
    if let Some(dump) = &report.grid_dump {
        debug!("frame {}\n{}", report.frame, dump);
    }
    debug!(
        frame = report.frame,
        actions = %report.actions,
        reward = ?report.reward,
        loss = ?report.loss,
        "frame processed"
    );
    report.response
}

fn log_closed(closed: &ClosedSession) {
    let reason = match &closed.end {
        SessionEnd::PeerClosed => "closed by client".to_string(),
        SessionEnd::Timeout => "timed out".to_string(),
        SessionEnd::Transport(e) => format!("failed: {e}"),
    };
    if closed.end.is_error() {
        error!("Connection {}", reason);
    } else {
        info!("Connection {}", reason);
    }
    info!("Session summary: {}", closed.snapshot.to_json());
}

async fn run(cfg: AgentConfig, paths: AppPaths) -> Result<(), DaemonError> {
    let listener = TcpListener::bind(&cfg.listen_addr)
        .await
        .map_err(|source| DaemonError::Bind {
            addr: cfg.listen_addr.clone(),
            source,
        })?;
    info!("gridq daemon listening on {}", cfg.listen_addr);

    loop {
        debug!(phase = ?Phase::AwaitingConnection, "waiting for a client");
        let (stream, addr) = listener.accept().await.map_err(DaemonError::Accept)?;
        info!("Client connected: {}", addr);

        if let Err(e) = stream.set_nodelay(true) {
            warn!("Could not disable Nagle on {}: {}", addr, e);
        }

        let mut session = Session::new(cfg.clone());
        if cfg.persist_weights {
            if let Some(net) = load_network(&paths) {
                session = session.with_warm_start(net);
            }
        }

        let end = serve(stream, &mut session).await;
        let closed = session.close(end);
        log_closed(&closed);

        if cfg.persist_weights {
            if let Some(net) = &closed.network {
                if let Err(e) = save_network(&paths, net) {
                    error!("✗ Network save failed: {}", e);
                }
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Main
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let paths = AppPaths::new().map_err(DaemonError::Paths)?;
    info!("Data directory: {:?}", paths.data_dir());

    let cfg = load_config(&paths)?;

    tokio::select! {
        res = run(cfg, paths) => res?,
        _ = tokio::signal::ctrl_c() => info!("Ctrl-C: shutting down"),
    }
    Ok(())
}
