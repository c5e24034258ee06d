use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use session_api::{build_session_codecs, Session, SessionManager};

pub use session_api::ServerError;

/// Server-driver configuration: listen address, connection cap, and
/// the protocol pipeline every accepted connection is built with.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: String,
    pub max_conn: usize,
    pub send_chan_size: usize,
    pub protocol_name: String,
    pub protocol_config_json: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:0".to_string(),
            max_conn: 200_000,
            send_chan_size: 1024,
            protocol_name: "fixlen".to_string(),
            protocol_config_json: String::new(),
        }
    }
}

const MAX_TRY_TIME: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(5);
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// TCP accept-loop driver. One `Server` owns one listener and the
/// `SessionManager` tracking its accepted connections.
pub struct Server {
    cfg: ServerConfig,
    manager: Arc<SessionManager>,
    stopping: Arc<AtomicBool>,
}

impl Server {
    pub fn new(cfg: ServerConfig) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            manager: SessionManager::new(),
            stopping: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Binds the listener and runs the accept loop on the calling
    /// thread, spawning `handler` on a new thread per accepted
    /// connection. Returns once `stop()` is called or the listener
    /// hits a non-recoverable error.
    pub fn run(
        self: &Arc<Self>,
        handler: impl Fn(Arc<Session>) + Send + Sync + Clone + 'static,
    ) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.cfg.addr)?;
        listener.set_nonblocking(true)?;
        tracing::info!(addr = %self.cfg.addr, "server listening");

        let mut tries = 0u32;
        loop {
            if self.stopping.load(Ordering::Acquire) {
                tracing::info!("server stopping, exiting accept loop");
                return Ok(());
            }

            match listener.accept() {
                Ok((conn, peer)) => {
                    tries = 0;
                    if self.manager.len() >= self.cfg.max_conn {
                        tracing::warn!(peer = %peer, max_conn = self.cfg.max_conn, "connection limit reached, dropping");
                        drop(conn);
                        continue;
                    }

                    let (recv_codec, send_codec) =
                        match build_session_codecs(&self.cfg.protocol_name, &self.cfg.protocol_config_json, conn) {
                            Ok(pair) => pair,
                            Err(e) => {
                                tracing::warn!(peer = %peer, error = %e, "failed to build protocol pipeline");
                                continue;
                            }
                        };
                    let session = self.manager.new_session(recv_codec, send_codec, self.cfg.send_chan_size);
                    tracing::info!(peer = %peer, session_id = session.id(), "accepted connection");

                    let handler = handler.clone();
                    std::thread::spawn(move || handler(session));
                }
                Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock) => {
                    std::thread::sleep(POLL_INTERVAL);
                    continue;
                }
                Err(e) if is_temporary(&e) => {
                    tries += 1;
                    if tries > MAX_TRY_TIME {
                        tracing::error!(error = %e, "accept failed too many times, giving up");
                        return Err(ServerError::Io(e));
                    }
                    std::thread::sleep(RETRY_BACKOFF);
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept loop terminating");
                    return Err(ServerError::Io(e));
                }
            }
        }
    }

    /// Signals the accept loop to exit and destroys the session
    /// manager, closing every live session and waiting for drain.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::Release);
        self.manager.destroy();
    }
}

fn is_temporary(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::Interrupted | std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
    )
}
