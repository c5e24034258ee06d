use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use session_api::{build_session_codecs, Session, SessionManager};

pub use session_api::ClientError;

/// Client-driver configuration: target address, parallel dial count,
/// and the protocol pipeline every dialed connection is built with.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub addr: String,
    pub conn_num: usize,
    pub timeout: Option<Duration>,
    pub send_chan_size: usize,
    pub protocol_name: String,
    pub protocol_config_json: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addr: String::new(),
            conn_num: 1,
            timeout: None,
            send_chan_size: 1024,
            protocol_name: "fixlen".to_string(),
            protocol_config_json: String::new(),
        }
    }
}

const MAX_DIAL_TRIES: u32 = 3;
const DIAL_BACKOFF: Duration = Duration::from_millis(50);

/// Dials `conn_num` parallel connections to `addr`, each retried up to
/// three times, and runs `handler` synchronously on each session.
pub struct Client {
    cfg: ClientConfig,
    manager: Arc<SessionManager>,
}

impl Client {
    pub fn new(cfg: ClientConfig) -> Arc<Self> {
        Arc::new(Self { cfg, manager: SessionManager::new() })
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Spawns `conn_num` worker threads, each dialing independently
    /// and invoking `handler` once connected. Blocks until every
    /// worker returns.
    pub fn run(self: &Arc<Self>, handler: impl Fn(Arc<Session>) + Send + Sync + Clone + 'static) -> Result<(), ClientError> {
        let handles: Vec<_> = (0..self.cfg.conn_num)
            .map(|worker| {
                let client = self.clone();
                let handler = handler.clone();
                std::thread::spawn(move || client.dial_and_run(worker, handler))
            })
            .collect();

        let mut first_err = None;
        for handle in handles {
            if let Ok(Err(e)) = handle.join()
                && first_err.is_none() {
                    first_err = Some(e);
                }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn dial_and_run(&self, worker: usize, handler: impl Fn(Arc<Session>)) -> Result<(), ClientError> {
        let mut last_err = None;
        for attempt in 1..=MAX_DIAL_TRIES {
            let dial_result = match self.cfg.timeout {
                Some(timeout) => {
                    let addr = self.cfg.addr.parse::<std::net::SocketAddr>().map_err(|_| {
                        std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("bad address {:?}", self.cfg.addr))
                    });
                    addr.and_then(|addr| TcpStream::connect_timeout(&addr, timeout))
                }
                None => TcpStream::connect(&self.cfg.addr),
            };

            match dial_result {
                Ok(conn) => {
                    tracing::info!(worker, addr = %self.cfg.addr, "dialed");
                    let (recv_codec, send_codec) =
                        build_session_codecs(&self.cfg.protocol_name, &self.cfg.protocol_config_json, conn)?;
                    let session = self.manager.new_session(recv_codec, send_codec, self.cfg.send_chan_size);
                    handler(session);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(worker, attempt, error = %e, "dial failed, retrying");
                    last_err = Some(e);
                    std::thread::sleep(DIAL_BACKOFF);
                }
            }
        }
        Err(ClientError::DialFailed {
            addr: self.cfg.addr.clone(),
            tries: MAX_DIAL_TRIES,
            source: last_err.unwrap(),
        })
    }

    pub fn close(&self) {
        self.manager.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    #[test]
    fn dial_and_exchange_one_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server_thread = std::thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut header = [0u8; 2];
            conn.read_exact(&mut header).unwrap();
            let len = u16::from_be_bytes(header) as usize;
            let mut body = vec![0u8; len];
            conn.read_exact(&mut body).unwrap();
            conn.write_all(&header).unwrap();
            conn.write_all(&body).unwrap();
        });

        let cfg = ClientConfig { addr: addr.to_string(), conn_num: 1, ..Default::default() };
        let client = Client::new(cfg);
        client
            .run(|session| {
                session.send(b"hi".to_vec()).unwrap();
                let reply = session.receive().unwrap();
                assert_eq!(reply, b"hi");
            })
            .unwrap();

        server_thread.join().unwrap();
    }
}
