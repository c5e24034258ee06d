use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::{Mutex, OnceLock};

use serde::Deserialize;

use crate::bufio::{BufioConfig, BufferedStream, Closable};
use crate::codec::{ByteOrder, Codec};
use crate::error::ProtocolError;
use crate::framer::{FixlenCodec, FixlenConfig};

/// A stream that can be framed and eventually shut down, erased to a
/// trait object so the optional buffered layer and the raw socket can
/// be handed to a base protocol factory uniformly.
pub trait ReadWriteClosable: Read + Write + Closable + Send {}
impl<T: Read + Write + Closable + Send> ReadWriteClosable for T {}

/// Builds the base codec for a registered protocol name over a
/// (possibly buffered) stream. `fixlen` is `Some` only when the
/// pipeline config carried a `fixlen` key; a factory for a protocol
/// that is itself a framer (`fixlen`/`stream`) should fall back to
/// `FixlenConfig::default()`, while a self-delimiting base protocol
/// (`binary`/`json`) ignores it — framing is never implied by name.
pub type BaseFactory =
    Box<dyn Fn(Box<dyn ReadWriteClosable>, Option<FixlenConfig>) -> Box<dyn Codec> + Send + Sync>;

fn registry() -> &'static Mutex<HashMap<String, BaseFactory>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, BaseFactory>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Registers a named base protocol factory. Panics on a duplicate
/// name — a fatal programming error, matching the source's
/// "Protocol:Register called twice for adapter" behavior.
pub fn register_protocol(name: &str, factory: BaseFactory) {
    let mut reg = registry().lock().unwrap();
    if reg.contains_key(name) {
        panic!("protocol {name:?} already registered");
    }
    reg.insert(name.to_string(), factory);
}

fn ensure_builtins_registered() {
    static INIT: OnceLock<()> = OnceLock::new();
    INIT.get_or_init(|| {
        let fixlen_factory: BaseFactory = Box::new(|stream, cfg| {
            Box::new(FixlenCodec::new(stream, cfg.unwrap_or_default())) as Box<dyn Codec>
        });
        register_protocol("fixlen", fixlen_factory);
        // "stream" is an alias kept for source compatibility; same framer.
        let stream_factory: BaseFactory = Box::new(|stream, cfg| {
            Box::new(FixlenCodec::new(stream, cfg.unwrap_or_default())) as Box<dyn Codec>
        });
        register_protocol("stream", stream_factory);
        let binary_factory: BaseFactory = Box::new(|stream, _cfg| Box::new(RawCodec::new(stream)) as Box<dyn Codec>);
        register_protocol("binary", binary_factory);
        let json_factory: BaseFactory = Box::new(|stream, _cfg| Box::new(JsonValueCodec::new(stream)) as Box<dyn Codec>);
        register_protocol("json", json_factory);
    });
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FixlenKeyConfig {
    n: Option<usize>,
    max_send: Option<usize>,
    max_recv: Option<usize>,
    byte_order: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BufioKeyConfig {
    read_size: Option<usize>,
    write_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PipelineConfig {
    fixlen: Option<FixlenKeyConfig>,
    bufio: Option<BufioKeyConfig>,
}

/// Builds a ready-to-use `Codec` over `conn` for the named base
/// protocol, optionally wrapped in buffered I/O per the `bufio` key
/// and, if present, framed per the `fixlen` key. A protocol whose base
/// factory ignores the fixlen parameter (e.g. `binary`/`json`) is
/// never framed regardless of this key; see the pipeline configuration
/// keys for the full key reference.
pub fn build_pipeline(name: &str, config_json: &str, conn: TcpStream) -> Result<Box<dyn Codec>, ProtocolError> {
    ensure_builtins_registered();

    let cfg: PipelineConfig = if config_json.trim().is_empty() {
        PipelineConfig::default()
    } else {
        serde_json::from_str(config_json)?
    };

    let stream: Box<dyn ReadWriteClosable> = match &cfg.bufio {
        Some(b) => {
            let bufio_cfg = BufioConfig::new(b.read_size.unwrap_or(128), b.write_size.unwrap_or(128));
            Box::new(BufferedStream::new(conn, bufio_cfg)?)
        }
        None => Box::new(conn),
    };

    let fixlen_cfg = match &cfg.fixlen {
        Some(f) => {
            let order = match &f.byte_order {
                Some(s) => ByteOrder::parse(s)?,
                None => ByteOrder::Big,
            };
            Some(FixlenConfig::new(f.n.unwrap_or(2), order, f.max_send.unwrap_or(0), f.max_recv.unwrap_or(0))?)
        }
        None => None,
    };

    let reg = registry().lock().unwrap();
    let factory = reg
        .get(name)
        .ok_or_else(|| ProtocolError::UnknownProtocol(name.to_string()))?;
    Ok(factory(stream, fixlen_cfg))
}

/// A session's receive-side and send-side codec, each over an
/// independent handle to the same connection.
pub type SessionCodecs = (Box<dyn Codec>, Box<dyn Codec>);

/// Clones `conn` and builds one codec per handle so a session can
/// receive and send concurrently without sharing a lock across both
/// directions. Both codecs see the same `name`/`config_json` pipeline.
pub fn build_session_codecs(
    name: &str,
    config_json: &str,
    conn: TcpStream,
) -> Result<SessionCodecs, ProtocolError> {
    let send_half = conn.try_clone()?;
    let recv_codec = build_pipeline(name, config_json, conn)?;
    let send_codec = build_pipeline(name, config_json, send_half)?;
    Ok((recv_codec, send_codec))
}

impl<C: Closable + ?Sized> Closable for Box<C> {
    fn shutdown(&mut self) -> std::io::Result<()> {
        (**self).shutdown()
    }
}

/// Raw pass-through base protocol: `receive` returns whatever bytes a
/// single underlying `read` produces, `send` writes the bytes as-is.
/// No framing, no delimiting — the caller owns message boundaries.
/// Registered as `"binary"`.
struct RawCodec<S> {
    stream: S,
    buf: Vec<u8>,
}

impl<S: Read + Write + Send + Closable> RawCodec<S> {
    fn new(stream: S) -> Self {
        Self { stream, buf: vec![0u8; 4096] }
    }
}

impl<S: Read + Write + Send + Closable> Codec for RawCodec<S> {
    fn receive(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let n = self.stream.read(&mut self.buf)?;
        if n == 0 {
            return Err(ProtocolError::Io(std::io::Error::from(std::io::ErrorKind::UnexpectedEof)));
        }
        Ok(self.buf[..n].to_vec())
    }

    fn send(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        self.stream.write_all(data)?;
        self.stream.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), ProtocolError> {
        self.stream.shutdown()?;
        Ok(())
    }
}

/// Self-delimiting JSON base protocol: reads exactly one JSON value per
/// `receive()` without over-consuming trailing bytes, mirroring Go's
/// `json.Decoder` incremental tokenizer. `send` writes the caller's
/// already-serialized JSON bytes directly onto the stream — callers
/// are expected to serialize through `format-json` or `serde_json`
/// before calling `Session::send`. Registered as `"json"`.
struct JsonValueCodec<S> {
    stream: S,
}

impl<S: Read + Write + Send + Closable> JsonValueCodec<S> {
    fn new(stream: S) -> Self {
        Self { stream }
    }
}

impl<S: Read + Write + Send + Closable> Codec for JsonValueCodec<S> {
    fn receive(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let mut de = serde_json::Deserializer::from_reader(&mut self.stream).into_iter::<serde_json::Value>();
        match de.next() {
            Some(Ok(value)) => Ok(serde_json::to_vec(&value)?),
            Some(Err(e)) => Err(e.into()),
            None => Err(ProtocolError::Io(std::io::Error::from(std::io::ErrorKind::UnexpectedEof))),
        }
    }

    fn send(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        self.stream.write_all(data)?;
        self.stream.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), ProtocolError> {
        self.stream.shutdown()?;
        Ok(())
    }
}
