use std::io::{BufReader, BufWriter, Read, Write};
use std::net::{Shutdown, TcpStream};

const MIN_BUF_SIZE: usize = 128;

/// A stream that can be shut down for both directions. Implemented for
/// `TcpStream` and threaded through `BufferedStream` so `FixlenCodec`
/// can close the underlying socket regardless of whether it sits
/// directly on the wire or behind a buffered layer.
pub trait Closable {
    fn shutdown(&mut self) -> std::io::Result<()>;
}

impl Closable for TcpStream {
    fn shutdown(&mut self) -> std::io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

/// A stream that can hand out a second independent handle to the same
/// connection, the way `TcpStream::try_clone` does (duplicating the
/// file descriptor, not the read/write state).
pub trait CloneStream: Sized {
    fn try_clone_stream(&self) -> std::io::Result<Self>;
}

impl CloneStream for TcpStream {
    fn try_clone_stream(&self) -> std::io::Result<Self> {
        self.try_clone()
    }
}

/// Configuration for the buffered-IO wrapper. Sizes below `MIN_BUF_SIZE`
/// are rounded up, matching the original source's minimum.
#[derive(Debug, Clone, Copy)]
pub struct BufioConfig {
    pub read_size: usize,
    pub write_size: usize,
}

impl BufioConfig {
    pub fn new(read_size: usize, write_size: usize) -> Self {
        Self {
            read_size: read_size.max(MIN_BUF_SIZE),
            write_size: write_size.max(MIN_BUF_SIZE),
        }
    }
}

impl Default for BufioConfig {
    fn default() -> Self {
        Self::new(MIN_BUF_SIZE, MIN_BUF_SIZE)
    }
}

/// A `Read + Write` stream wrapper applying the configured buffer
/// sizes, meant to sit directly on the raw socket beneath a `FixlenCodec`.
/// `FixlenCodec::send` flushes the stream after every write, so a
/// buffered stream still delivers flush-on-send semantics.
///
/// The reader and writer halves hold independent handles (via
/// `try_clone_stream`) to the same connection, since `TcpStream` has
/// no single owned value that is both `Read` and `Write` through a
/// shared handle without `Clone`.
pub struct BufferedStream<S: Read + Write> {
    reader: BufReader<S>,
    writer: BufWriter<S>,
}

impl<S: Read + Write + CloneStream> BufferedStream<S> {
    pub fn new(stream: S, cfg: BufioConfig) -> std::io::Result<Self> {
        let read_half = stream.try_clone_stream()?;
        Ok(Self {
            reader: BufReader::with_capacity(cfg.read_size, read_half),
            writer: BufWriter::with_capacity(cfg.write_size, stream),
        })
    }
}

impl<S: Read + Write> Read for BufferedStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.reader.read(buf)
    }
}

impl<S: Read + Write> Write for BufferedStream<S> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

impl<S: Read + Write + Closable> Closable for BufferedStream<S> {
    fn shutdown(&mut self) -> std::io::Result<()> {
        self.writer.flush()?;
        self.writer.get_mut().shutdown()
    }
}
