use std::io::{Read, Write};

use crate::bufio::Closable;
use crate::codec::{ByteOrder, Codec};
use crate::error::ProtocolError;

/// Default max body size for a header width, matching the signed
/// integer range representable by that many bytes.
fn default_max(n: usize) -> usize {
    match n {
        1 => i8::MAX as usize,
        2 => i16::MAX as usize,
        4 => i32::MAX as usize,
        8 => i64::MAX as usize,
        _ => unreachable!(),
    }
}

fn encode_header(n: usize, order: ByteOrder, len: usize) -> Result<Vec<u8>, ProtocolError> {
    Ok(match (n, order) {
        (1, _) => vec![len as u8],
        (2, ByteOrder::Big) => (len as u16).to_be_bytes().to_vec(),
        (2, ByteOrder::Little) => (len as u16).to_le_bytes().to_vec(),
        (4, ByteOrder::Big) => (len as u32).to_be_bytes().to_vec(),
        (4, ByteOrder::Little) => (len as u32).to_le_bytes().to_vec(),
        (8, ByteOrder::Big) => (len as u64).to_be_bytes().to_vec(),
        (8, ByteOrder::Little) => (len as u64).to_le_bytes().to_vec(),
        _ => return Err(ProtocolError::InvalidHeaderWidth(n)),
    })
}

fn decode_header(n: usize, order: ByteOrder, header: &[u8]) -> Result<usize, ProtocolError> {
    Ok(match (n, order) {
        (1, _) => header[0] as usize,
        (2, ByteOrder::Big) => u16::from_be_bytes([header[0], header[1]]) as usize,
        (2, ByteOrder::Little) => u16::from_le_bytes([header[0], header[1]]) as usize,
        (4, ByteOrder::Big) => u32::from_be_bytes(header.try_into().unwrap()) as usize,
        (4, ByteOrder::Little) => u32::from_le_bytes(header.try_into().unwrap()) as usize,
        (8, ByteOrder::Big) => u64::from_be_bytes(header.try_into().unwrap()) as usize,
        (8, ByteOrder::Little) => u64::from_le_bytes(header.try_into().unwrap()) as usize,
        _ => return Err(ProtocolError::InvalidHeaderWidth(n)),
    })
}

/// Configuration for the length-prefix framer. See `fixlen` in the
/// pipeline configuration keys.
#[derive(Debug, Clone)]
pub struct FixlenConfig {
    pub n: usize,
    pub byte_order: ByteOrder,
    pub max_send: usize,
    pub max_recv: usize,
}

impl FixlenConfig {
    pub fn new(n: usize, byte_order: ByteOrder, max_send: usize, max_recv: usize) -> Result<Self, ProtocolError> {
        if !matches!(n, 1 | 2 | 4 | 8) {
            return Err(ProtocolError::InvalidHeaderWidth(n));
        }
        Ok(Self {
            n,
            byte_order,
            max_send: if max_send == 0 { default_max(n) } else { max_send },
            max_recv: if max_recv == 0 { default_max(n) } else { max_recv },
        })
    }
}

impl Default for FixlenConfig {
    fn default() -> Self {
        Self::new(2, ByteOrder::Big, 0, 0).expect("n=2 is always valid")
    }
}

/// Length-prefix framer: `[n-byte header = body length][body]`.
///
/// Wraps any `Read + Write` stream directly, or another `Codec` as its
/// inner layer (the body bytes become that codec's wire bytes).
pub struct FixlenCodec<S> {
    stream: S,
    cfg: FixlenConfig,
    body_buf: Vec<u8>,
}

impl<S: Read + Write + Send + Closable> FixlenCodec<S> {
    pub fn new(stream: S, cfg: FixlenConfig) -> Self {
        Self { stream, cfg, body_buf: Vec::new() }
    }
}

impl<S: Read + Write + Send + Closable> Codec for FixlenCodec<S> {
    fn receive(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let mut header = vec![0u8; self.cfg.n];
        self.stream.read_exact(&mut header)?;
        let len = decode_header(self.cfg.n, self.cfg.byte_order, &header)?;
        if len > self.cfg.max_recv {
            return Err(ProtocolError::FrameTooLarge { len, max: self.cfg.max_recv });
        }
        if self.body_buf.len() < len {
            self.body_buf.resize(len + 128, 0);
        }
        let body = &mut self.body_buf[..len];
        self.stream.read_exact(body)?;
        Ok(body.to_vec())
    }

    fn send(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        if data.len() > self.cfg.max_send {
            return Err(ProtocolError::SendTooLarge { len: data.len(), max: self.cfg.max_send });
        }
        let header = encode_header(self.cfg.n, self.cfg.byte_order, data.len())?;
        let mut frame = Vec::with_capacity(header.len() + data.len());
        frame.extend_from_slice(&header);
        frame.extend_from_slice(data);
        self.stream.write_all(&frame)?;
        self.stream.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), ProtocolError> {
        self.stream.shutdown()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[derive(Default)]
    struct DuplexBuf {
        written: Vec<u8>,
        to_read: Cursor<Vec<u8>>,
    }

    impl Read for DuplexBuf {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.to_read.read(buf)
        }
    }
    impl Write for DuplexBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
    impl Closable for DuplexBuf {
        fn shutdown(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn wire_byte_count_equals_header_plus_body() {
        let cfg = FixlenConfig::new(2, ByteOrder::Big, 0, 0).unwrap();
        let mut codec = FixlenCodec::new(DuplexBuf::default(), cfg);
        let payload = vec![0x79u8, 0x6B, 0x66, 0x31, 0x32, 0x33];
        codec.send(&payload).unwrap();
        assert_eq!(codec.stream.written, vec![0x00, 0x06, 0x79, 0x6B, 0x66, 0x31, 0x32, 0x33]);
    }

    #[test]
    fn receive_rejects_oversized_frame() {
        let cfg = FixlenConfig::new(2, ByteOrder::Big, 0, 4).unwrap();
        let header = 10u16.to_be_bytes();
        let stream = DuplexBuf { to_read: Cursor::new(header.to_vec()), ..Default::default() };
        let mut codec = FixlenCodec::new(stream, cfg);
        assert!(matches!(codec.receive(), Err(ProtocolError::FrameTooLarge { len: 10, max: 4 })));
    }
}
