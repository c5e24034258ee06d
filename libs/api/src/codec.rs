use crate::error::ProtocolError;

/// A session-scoped byte-level message port.
///
/// One instance belongs to exactly one session. Implementations sit at
/// any layer of the pipeline (raw stream, length-framed, buffered) and
/// wrap the layer beneath them.
pub trait Codec: Send {
    fn receive(&mut self) -> Result<Vec<u8>, ProtocolError>;
    fn send(&mut self, data: &[u8]) -> Result<(), ProtocolError>;
    fn close(&mut self) -> Result<(), ProtocolError>;
}

impl<C: Codec + ?Sized> Codec for Box<C> {
    fn receive(&mut self) -> Result<Vec<u8>, ProtocolError> {
        (**self).receive()
    }
    fn send(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        (**self).send(data)
    }
    fn close(&mut self) -> Result<(), ProtocolError> {
        (**self).close()
    }
}

/// Byte order for fixed-width length headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(Default)]
pub enum ByteOrder {
    #[default]
    Big,
    Little,
}

impl ByteOrder {
    pub fn parse(s: &str) -> Result<Self, ProtocolError> {
        match s {
            "big_endian" | "big" | "be" => Ok(ByteOrder::Big),
            "little_endian" | "little" | "le" => Ok(ByteOrder::Little),
            other => Err(ProtocolError::InvalidByteOrder(other.to_string())),
        }
    }
}


/// Derives a Go-source-compatible type name from a fully qualified path:
/// the second-to-last and last `::`-separated segments, joined by `_`.
///
/// This is offered as a convenience for callers that want names
/// consistent with the original reflection-based scheme; the primary
/// registration path takes an explicit name instead.
pub fn derive_type_name(qualified_path: &str) -> String {
    let segments: Vec<&str> = qualified_path.split("::").collect();
    match segments.len() {
        0 => String::new(),
        1 => segments[0].to_string(),
        n => format!("{}_{}", segments[n - 2], segments[n - 1]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_second_to_last_and_last_segment() {
        assert_eq!(derive_type_name("myapp::proto::Member"), "proto_Member");
        assert_eq!(derive_type_name("Member"), "Member");
        assert_eq!(derive_type_name(""), "");
    }
}
