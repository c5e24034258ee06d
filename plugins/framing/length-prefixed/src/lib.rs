//! Convenience builder for the `fixlen` pipeline configuration key,
//! so callers can assemble the JSON config without hand-writing it.

use serde_json::json;
use session_api::{ByteOrder, ProtocolError};

#[derive(Debug, Clone, Copy)]
pub struct FixlenOptions {
    pub n: usize,
    pub byte_order: ByteOrder,
    pub max_send: usize,
    pub max_recv: usize,
}

impl Default for FixlenOptions {
    fn default() -> Self {
        Self { n: 2, byte_order: ByteOrder::Big, max_send: 0, max_recv: 0 }
    }
}

impl FixlenOptions {
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if !matches!(self.n, 1 | 2 | 4 | 8) {
            return Err(ProtocolError::InvalidHeaderWidth(self.n));
        }
        Ok(())
    }

    /// Renders the `{"fixlen": {...}}` pipeline configuration object
    /// consumed by `session_api::build_pipeline`/`build_session_codecs`.
    pub fn to_config_json(self) -> Result<String, ProtocolError> {
        self.validate()?;
        let byte_order = match self.byte_order {
            ByteOrder::Big => "big_endian",
            ByteOrder::Little => "little_endian",
        };
        let config = json!({
            "fixlen": {
                "n": self.n,
                "byte_order": byte_order,
                "max_send": self.max_send,
                "max_recv": self.max_recv,
            }
        });
        Ok(config.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_header_width() {
        let opts = FixlenOptions { n: 3, ..Default::default() };
        assert!(opts.to_config_json().is_err());
    }

    #[test]
    fn renders_expected_config_shape() {
        let opts = FixlenOptions { n: 4, byte_order: ByteOrder::Little, max_send: 1000, max_recv: 2000 };
        let json = opts.to_config_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["fixlen"]["n"], 4);
        assert_eq!(value["fixlen"]["byte_order"], "little_endian");
    }
}
