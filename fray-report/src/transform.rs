// fray-report/src/transform.rs
//! Reversible string transforms applied to text and byte payloads on
//! serialization, so arbitrary binary content survives a plain-text channel.

use std::fmt;

use base64::Engine as _;

use crate::ReportError;

/// A reversible bytes-to-text transform.
pub trait StringTransform: fmt::Debug + Send + Sync {
    fn encode(&self, data: &[u8]) -> String;
    fn decode(&self, text: &str) -> Result<Vec<u8>, ReportError>;
}

/// The default transform.
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64Transform;

impl StringTransform for Base64Transform {
    fn encode(&self, data: &[u8]) -> String {
        base64::engine::general_purpose::STANDARD.encode(data)
    }

    fn decode(&self, text: &str) -> Result<Vec<u8>, ReportError> {
        base64::engine::general_purpose::STANDARD
            .decode(text)
            .map_err(|e| ReportError::Transform(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HexTransform;

impl StringTransform for HexTransform {
    fn encode(&self, data: &[u8]) -> String {
        hex::encode(data)
    }

    fn decode(&self, text: &str) -> Result<Vec<u8>, ReportError> {
        hex::decode(text).map_err(|e| ReportError::Transform(e.to_string()))
    }
}
