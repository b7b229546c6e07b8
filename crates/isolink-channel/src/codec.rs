//! Wire codec seam.
//!
//! A codec turns an [`IsoMsg`] into payload bytes and back; framing (length
//! prefix, optional fixed header) stays in the channel so one codec works for
//! any transport. The default codec serializes the field map as JSON.

use bytes::Bytes;
use isolink_core::error::ChannelError;
use isolink_core::msg::IsoMsg;

/// Message payload encoder/decoder.
pub trait MsgCodec: Send + Sync {
    fn encode(&self, msg: &IsoMsg) -> Result<Bytes, ChannelError>;
    fn decode(&self, payload: &[u8]) -> Result<IsoMsg, ChannelError>;
}

/// Default codec: the message's field map as a JSON object.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl MsgCodec for JsonCodec {
    fn encode(&self, msg: &IsoMsg) -> Result<Bytes, ChannelError> {
        let payload = serde_json::to_vec(msg).map_err(|e| ChannelError::codec(e.to_string()))?;
        Ok(Bytes::from(payload))
    }

    fn decode(&self, payload: &[u8]) -> Result<IsoMsg, ChannelError> {
        serde_json::from_slice(payload).map_err(|e| ChannelError::codec(e.to_string()))
    }
}

/// Parses a configured header hex string into raw bytes.
pub fn parse_header(hex: &str) -> Result<Vec<u8>, ChannelError> {
    if hex.len() % 2 != 0 {
        return Err(ChannelError::codec("header hex must have even length"));
    }
    hex.as_bytes()
        .chunks(2)
        .enumerate()
        .map(|(i, pair)| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|digits| u8::from_str_radix(digits, 16).ok())
                .ok_or_else(|| {
                    ChannelError::codec(format!("invalid hex in header at offset {}", i * 2))
                })
        })
        .collect()
}
