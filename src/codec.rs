//! Envelope codec seam
//!
//! The runtime encodes envelopes to text frames through this trait so the
//! wire format can be swapped without touching routing. JSON is the
//! default.

use crate::envelope::Envelope;
use crate::error::{ActorSystemError, Result};

/// Encoder/decoder pair for wire envelopes.
pub trait WireCodec: Send + Sync + 'static {
    /// Encode an envelope into one text frame payload.
    fn encode(&self, envelope: &Envelope) -> Result<String>;

    /// Decode one text frame payload into an envelope.
    fn decode(&self, text: &str) -> Result<Envelope>;
}

/// The default JSON envelope codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl WireCodec for JsonCodec {
    fn encode(&self, envelope: &Envelope) -> Result<String> {
        serde_json::to_string(envelope).map_err(ActorSystemError::encoding)
    }

    fn decode(&self, text: &str) -> Result<Envelope> {
        serde_json::from_str(text).map_err(ActorSystemError::decoding)
    }
}
