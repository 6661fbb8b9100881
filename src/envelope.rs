//! Wire envelopes
//!
//! Every application message on a connection is one envelope: a call, a
//! reply, or an application-level close marker. Argument and value blobs
//! are opaque to the runtime and travel base64-encoded inside the JSON
//! form.

use serde::{Deserialize, Serialize};

use crate::identity::{ActorId, CallId};

/// The tagged wire message exchanged between nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tag")]
pub enum Envelope {
    /// A method invocation addressed at a remote actor.
    #[serde(rename = "call")]
    Call {
        #[serde(rename = "callID")]
        call_id: CallId,
        recipient: ActorId,
        /// Opaque method mangling; the runtime never interprets it.
        #[serde(rename = "invocationTarget")]
        invocation_target: String,
        /// Generic-type substitutions for the invocation target.
        #[serde(rename = "genericSubs")]
        generic_subs: Vec<String>,
        /// Already-encoded argument blobs, in declaration order.
        #[serde(with = "base64_blobs")]
        args: Vec<Vec<u8>>,
    },

    /// The result of a call, correlated by call id. An empty `value`
    /// stands for void returns and for suppressed errors alike.
    #[serde(rename = "reply")]
    Reply {
        #[serde(rename = "callID")]
        call_id: CallId,
        #[serde(default)]
        sender: Option<ActorId>,
        #[serde(with = "base64_blob")]
        value: Vec<u8>,
    },

    /// Application-level close marker.
    #[serde(rename = "connectionClose")]
    ConnectionClose,
}

mod base64_blob {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text.as_bytes()).map_err(serde::de::Error::custom)
    }
}

mod base64_blobs {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(blobs: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(blobs.len()))?;
        for blob in blobs {
            seq.serialize_element(&STANDARD.encode(blob))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Vec<u8>>, D::Error> {
        let texts = Vec::<String>::deserialize(deserializer)?;
        texts
            .into_iter()
            .map(|t| STANDARD.decode(t.as_bytes()).map_err(serde::de::Error::custom))
            .collect()
    }
}
