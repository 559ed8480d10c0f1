//! Wire envelope exchanged with the broker.
//!
//! Every frame on the WebSocket is a JSON object of the shape
//! `{"command": ..., "id": ..., "replyto"?: ..., "data": "...",
//! "index"?: n, "count"?: n}`. `data` is itself a JSON document encoded
//! as a string; its shape depends on `command`. Large payloads are split
//! over several envelopes sharing the same `id` (and `replyto`), each
//! carrying its `index` and the total `count`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Command names understood by the broker.
pub mod commands {
    pub const PING: &str = "ping";
    pub const SIGNIN: &str = "signin";
    pub const REGISTER_QUEUE: &str = "registerqueue";
    pub const CLOSE_QUEUE: &str = "closequeue";
    pub const QUEUE_MESSAGE: &str = "queuemessage";
    pub const QUERY: &str = "query";
    pub const INSERT_ONE: &str = "insertone";
    pub const UPDATE_ONE: &str = "updateone";
    pub const DELETE_ONE: &str = "deleteone";
    pub const ERROR: &str = "error";
}

/// Smallest chunk size accepted by [`Envelope::split`]; guarantees every
/// chunk can hold at least one UTF-8 character.
const MIN_CHUNK_BYTES: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub command: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replyto: Option<String>,
    #[serde(default)]
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
}

impl Envelope {
    /// Generate a fresh envelope id.
    pub fn new_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Build an envelope with a fresh id.
    pub fn new(command: impl Into<String>, data: impl Into<String>) -> Self {
        Self::with_id(Self::new_id(), command, data)
    }

    pub fn with_id(id: impl Into<String>, command: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            id: id.into(),
            replyto: None,
            data: data.into(),
            index: None,
            count: None,
        }
    }

    /// Build an envelope whose `data` is the JSON encoding of `payload`.
    pub fn with_payload<T: Serialize + ?Sized>(
        command: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(command, serde_json::to_string(payload)?))
    }

    /// A liveness ping carrying an empty JSON object.
    pub fn ping() -> Self {
        Self::new(commands::PING, "{}")
    }

    /// A reply to `self`, with a fresh id and `replyto` set to `self.id`.
    pub fn reply(&self, command: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            replyto: Some(self.id.clone()),
            ..Self::new(command, data)
        }
    }

    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Total number of chunks this envelope belongs to (at least one).
    pub fn chunk_count(&self) -> u32 {
        self.count.unwrap_or(1).max(1)
    }

    pub fn chunk_index(&self) -> u32 {
        self.index.unwrap_or(0)
    }

    pub fn is_chunked(&self) -> bool {
        self.chunk_count() > 1
    }

    /// Split the payload into envelopes of at most `max_bytes` of `data`
    /// each. Splits only on UTF-8 character boundaries. A payload that
    /// already fits is returned unchanged.
    pub fn split(self, max_bytes: usize) -> Vec<Envelope> {
        let max_bytes = max_bytes.max(MIN_CHUNK_BYTES);
        if self.data.len() <= max_bytes {
            return vec![self];
        }

        let mut parts = Vec::new();
        let mut rest = self.data.as_str();
        while !rest.is_empty() {
            let mut cut = max_bytes.min(rest.len());
            while !rest.is_char_boundary(cut) {
                cut -= 1;
            }
            let (head, tail) = rest.split_at(cut);
            parts.push(head.to_string());
            rest = tail;
        }

        let count = u32::try_from(parts.len()).unwrap_or(u32::MAX);
        parts
            .into_iter()
            .zip(0u32..)
            .map(|(data, index)| Envelope {
                command: self.command.clone(),
                id: self.id.clone(),
                replyto: self.replyto.clone(),
                data,
                index: Some(index),
                count: Some(count),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// ChunkBuffer
// ---------------------------------------------------------------------------

/// Reassembles the fragments of one chunked payload.
///
/// Fragments may arrive in any order; the payload is complete once every
/// index in `0..count` has been seen.
#[derive(Debug)]
pub struct ChunkBuffer {
    count: u32,
    parts: BTreeMap<u32, String>,
}

impl ChunkBuffer {
    pub fn new(count: u32) -> Self {
        Self {
            count: count.max(1),
            parts: BTreeMap::new(),
        }
    }

    /// Store one fragment. Returns the concatenated payload, in index
    /// order, once all fragments are present. Out-of-range indices are
    /// ignored.
    pub fn insert(&mut self, index: u32, data: &str) -> Option<String> {
        if index >= self.count {
            tracing::warn!(index, count = self.count, "Ignoring out-of-range chunk");
            return None;
        }
        self.parts.insert(index, data.to_string());
        if self.parts.len() == self.count as usize {
            Some(std::mem::take(&mut self.parts).into_values().collect())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_fields_are_omitted_on_the_wire() {
        let env = Envelope::with_id("abc", commands::PING, "{}");
        let json = env.to_json().unwrap();
        assert_eq!(json, r#"{"command":"ping","id":"abc","data":"{}"}"#);
    }

    #[test]
    fn parse_reply_with_chunk_fields() {
        let env = Envelope::parse(
            r#"{"command":"query","id":"r1","replyto":"q1","data":"[1,","index":0,"count":2}"#,
        )
        .unwrap();
        assert_eq!(env.replyto.as_deref(), Some("q1"));
        assert_eq!(env.chunk_index(), 0);
        assert_eq!(env.chunk_count(), 2);
        assert!(env.is_chunked());
    }

    #[test]
    fn parse_without_data_defaults_to_empty() {
        let env = Envelope::parse(r#"{"command":"ping","id":"p"}"#).unwrap();
        assert_eq!(env.data, "");
        assert!(!env.is_chunked());
    }

    #[test]
    fn reply_points_at_request() {
        let request = Envelope::new(commands::QUERY, "{}");
        let reply = request.reply(commands::QUERY, "{\"result\":[]}");
        assert_eq!(reply.replyto.as_deref(), Some(request.id.as_str()));
        assert_ne!(reply.id, request.id);
    }

    #[test]
    fn small_payload_is_not_split() {
        let env = Envelope::new(commands::QUERY, "short");
        let parts = env.clone().split(64);
        assert_eq!(parts, vec![env]);
    }

    #[test]
    fn split_respects_char_boundaries_and_reassembles() {
        let data = "héllo wörld ✓ ".repeat(20);
        let env = Envelope::new(commands::INSERT_ONE, data.clone());
        let parts = env.clone().split(7);

        assert!(parts.len() > 1);
        let count = parts.len() as u32;
        for (i, part) in parts.iter().enumerate() {
            assert_eq!(part.id, env.id);
            assert_eq!(part.index, Some(i as u32));
            assert_eq!(part.count, Some(count));
            assert!(part.data.len() <= 7);
        }

        let mut buffer = ChunkBuffer::new(count);
        let mut assembled = None;
        for part in parts.iter().rev() {
            assembled = buffer.insert(part.chunk_index(), &part.data);
        }
        assert_eq!(assembled, Some(data));
    }

    #[test]
    fn chunk_buffer_waits_for_every_index() {
        let mut buffer = ChunkBuffer::new(3);
        assert_eq!(buffer.insert(2, "c"), None);
        assert_eq!(buffer.insert(0, "a"), None);
        // Duplicate delivery does not complete the payload.
        assert_eq!(buffer.insert(0, "a"), None);
        assert_eq!(buffer.insert(1, "b"), Some("abc".to_string()));
    }

    #[test]
    fn chunk_buffer_ignores_out_of_range_index() {
        let mut buffer = ChunkBuffer::new(2);
        assert_eq!(buffer.insert(5, "x"), None);
        assert_eq!(buffer.insert(0, "a"), None);
        assert_eq!(buffer.insert(1, "b"), Some("ab".to_string()));
    }
}
