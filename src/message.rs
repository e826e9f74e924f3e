// src/message.rs
//
// The on-wire envelope every node exchanges through the simulated network,
// plus the three tagged-union request/response records it carries. The
// envelope is a value type; the network owns transfer semantics (delivery,
// hop counting, byte-budget accounting).

use serde::{Deserialize, Serialize};

use crate::key::Key;

pub type Address = u32;
pub type Tag = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    Ping,
    FindNodes,
    Store,
}

/// Typed envelope. `payload` is the bincode encoding of the
/// `MessageType`-appropriate wire record (§6 of the spec).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageType,
    pub originator: Address,
    pub destination: Address,
    pub tag: Tag,
    pub hops: u32,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(
        kind: MessageType,
        originator: Address,
        destination: Address,
        tag: Tag,
        payload: Vec<u8>,
    ) -> Self {
        Message {
            kind,
            originator,
            destination,
            tag,
            hops: 0,
            payload,
        }
    }

    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}

/// Wire record for `BucketEntry` as exchanged over `FindNodesMessage`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireBucketEntry {
    pub key: Key,
    pub address: Address,
    pub last_seen: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PingMessage {
    pub is_ping: bool,
    pub sender: Key,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FindNodesMessage {
    pub sender: Key,
    pub is_request: bool,
    pub find_value: bool,
    pub target: Key,
    pub nearest: Vec<WireBucketEntry>,
    pub value_found: bool,
    pub value: Vec<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreMessage {
    pub is_request: bool,
    pub sender: Key,
    pub value: Vec<u8>,
}

/// Encodes a wire record to bytes. Deterministic and round-trippable, as
/// required by the spec's external-interfaces section.
pub fn encode<T: Serialize>(record: &T) -> Vec<u8> {
    bincode::serialize(record).expect("wire records are always serializable")
}

pub fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Option<T> {
    bincode::deserialize(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_message_round_trips() {
        let m = PingMessage {
            is_ping: true,
            sender: Key::random(),
        };
        let bytes = encode(&m);
        let back: PingMessage = decode(&bytes).unwrap();
        assert_eq!(m.is_ping, back.is_ping);
        assert_eq!(m.sender, back.sender);
    }

    #[test]
    fn malformed_payload_fails_to_decode() {
        let garbage = vec![0xFFu8; 3];
        let result: Option<PingMessage> = decode(&garbage);
        assert!(result.is_none());
    }

    #[test]
    fn find_nodes_message_round_trips_with_nearest_list() {
        let m = FindNodesMessage {
            sender: Key::random(),
            is_request: false,
            find_value: true,
            target: Key::random(),
            nearest: vec![WireBucketEntry {
                key: Key::random(),
                address: 7,
                last_seen: 123,
            }],
            value_found: true,
            value: b"hello".to_vec(),
        };
        let bytes = encode(&m);
        let back: FindNodesMessage = decode(&bytes).unwrap();
        assert_eq!(back.nearest.len(), 1);
        assert_eq!(back.nearest[0].address, 7);
        assert_eq!(back.value, b"hello");
    }
}
