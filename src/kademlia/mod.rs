// src/kademlia/mod.rs
//
// Kademlia protocol layer: routing table, iterative lookup state, and
// the node that ties both to the messaging layer in `base_node`.

pub mod finder;
pub mod node;
pub mod table;

pub use node::{GetResult, KademliaConfig, KademliaNode, PingOutcome};
pub use table::BucketEntry;
