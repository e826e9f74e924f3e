// src/network.rs
//
// Centralized simulated network: owns address assignment, advances the
// global tick, and routes messages between inhabitants subject to a
// per-link byte budget (spec.md §4.1).

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::message::Address;
use crate::node::Node;

const ADDRESS_ASSIGN_ATTEMPTS: u32 = 1000;

/// Per-tick summary the experiment harness uses for the `[E] T` output
/// line (spec.md §6).
#[derive(Debug, Default, Clone, Copy)]
pub struct TickReport {
    pub delivered: u64,
    pub delivered_bytes: u64,
    pub dropped_oversized: u64,
    pub re_enqueued: u64,
}

pub struct Network {
    nodes: BTreeMap<Address, Box<dyn Node>>,
    epoch: u64,
    link_limit: usize,
}

impl Network {
    pub fn new(link_limit: usize) -> Self {
        Network {
            nodes: BTreeMap::new(),
            epoch: 0,
            link_limit,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.nodes.keys().copied().collect()
    }

    pub fn get(&self, address: Address) -> Option<&dyn Node> {
        self.nodes.get(&address).map(|b| b.as_ref())
    }

    pub fn get_mut(&mut self, address: Address) -> Option<&mut (dyn Node + 'static)> {
        self.nodes.get_mut(&address).map(|b| b.as_mut())
    }

    /// Assigns a fresh non-zero address by rejection sampling and inserts
    /// `node`. Returns `0` if no free address was found within the attempt
    /// budget (spec.md §4.1, "Address exhaustion").
    pub fn add(&mut self, mut node: Box<dyn Node>) -> Address {
        for _ in 0..ADDRESS_ASSIGN_ATTEMPTS {
            let candidate = crate::rng::next_u64() as u32;
            if candidate == 0 || self.nodes.contains_key(&candidate) {
                continue;
            }
            node.set_address(candidate);
            node.tick(self.epoch);
            self.nodes.insert(candidate, node);
            return candidate;
        }
        0
    }

    pub fn remove(&mut self, address: Address) -> Option<Box<dyn Node>> {
        self.nodes.remove(&address)
    }

    /// Advances the global epoch and runs one full round: each inhabitant
    /// ticks, then drains its outbound queue under the link budget, with
    /// accepted messages delivered (hop-incremented) to their destination.
    pub fn tick(&mut self) -> TickReport {
        self.epoch += 1;
        let epoch = self.epoch;
        let mut report = TickReport::default();

        let addresses: Vec<Address> = self.nodes.keys().copied().collect();
        for address in addresses {
            if let Some(node) = self.nodes.get_mut(&address) {
                node.tick(epoch);
            }
            self.drain_outbound(address, &mut report);
        }
        report
    }

    fn drain_outbound(&mut self, address: Address, report: &mut TickReport) {
        let mut budget_used = 0usize;
        loop {
            let Some(node) = self.nodes.get_mut(&address) else {
                return;
            };
            let Some(mut message) = node.unqueue_out() else {
                return;
            };

            let len = message.payload_len();
            if len > self.link_limit {
                warn!(address, tag = message.tag, payload_len = len, "dropping oversized message");
                report.dropped_oversized += 1;
                continue;
            }
            if budget_used + len > self.link_limit {
                debug!(address, tag = message.tag, "link budget exhausted, re-enqueuing");
                node.requeue_out(message);
                report.re_enqueued += 1;
                return;
            }
            budget_used += len;

            message.hops += 1;
            let destination = message.destination;
            report.delivered += 1;
            report.delivered_bytes += len as u64;
            if let Some(dest_node) = self.nodes.get_mut(&destination) {
                dest_node.recv(message);
            } else {
                debug!(destination, "dropping message to unknown address");
            }
        }
    }
}
