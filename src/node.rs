// src/node.rs
//
// The interface the simulated `Network` needs from anything it hosts
// (spec.md §6, "Node interface (to collaborators)").

use crate::message::{Address, Message};

pub trait Node {
    /// Advance this node's internal state to `epoch`: drain inbound,
    /// run protocol-specific dispatch, run periodic maintenance.
    fn tick(&mut self, epoch: u64);

    /// Deliver an inbound message. Implementations enqueue; they never
    /// process synchronously from here (processing happens in `tick`).
    fn recv(&mut self, message: Message);

    /// Pop the next queued outbound message, if any. The network calls
    /// this repeatedly (subject to the per-tick link budget) to drain a
    /// node's outbound queue.
    fn unqueue_out(&mut self) -> Option<Message>;

    /// Pushes `message` back onto the front of the outbound queue,
    /// verbatim, because the network's per-tick link budget was exhausted
    /// before it could be accepted (spec.md §4.1).
    fn requeue_out(&mut self, message: Message);

    fn set_address(&mut self, address: Address);
    fn get_address(&self) -> Address;

    /// Marks the node permanently unreachable. A dead node still exists in
    /// the address table until `Network::remove` is called, but `send`
    /// invokes the failure callback immediately instead of queueing, and
    /// `tick` is a no-op (spec.md §4.2, "cooperation convention").
    fn die(&mut self);

    /// Lets harness/test code reach back to the concrete node type stored
    /// behind `Network`'s `Box<dyn Node>` to drive protocol-level
    /// operations (`ping`/`put`/`get`) that aren't part of this transport
    /// interface.
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}
