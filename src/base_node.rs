// src/base_node.rs
//
// Uniform send/recv/retry semantics shared by every node type. Embedded
// (composed) into `KademliaNode` rather than inherited — Rust has no
// implementation inheritance, so the "BaseNode, subclassed by
// KademliaNode" shape from the original becomes composition: `BaseNode<S>`
// is generic over the owning node's state `S`, which is what callbacks get
// a mutable handle to when a reply or failure is delivered.

use std::collections::{HashMap, VecDeque};

use tracing::{trace, warn};

use crate::message::{Address, Message, Tag};

pub const DEFAULT_TIMEOUT: u64 = 20;
pub const DEFAULT_MAX_RETRIES: u32 = 16;
pub const BACKOFF_FACTOR: u64 = 2;
pub const QUEUE_LIMIT: usize = 1 << 15;

pub type SuccessCallback<S> = Box<dyn FnOnce(&mut S, Message)>;
pub type FailureCallback<S> = Box<dyn FnOnce(&mut S, Message)>;

pub struct Callbacks<S> {
    pub on_success: Option<SuccessCallback<S>>,
    pub on_failure: Option<FailureCallback<S>>,
}

impl<S> Callbacks<S> {
    pub fn none() -> Self {
        Callbacks {
            on_success: None,
            on_failure: None,
        }
    }

    pub fn new(on_success: SuccessCallback<S>, on_failure: FailureCallback<S>) -> Self {
        Callbacks {
            on_success: Some(on_success),
            on_failure: Some(on_failure),
        }
    }
}

struct SentMessage<S> {
    message: Message,
    callbacks: Callbacks<S>,
    next_send_time: u64,
    interval: u64,
    retries: u32,
    max_retries: u32,
}

/// Queueing, reply correlation, and retry/backoff state shared by every
/// node. Owns no protocol semantics of its own beyond "does this tag have
/// a pending reply".
pub struct BaseNode<S> {
    address: Address,
    dead: bool,
    inbound: VecDeque<Message>,
    outbound: VecDeque<Message>,
    pending: HashMap<Tag, SentMessage<S>>,
}

impl<S> Default for BaseNode<S> {
    fn default() -> Self {
        BaseNode {
            address: 0,
            dead: false,
            inbound: VecDeque::new(),
            outbound: VecDeque::new(),
            pending: HashMap::new(),
        }
    }
}

impl<S> BaseNode<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn set_address(&mut self, address: Address) {
        self.address = address;
    }

    pub fn is_dead(&self) -> bool {
        self.dead
    }

    pub fn die(&mut self) {
        self.dead = true;
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// spec.md §4.2 `send`. Fills in `message.tag` if zero, substitutes
    /// the default timeout if zero, and records a pending-reply entry
    /// when callbacks are supplied.
    pub fn send(
        &mut self,
        mut message: Message,
        callbacks: Callbacks<S>,
        max_retries: u32,
        timeout: u64,
        epoch: u64,
        state: &mut S,
    ) {
        if self.dead {
            if let Some(on_failure) = callbacks.on_failure {
                on_failure(state, message);
            }
            return;
        }

        if message.tag == 0 {
            message.tag = crate::rng::next_u64();
        }
        let timeout = if timeout == 0 { DEFAULT_TIMEOUT } else { timeout };

        let has_callbacks = callbacks.on_success.is_some() || callbacks.on_failure.is_some();
        if has_callbacks {
            self.pending.insert(
                message.tag,
                SentMessage {
                    message: message.clone(),
                    callbacks,
                    next_send_time: epoch + timeout,
                    interval: timeout,
                    retries: 0,
                    max_retries,
                },
            );
        }

        self.enqueue_out(message);
    }

    fn enqueue_out(&mut self, message: Message) {
        if self.outbound.len() >= QUEUE_LIMIT {
            warn!(address = self.address, tag = message.tag, "outbound queue full, dropping");
            return;
        }
        self.outbound.push_back(message);
    }

    /// spec.md §4.2 `recv`.
    pub fn recv(&mut self, message: Message) {
        if self.inbound.len() >= QUEUE_LIMIT {
            warn!(address = self.address, tag = message.tag, "inbound queue full, dropping");
            return;
        }
        self.inbound.push_back(message);
    }

    pub fn unqueue_out(&mut self) -> Option<Message> {
        self.outbound.pop_front()
    }

    pub fn requeue_out(&mut self, message: Message) {
        self.outbound.push_front(message);
    }

    /// Drains the entire inbound queue for the caller to dispatch.
    pub fn drain_inbound(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.inbound).into_iter().collect()
    }

    /// Base reply-correlation dispatch (spec.md §4.2 `handle_message`):
    /// if `m.tag` matches a pending entry, invoke its success callback and
    /// remove the entry. Returns `true` if a pending entry was resolved —
    /// subclass dispatch should treat that as "this message was a reply,
    /// not a fresh request".
    pub fn try_resolve(&mut self, state: &mut S, message: &Message) -> bool {
        if let Some(mut entry) = self.pending.remove(&message.tag) {
            if let Some(on_success) = entry.callbacks.on_success.take() {
                on_success(state, message.clone());
            }
            true
        } else {
            false
        }
    }

    /// spec.md §4.2 `tick` (BaseNode portion): retry or fail every pending
    /// entry whose timer has elapsed.
    pub fn sweep_pending(&mut self, state: &mut S, epoch: u64) {
        let due: Vec<Tag> = self
            .pending
            .iter()
            .filter(|(_, e)| e.next_send_time <= epoch)
            .map(|(tag, _)| *tag)
            .collect();

        for tag in due {
            let Some(entry) = self.pending.get_mut(&tag) else {
                continue;
            };
            if entry.retries < entry.max_retries {
                entry.next_send_time = epoch + entry.interval;
                entry.interval *= BACKOFF_FACTOR;
                entry.retries += 1;
                let resend = entry.message.clone();
                trace!(address = self.address, tag, retries = entry.retries, "retrying");
                self.enqueue_out(resend);
            } else {
                let entry = self.pending.remove(&tag).expect("just looked up");
                warn!(address = self.address, tag, "retries exhausted, giving up");
                if let Some(on_failure) = entry.callbacks.on_failure {
                    on_failure(state, entry.message);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;

    struct Counter {
        successes: u32,
        failures: u32,
    }

    fn msg(tag: Tag) -> Message {
        Message::new(MessageType::Ping, 1, 2, tag, vec![])
    }

    #[test]
    fn success_callback_fires_once_on_matching_reply() {
        let mut base: BaseNode<Counter> = BaseNode::new();
        let mut state = Counter { successes: 0, failures: 0 };
        let request = msg(42);
        base.send(
            request.clone(),
            Callbacks::new(
                Box::new(|s: &mut Counter, _m| s.successes += 1),
                Box::new(|s: &mut Counter, _m| s.failures += 1),
            ),
            DEFAULT_MAX_RETRIES,
            DEFAULT_TIMEOUT,
            0,
            &mut state,
        );

        let reply = msg(42);
        assert!(base.try_resolve(&mut state, &reply));
        assert_eq!(state.successes, 1);
        assert_eq!(state.failures, 0);

        // A second reply with the same tag is a late reply; the entry is
        // already gone, so this must be a no-op, not a second callback.
        assert!(!base.try_resolve(&mut state, &reply));
        assert_eq!(state.successes, 1);
    }

    #[test]
    fn retry_schedule_matches_exponential_backoff() {
        let mut base: BaseNode<Counter> = BaseNode::new();
        let mut state = Counter { successes: 0, failures: 0 };
        base.send(
            msg(0),
            Callbacks::new(
                Box::new(|s: &mut Counter, _m| s.successes += 1),
                Box::new(|s: &mut Counter, _m| s.failures += 1),
            ),
            1,
            2,
            0,
            &mut state,
        );
        assert_eq!(base.pending_count(), 1);
        assert!(base.unqueue_out().is_some());

        // Before the timeout, nothing happens.
        base.sweep_pending(&mut state, 1);
        assert_eq!(base.pending_count(), 1);
        assert!(base.unqueue_out().is_none());

        // At epoch 2 the single retry fires.
        base.sweep_pending(&mut state, 2);
        assert_eq!(base.pending_count(), 1);
        assert!(base.unqueue_out().is_some());
        assert_eq!(state.failures, 0);

        // At epoch 4 retries are exhausted and failure fires (spec.md
        // §8 S2: max_retries=1, timeout=2 => failure at send+4).
        base.sweep_pending(&mut state, 4);
        assert_eq!(base.pending_count(), 0);
        assert_eq!(state.failures, 1);
        assert_eq!(state.successes, 0);
    }

    #[test]
    fn dead_node_invokes_failure_immediately() {
        let mut base: BaseNode<Counter> = BaseNode::new();
        let mut state = Counter { successes: 0, failures: 0 };
        base.die();
        base.send(
            msg(0),
            Callbacks::new(
                Box::new(|s: &mut Counter, _m| s.successes += 1),
                Box::new(|s: &mut Counter, _m| s.failures += 1),
            ),
            DEFAULT_MAX_RETRIES,
            DEFAULT_TIMEOUT,
            0,
            &mut state,
        );
        assert_eq!(state.failures, 1);
        assert_eq!(base.pending_count(), 0);
        assert!(base.unqueue_out().is_none());
    }

    #[test]
    fn queue_overflow_drops_silently() {
        let mut base: BaseNode<()> = BaseNode::new();
        let mut state = ();
        for i in 0..(QUEUE_LIMIT + 1) {
            base.send(msg(i as u64 + 1), Callbacks::none(), DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT, 0, &mut state);
        }
        // One was dropped; queue caps at QUEUE_LIMIT.
        let mut drained = 0;
        while base.unqueue_out().is_some() {
            drained += 1;
        }
        assert_eq!(drained, QUEUE_LIMIT);
    }
}
