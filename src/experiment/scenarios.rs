// src/experiment/scenarios.rs
//
// Built-in scenarios mirroring spec.md §8's S1-S6.

use std::cell::RefCell;
use std::rc::Rc;

use crate::config::SimConfig;
use crate::error::{DhtError, Result};
use crate::experiment::{emit, Scenario, ScenarioReport};
use crate::kademlia::{GetResult, KademliaNode, PingOutcome};
use crate::key::Key;
use crate::message::Address;
use crate::network::Network;

pub fn all() -> Vec<Box<dyn Scenario>> {
    vec![
        Box::new(PingAlive),
        Box::new(PingDead),
        Box::new(BucketEviction),
        Box::new(PutGetRoundTrip),
        Box::new(ChurnRecovery),
        Box::new(LookupCoalescing),
    ]
}

fn spawn(net: &mut Network, cfg: &SimConfig) -> Result<Address> {
    spawn_with_key(net, cfg, Key::random())
}

fn spawn_with_key(net: &mut Network, cfg: &SimConfig, key: Key) -> Result<Address> {
    let node = KademliaNode::new(key, cfg.kademlia_config());
    match net.add(Box::new(node)) {
        0 => Err(DhtError::AddressSpaceExhausted),
        addr => Ok(addr),
    }
}

/// Spawns `cfg.node_count` nodes, floored at `min`, the scenario's own
/// structural requirement. Extra nodes beyond a scenario's named roles are
/// bystanders that make the network's size actually track `--nn`.
fn spawn_pool(net: &mut Network, cfg: &SimConfig, min: usize) -> Result<Vec<Address>> {
    let n = cfg.node_count.max(min);
    (0..n).map(|_| spawn(net, cfg)).collect()
}

fn kademlia_mut<'a>(net: &'a mut Network, addr: Address) -> &'a mut KademliaNode {
    net.get_mut(addr)
        .expect("address was just assigned by this scenario")
        .as_any_mut()
        .downcast_mut::<KademliaNode>()
        .expect("this crate only ever hosts KademliaNode")
}

/// Ticks `net` until `done` reports true or `max_ticks` is exhausted.
/// Returns the tick at which it finished, or `0` if it never did.
fn run_until(net: &mut Network, max_ticks: u64, mut done: impl FnMut(&mut Network) -> bool) -> u64 {
    for i in 1..=max_ticks {
        net.tick();
        if done(net) {
            return i;
        }
    }
    0
}

/// Pings every node in `addrs` against every other once and drains enough
/// ticks for every reply to land, so each node's routing table has an
/// entry for every other node before a scenario exercises lookups.
fn bootstrap_mesh(net: &mut Network, addrs: &[Address]) {
    for &a in addrs {
        for &b in addrs {
            if a != b {
                kademlia_mut(net, a).ping(b, None);
            }
        }
    }
    for _ in 0..(addrs.len() as u64 * 4 + 20) {
        net.tick();
    }
}

// S1 --------------------------------------------------------------------

struct PingAlive;

impl Scenario for PingAlive {
    fn name(&self) -> &'static str {
        "ping-alive"
    }

    fn run(&self, net: &mut Network, cfg: &SimConfig) -> Result<ScenarioReport> {
        let addrs = spawn_pool(net, cfg, 2)?;
        let a = addrs[0];
        let b = addrs[1];

        let result = Rc::new(RefCell::new(None));
        let result_in = result.clone();
        kademlia_mut(net, a).ping(b, Some(Box::new(move |_n, outcome| *result_in.borrow_mut() = Some(outcome))));

        let ticks = run_until(net, 100, |_net| result.borrow().is_some());
        let passed = matches!(*result.borrow(), Some(PingOutcome::Alive));
        Ok(ScenarioReport { name: self.name(), passed, detail: format!("resolved alive in {ticks} ticks") })
    }
}

// S2 --------------------------------------------------------------------

struct PingDead;

impl Scenario for PingDead {
    fn name(&self) -> &'static str {
        "ping-dead"
    }

    fn run(&self, net: &mut Network, cfg: &SimConfig) -> Result<ScenarioReport> {
        let addrs = spawn_pool(net, cfg, 2)?;
        let a = addrs[0];
        let b = addrs[1];
        net.remove(b);

        let result = Rc::new(RefCell::new(None));
        let result_in = result.clone();
        kademlia_mut(net, a).ping(b, Some(Box::new(move |_n, outcome| *result_in.borrow_mut() = Some(outcome))));

        let ticks = run_until(net, 200, |_net| result.borrow().is_some());
        let passed = matches!(*result.borrow(), Some(PingOutcome::Dead));
        Ok(ScenarioReport { name: self.name(), passed, detail: format!("resolved dead in {ticks} ticks") })
    }
}

// S3 --------------------------------------------------------------------

struct BucketEviction;

impl Scenario for BucketEviction {
    fn name(&self) -> &'static str {
        "bucket-eviction"
    }

    fn run(&self, net: &mut Network, cfg: &SimConfig) -> Result<ScenarioReport> {
        let local_key = Key::random();
        let small_cfg = SimConfig { k: 2, ..cfg.clone() };
        let a = spawn_with_key(net, &small_cfg, local_key)?;

        let key_with_prefix = |bits: u32| {
            let mut k = local_key.random_with_shared_prefix(bits);
            let byte = (bits / 8) as usize;
            let bit = bits % 8;
            k.0[byte] ^= 1 << (7 - bit);
            k
        };

        let b1_key = key_with_prefix(3);
        let b2_key = key_with_prefix(3);
        let b1 = spawn_with_key(net, cfg, b1_key)?;
        let b2 = spawn_with_key(net, cfg, b2_key)?;

        // The rest of `cfg.node_count` are bystanders: present in the
        // network so `--nn` isn't ignored, but `a` never observes them, so
        // they can't perturb the specific bucket under test.
        for _ in 0..cfg.node_count.saturating_sub(4) {
            spawn(net, cfg)?;
        }

        // Fill the (capacity-2) bucket: A learns about b1, then b2.
        let alive = |node: &mut KademliaNode, peer: Address| {
            let cell = Rc::new(RefCell::new(None));
            let cell_in = cell.clone();
            node.ping(peer, Some(Box::new(move |_n, outcome| *cell_in.borrow_mut() = Some(outcome))));
            cell
        };
        let r1 = alive(kademlia_mut(net, a), b1);
        run_until(net, 100, |_net| r1.borrow().is_some());
        let r2 = alive(kademlia_mut(net, a), b2);
        run_until(net, 100, |_net| r2.borrow().is_some());

        // b1 (least-recently-seen) goes away, then a challenger with the
        // same bucket arrives: the eviction ping to b1 will time out and
        // b3 should replace it.
        net.remove(b1);
        let b3_key = key_with_prefix(3);
        let b3 = spawn_with_key(net, cfg, b3_key)?;
        let r3 = alive(kademlia_mut(net, a), b3);
        run_until(net, 100, |_net| r3.borrow().is_some());

        let ticks = run_until(net, 300, |net| {
            let node = kademlia_mut(net, a);
            let idx = node.table().bucket_index(&b3_key).unwrap();
            node.table().bucket(idx).iter().any(|e| e.key == b3_key)
        });
        let node = kademlia_mut(net, a);
        let idx = node.table().bucket_index(&b3_key).unwrap();
        let bucket_keys: Vec<Key> = node.table().bucket(idx).iter().map(|e| e.key).collect();
        let replaced = bucket_keys.contains(&b3_key) && !bucket_keys.contains(&b1_key) && bucket_keys.contains(&b2_key);
        if replaced {
            emit('R', format!("bucket {idx}: {b1_key} evicted, {b3_key} admitted"));
        }
        Ok(ScenarioReport { name: self.name(), passed: replaced, detail: format!("replacement resolved in {ticks} ticks") })
    }
}

// S4 --------------------------------------------------------------------

struct PutGetRoundTrip;

impl Scenario for PutGetRoundTrip {
    fn name(&self) -> &'static str {
        "put-get-round-trip"
    }

    fn run(&self, net: &mut Network, cfg: &SimConfig) -> Result<ScenarioReport> {
        let addrs = spawn_pool(net, cfg, 2)?;
        bootstrap_mesh(net, &addrs);

        let value = b"round trip value".to_vec();
        let putter = addrs[0];
        let getter = addrs[addrs.len() - 1];

        let put_done: Rc<RefCell<Option<usize>>> = Rc::new(RefCell::new(None));
        let put_done_in = put_done.clone();
        kademlia_mut(net, putter).put(value.clone(), Some(Box::new(move |_n, count| *put_done_in.borrow_mut() = Some(count))));
        run_until(net, 200, |_net| put_done.borrow().is_some());

        let get_done: Rc<RefCell<Option<GetResult>>> = Rc::new(RefCell::new(None));
        let get_done_in = get_done.clone();
        let key = Key::hash(&value);
        kademlia_mut(net, getter).get(key, Box::new(move |_n, result| *get_done_in.borrow_mut() = Some(result)));
        let ticks = run_until(net, 200, |_net| get_done.borrow().is_some());

        let passed = matches!(&*get_done.borrow(), Some(GetResult::Found(v)) if v == &value);
        let stored_to = put_done.borrow().unwrap_or(0);
        Ok(ScenarioReport { name: self.name(), passed, detail: format!("stored to {stored_to} nodes, fetched in {ticks} ticks") })
    }
}

// S5 --------------------------------------------------------------------

struct ChurnRecovery;

impl Scenario for ChurnRecovery {
    fn name(&self) -> &'static str {
        "churn-recovery"
    }

    fn run(&self, net: &mut Network, cfg: &SimConfig) -> Result<ScenarioReport> {
        let addrs = spawn_pool(net, cfg, 4)?;
        bootstrap_mesh(net, &addrs);

        // Half the network departs without warning.
        let split = addrs.len() / 2;
        for &addr in &addrs[..split] {
            net.remove(addr);
        }

        let survivors = &addrs[split..];
        let value = b"survives churn".to_vec();
        let putter = survivors[0];
        let getter = survivors[survivors.len() - 1];

        let put_done: Rc<RefCell<Option<usize>>> = Rc::new(RefCell::new(None));
        let put_done_in = put_done.clone();
        kademlia_mut(net, putter).put(value.clone(), Some(Box::new(move |_n, count| *put_done_in.borrow_mut() = Some(count))));
        run_until(net, 300, |_net| put_done.borrow().is_some());

        let get_done: Rc<RefCell<Option<GetResult>>> = Rc::new(RefCell::new(None));
        let get_done_in = get_done.clone();
        let key = Key::hash(&value);
        kademlia_mut(net, getter).get(key, Box::new(move |_n, result| *get_done_in.borrow_mut() = Some(result)));
        let ticks = run_until(net, 300, |_net| get_done.borrow().is_some());

        let passed = matches!(&*get_done.borrow(), Some(GetResult::Found(v)) if v == &value);
        Ok(ScenarioReport {
            name: self.name(),
            passed,
            detail: format!("recovered lookup in {ticks} ticks after {split}/{} nodes left", addrs.len()),
        })
    }
}

// S6 --------------------------------------------------------------------

struct LookupCoalescing;

impl Scenario for LookupCoalescing {
    fn name(&self) -> &'static str {
        "lookup-coalescing"
    }

    fn run(&self, net: &mut Network, cfg: &SimConfig) -> Result<ScenarioReport> {
        let addrs = spawn_pool(net, cfg, 2)?;
        bootstrap_mesh(net, &addrs);

        let seeker = addrs[0];
        let target = Key::random();

        let first: Rc<RefCell<Option<GetResult>>> = Rc::new(RefCell::new(None));
        let first_in = first.clone();
        let second: Rc<RefCell<Option<GetResult>>> = Rc::new(RefCell::new(None));
        let second_in = second.clone();

        kademlia_mut(net, seeker).get(target, Box::new(move |_n, r| *first_in.borrow_mut() = Some(r)));
        let in_flight_after_first = kademlia_mut(net, seeker).pending_lookup_count();
        kademlia_mut(net, seeker).get(target, Box::new(move |_n, r| *second_in.borrow_mut() = Some(r)));
        let in_flight_after_second = kademlia_mut(net, seeker).pending_lookup_count();

        let coalesced = in_flight_after_first == 1 && in_flight_after_second == 1;

        let ticks = run_until(net, 200, |_net| first.borrow().is_some() && second.borrow().is_some());
        let both_settled = first.borrow().is_some() && second.borrow().is_some();

        Ok(ScenarioReport {
            name: self.name(),
            passed: coalesced && both_settled,
            detail: format!("one NodeFinder served both callers, settled in {ticks} ticks"),
        })
    }
}
