// Set-associative storage and request bookkeeping shared by every protocol.
// The protocol specific transitions live behind the `Protocol` trait (mesi.rs,
// dragon.rs); `CoherentCache` is the interface processors and the bus
// controller use.

use std::fmt::Debug;
use std::marker::PhantomData;

use log::{debug, trace};

use super::bus::BusController;
use super::lru::RecencyTracker;
use super::transaction::{BusEvent, BusTransaction, CacheId};
use crate::commons::*;
use crate::error::ConfigError;

/// Line states and transition rules of a coherence protocol.
///
/// `State::default()` is the state of a line that holds no valid copy.
pub trait Protocol: Send + 'static {
    type State: Copy + Eq + Debug + Default + Send;

    const NAME: &'static str;

    fn is_present(state: Self::State) -> bool {
        state != Self::State::default()
    }

    /// the copy differs from memory and must be written back before eviction
    fn is_dirty(state: Self::State) -> bool;

    /// other caches may hold the block too
    fn is_shared(state: Self::State) -> bool;

    /// whether a hit on a line in `state` has to tell the other caches
    fn hit_needs_bus(state: Self::State, req: &ProcCacheReq) -> bool;

    /// state after a hit that is resolved without the bus
    fn local_hit(state: Self::State, req: &ProcCacheReq) -> Self::State;

    fn request_event(req: &ProcCacheReq, resident: bool) -> BusEvent;

    /// state of the requester's line once its own transaction went through
    fn complete(state: Self::State, req: &ProcCacheReq, shared: bool) -> Self::State;

    /// Applies another cache's transaction to a valid line held here and
    /// returns the cycles this cache's response adds to the transaction.
    fn snoop(state: &mut Self::State, txn: &BusTransaction, specs: &SystemSpec) -> u32;
}

/// The interface of caches as used by processors and the bus controller.
pub trait CoherentCache {
    fn id(&self) -> CacheId;

    /// entry point for a processor's memory access
    fn ask(&mut self, req: ProcCacheReq, ctl: &mut BusController);

    fn tick(&mut self, ctl: &mut BusController);

    /// called by the controller when it grants this cache the bus
    fn build_request(&mut self) -> BusTransaction;

    fn on_own_transaction_event(&mut self, txn: &BusTransaction, shared: bool) -> u32;

    fn on_snoop(&mut self, txn: &BusTransaction) -> u32;

    fn cache_hit(&self, addr: Addr) -> bool;

    fn miss_count(&self) -> u64;

    /// true once per completed access; the driver wakes the bound processor
    fn take_wakeup(&mut self) -> bool;
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CacheState {
    Idle,
    WaitingForCacheHit,
    WaitingForBusData,
    WaitingForBusMessage,
    WaitingForMemory(u32),      // cycles left until the victim is written back
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Line<S> {
    pub tag: u32,
    pub state: S,
}

#[derive(Clone, Debug)]
struct CacheSet<S> {
    ways: Vec<Option<Line<S>>>,
    lru: RecencyTracker,
}

impl<S: Copy> CacheSet<S> {
    fn new(assoc: usize) -> Self {
        CacheSet {
            ways: vec![None; assoc],
            lru: RecencyTracker::new(assoc),
        }
    }
    fn way_of(&self, tag: u32) -> Option<usize> {
        self.ways.iter().position(|w| matches!(w, Some(line) if line.tag == tag))
    }
}

#[derive(Clone, Copy, Debug)]
struct Pending {
    req: ProcCacheReq,
    miss_counted: bool,
    victim: Option<usize>,
}

pub struct Cache<P: Protocol> {
    id: CacheId,
    state: CacheState,
    specs: SystemSpec,
    sets: Vec<CacheSet<P::State>>,
    pending: Option<Pending>,
    wakeup: bool,
    misses: u64,
    private_accesses: u64,
    shared_accesses: u64,
    protocol: PhantomData<P>,
}

impl<P: Protocol> Cache<P> {
    pub fn new(id: CacheId, specs: SystemSpec) -> Result<Self, ConfigError> {
        specs.validate()?;
        let sets = (0..specs.num_sets())
            .map(|_| CacheSet::new(specs.cache_assoc as usize))
            .collect();
        Ok(Cache {
            id,
            state: CacheState::Idle,
            specs,
            sets,
            pending: None,
            wakeup: false,
            misses: 0,
            private_accesses: 0,
            shared_accesses: 0,
            protocol: PhantomData,
        })
    }

    pub fn state(&self) -> CacheState {
        self.state
    }

    pub fn line_state(&self, addr: Addr) -> P::State {
        let (index, tag) = addr.pos(&self.specs);
        let set = &self.sets[index as usize];
        set.way_of(tag)
            .and_then(|w| set.ways[w])
            .map(|line| line.state)
            .unwrap_or_default()
    }

    pub fn private_accesses(&self) -> u64 {
        self.private_accesses
    }

    pub fn shared_accesses(&self) -> u64 {
        self.shared_accesses
    }

    // helper functions

    fn pending(&self) -> Pending {
        self.pending
            .unwrap_or_else(|| panic!("cache {} has no pending access", self.id))
    }

    // looks the pending access up and either finishes it locally or goes to the bus
    fn resolve(&mut self, ctl: &mut BusController) {
        let mut pending = self.pending();
        let addr = pending.req.addr();
        let (index, tag) = addr.pos(&self.specs);
        let index = index as usize;
        let way = self.sets[index].way_of(tag);
        let hit = way
            .and_then(|w| self.sets[index].ways[w].map(|line| (w, line)))
            .filter(|(_, line)| P::is_present(line.state));

        if let Some((way, line)) = hit {
            self.sets[index].lru.touch(way);
            if P::is_shared(line.state) {
                self.shared_accesses += 1;
            } else {
                self.private_accesses += 1;
            }
            if P::hit_needs_bus(line.state, &pending.req) {
                debug!("cache {}: {:?} hit on {:?} line, broadcasting", self.id, pending.req, line.state);
                self.state = CacheState::WaitingForBusMessage;
                ctl.request_ownership(self);
            } else {
                if let Some(line) = self.sets[index].ways[way].as_mut() {
                    line.state = P::local_hit(line.state, &pending.req);
                }
                self.state = CacheState::WaitingForCacheHit;
            }
            return;
        }

        if !pending.miss_counted {
            self.misses += 1;
            pending.miss_counted = true;
        }
        // a line still tagged with this block but no longer valid is refilled in place
        let set = &mut self.sets[index];
        let way = way.unwrap_or_else(|| set.lru.victim());
        let victim = set.ways[way];
        match victim {
            Some(victim) if P::is_dirty(victim.state) => {
                debug!(
                    "cache {}: miss on {}, writing back dirty tag {:#x} first",
                    self.id, addr, victim.tag
                );
                pending.victim = Some(way);
                self.pending = Some(pending);
                self.state = CacheState::WaitingForMemory(self.specs.t_evict());
            }
            _ => {
                set.ways[way] = Some(Line { tag, state: P::State::default() });
                set.lru.touch(way);
                debug!("cache {}: miss on {}, requesting the bus", self.id, addr);
                self.pending = Some(pending);
                self.state = CacheState::WaitingForBusData;
                ctl.request_ownership(self);
            }
        }
    }

    fn complete(&mut self, shared: bool) {
        let id = self.id;
        let pending = self.pending
            .take()
            .unwrap_or_else(|| panic!("cache {} completed a transaction it never requested", id));
        let addr = pending.req.addr();
        let (index, tag) = addr.pos(&self.specs);
        let set = &mut self.sets[index as usize];
        let line = set.way_of(tag)
            .and_then(|w| set.ways[w].as_mut())
            .unwrap_or_else(|| panic!("cache {} lost the line for {} while on the bus", id, addr));
        let before = line.state;
        line.state = P::complete(line.state, &pending.req, shared);
        debug!("cache {}: {:?} done, {} {:?} -> {:?}", id, pending.req, addr, before, line.state);
        self.state = CacheState::Idle;
        self.wakeup = true;
    }
}

impl<P: Protocol> CoherentCache for Cache<P> {
    fn id(&self) -> CacheId {
        self.id
    }

    fn ask(&mut self, req: ProcCacheReq, ctl: &mut BusController) {
        assert!(
            self.state == CacheState::Idle && self.pending.is_none(),
            "cache {} asked for {:?} while {:?}", self.id, req, self.state
        );
        trace!("cache {}: received {:?}", self.id, req);
        self.pending = Some(Pending { req, miss_counted: false, victim: None });
        self.resolve(ctl);
    }

    fn tick(&mut self, ctl: &mut BusController) {
        match self.state {
            CacheState::WaitingForCacheHit => {
                self.pending = None;
                self.state = CacheState::Idle;
                self.wakeup = true;
            },
            CacheState::WaitingForMemory(left) if left > 1 => {
                self.state = CacheState::WaitingForMemory(left - 1);
            },
            CacheState::WaitingForMemory(_) => {
                let mut pending = self.pending();
                if let Some(way) = pending.victim.take() {
                    let (index, _) = pending.req.addr().pos(&self.specs);
                    let set = &mut self.sets[index as usize];
                    set.ways[way] = None;
                    set.lru.demote(way);
                }
                self.pending = Some(pending);
                debug!("cache {}: write-back done, reissuing {:?}", self.id, pending.req);
                self.resolve(ctl);
            },
            _ => (),
        }
    }

    fn build_request(&mut self) -> BusTransaction {
        let pending = self.pending();
        let addr = pending.req.addr();
        let resident = self.cache_hit(addr);
        if !resident && self.state == CacheState::WaitingForBusMessage {
            // the copy this upgrade relied on was invalidated while queued
            debug!("cache {}: {} invalidated while waiting for the bus, fetching instead", self.id, addr);
            self.state = CacheState::WaitingForBusData;
        }
        assert!(
            matches!(self.state, CacheState::WaitingForBusData | CacheState::WaitingForBusMessage),
            "cache {} granted the bus while {:?}", self.id, self.state
        );
        let event = P::request_event(&pending.req, resident);
        BusTransaction::new(self.id, event, addr, self.specs.t_cache_to_cache_msg(), !resident)
            .with_write_intent(pending.req.is_write())
    }

    fn on_own_transaction_event(&mut self, txn: &BusTransaction, shared: bool) -> u32 {
        assert_eq!(
            txn.sender, self.id,
            "cache {} handed the transaction of cache {}", self.id, txn.sender
        );
        match self.state {
            CacheState::WaitingForBusData if txn.data_phase => {
                self.complete(shared);
                0
            },
            CacheState::WaitingForBusData if shared => 0,
            CacheState::WaitingForBusData => self.specs.t_mem_fetch(),
            CacheState::WaitingForBusMessage => {
                self.complete(shared);
                0
            },
            state => panic!("cache {} notified of its own transaction while {:?}", self.id, state),
        }
    }

    fn on_snoop(&mut self, txn: &BusTransaction) -> u32 {
        assert_ne!(txn.sender, self.id, "cache {} snooped its own transaction", self.id);
        let specs = self.specs;
        let (index, tag) = txn.addr.pos(&specs);
        let set = &mut self.sets[index as usize];
        let Some(way) = set.way_of(tag) else { return 0 };
        let Some(line) = set.ways[way].as_mut() else { return 0 };
        if !P::is_present(line.state) {
            return 0;
        }
        let before = line.state;
        let cost = P::snoop(&mut line.state, txn, &specs);
        let after = line.state;
        if !P::is_present(after) {
            set.lru.demote(way);
        }
        trace!(
            "cache {}: snooped {:?} from cache {} on {}, {:?} -> {:?} (+{})",
            self.id, txn.event, txn.sender, txn.addr, before, after, cost
        );
        cost
    }

    fn cache_hit(&self, addr: Addr) -> bool {
        P::is_present(self.line_state(addr))
    }

    fn miss_count(&self) -> u64 {
        self.misses
    }

    fn take_wakeup(&mut self) -> bool {
        std::mem::take(&mut self.wakeup)
    }
}
