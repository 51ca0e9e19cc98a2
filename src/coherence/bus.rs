use std::collections::VecDeque;

use log::{debug, trace};

use super::cache::CoherentCache;
use super::transaction::{BusEvent, BusTransaction, CacheId};
use crate::commons::{Addr, SystemSpec};

/// The shared wire. Idle or counting down exactly one transaction.
#[derive(Debug, Default)]
pub struct Bus {
    current: Option<BusTransaction>,
    updates: u64,
    invalidations: u64,
}

impl Bus {
    pub fn new() -> Self {
        Bus::default()
    }

    pub fn is_idle(&self) -> bool {
        self.current.is_none()
    }

    pub fn current(&self) -> Option<&BusTransaction> {
        self.current.as_ref()
    }

    pub fn set_current_transaction(&mut self, txn: Option<BusTransaction>) {
        self.current = txn;
    }

    fn take_current(&mut self) -> Option<BusTransaction> {
        self.current.take()
    }

    /// Advances the active transaction by one cycle. Returns true when its
    /// current phase finished and the controller has to be alerted.
    pub fn tick(&mut self) -> bool {
        let Some(txn) = self.current.as_mut() else { return false };
        if !txn.tick() {
            trace!("bus: {:?} from cache {}, {} cycles left", txn.event, txn.sender, txn.remaining);
            return false;
        }
        if !txn.data_phase {
            match txn.event {
                BusEvent::Update => self.updates += 1,
                BusEvent::ReadExclusive => self.invalidations += 1,
                BusEvent::ReadShared => (),
            }
        }
        true
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }

    pub fn invalidations(&self) -> u64 {
        self.invalidations
    }
}

/// Arbitrates the bus between the attached caches and fans out snoops.
///
/// The controller is the only component that installs, extends or clears the
/// bus's transaction. Caches that find the bus taken wait in a FIFO queue.
#[derive(Debug)]
pub struct BusController {
    bus: Bus,
    specs: SystemSpec,
    attached: Vec<CacheId>,
    lock_queue: VecDeque<CacheId>,
    master: Option<CacheId>,
    traffic: u64,       // bytes
    grants: u64,
    read_grants: u64,
    read_exclusive_grants: u64,
    update_grants: u64,
}

impl BusController {
    pub fn new(specs: SystemSpec) -> Self {
        BusController {
            bus: Bus::new(),
            specs,
            attached: Vec::new(),
            lock_queue: VecDeque::new(),
            master: None,
            traffic: 0,
            grants: 0,
            read_grants: 0,
            read_exclusive_grants: 0,
            update_grants: 0,
        }
    }

    pub fn attach<C: CoherentCache + ?Sized>(&mut self, cache: &C) {
        let id = cache.id();
        assert!(!self.attached.contains(&id), "cache {} attached twice", id);
        self.attached.push(id);
    }

    /// Grants the bus right away if nobody holds or waits for it, queues the
    /// cache otherwise.
    pub fn request_ownership<C: CoherentCache + ?Sized>(&mut self, cache: &mut C) {
        let id = cache.id();
        assert!(
            !self.lock_queue.contains(&id) && self.master != Some(id),
            "cache {} requested bus ownership while already queued", id
        );
        if self.bus.is_idle() && self.lock_queue.is_empty() {
            self.grant(cache);
        } else {
            trace!("bus: cache {} queued behind {} others", id, self.lock_queue.len());
            self.lock_queue.push_back(id);
        }
    }

    /// Ticks the bus and alerts on completion.
    pub fn tick<C: CoherentCache>(&mut self, caches: &mut [C]) {
        if self.bus.tick() {
            self.alert(caches);
        }
    }

    /// Called when the active transaction's countdown reached zero: every
    /// attached cache sees it, the slowest responder decides whether a data
    /// phase follows.
    pub fn alert<C: CoherentCache>(&mut self, caches: &mut [C]) {
        let mut txn = self.bus
            .take_current()
            .unwrap_or_else(|| panic!("alert called with no active transaction"));
        assert_eq!(
            self.master, Some(txn.sender),
            "active transaction was issued by cache {} but the bus master is {:?}", txn.sender, self.master
        );
        let shared = self.exists_elsewhere(caches, txn.sender, txn.addr);

        let mut extra = 0;
        for cache in caches.iter_mut().filter(|c| self.attached.contains(&c.id())) {
            let cost = if cache.id() == txn.sender {
                cache.on_own_transaction_event(&txn, shared)
            } else {
                cache.on_snoop(&txn)
            };
            extra = extra.max(cost);
        }

        if extra > 0 && txn.awaits_data() {
            debug!("bus: cache {} receives {} in {} cycles", txn.sender, txn.addr, extra);
            txn.extend(extra);
            self.traffic += u64::from(self.specs.block_size);
            self.bus.set_current_transaction(Some(txn));
            return;
        }

        assert!(
            !txn.awaits_data(),
            "transaction of cache {} finished without delivering {}", txn.sender, txn.addr
        );
        if txn.event == BusEvent::Update {
            self.traffic += u64::from(self.specs.word_size);
        }
        self.master = None;
        self.dispatch_lock_req(caches);
    }

    pub fn exists_elsewhere<C: CoherentCache>(&self, caches: &[C], requester: CacheId, addr: Addr) -> bool {
        caches.iter()
            .filter(|c| c.id() != requester && self.attached.contains(&c.id()))
            .any(|c| c.cache_hit(addr))
    }

    // helper functions

    fn grant<C: CoherentCache + ?Sized>(&mut self, cache: &mut C) {
        let txn = cache.build_request();
        assert_eq!(txn.sender, cache.id(), "cache {} built a request for cache {}", cache.id(), txn.sender);
        debug!("bus: granted to cache {} for {:?} on {}", txn.sender, txn.event, txn.addr);
        self.master = Some(txn.sender);
        self.grants += 1;
        match txn.event {
            BusEvent::ReadShared => self.read_grants += 1,
            BusEvent::ReadExclusive => self.read_exclusive_grants += 1,
            BusEvent::Update => self.update_grants += 1,
        }
        self.bus.set_current_transaction(Some(txn));
    }

    fn dispatch_lock_req<C: CoherentCache>(&mut self, caches: &mut [C]) {
        assert!(self.bus.is_idle());
        match self.lock_queue.pop_front() {
            Some(id) => {
                let cache = caches.iter_mut()
                    .find(|c| c.id() == id)
                    .unwrap_or_else(|| panic!("queued cache {} is not attached", id));
                self.grant(cache);
            },
            None => {
                trace!("bus: idle");
                self.bus.set_current_transaction(None);
            },
        }
    }

    // statistics and inspection

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn master(&self) -> Option<CacheId> {
        self.master
    }

    pub fn queued(&self) -> impl Iterator<Item = CacheId> + '_ {
        self.lock_queue.iter().copied()
    }

    pub fn bus_traffic(&self) -> u64 {
        self.traffic
    }

    pub fn grants(&self) -> u64 {
        self.grants
    }

    /// grants of transactions carrying `event`
    pub fn grants_of(&self, event: BusEvent) -> u64 {
        match event {
            BusEvent::ReadShared => self.read_grants,
            BusEvent::ReadExclusive => self.read_exclusive_grants,
            BusEvent::Update => self.update_grants,
        }
    }
}
