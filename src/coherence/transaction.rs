use crate::commons::Addr;

pub type CacheId = usize;

// the bus signals that caches snoop on, as defined by the protocols
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BusEvent {
    ReadShared,
    ReadExclusive,
    Update,
}

/// One in-flight bus request.
///
/// Created by the cache that owns the request when the bus controller grants
/// it the bus. Only the bus counts it down and only the controller extends it
/// into a data-delivery phase, at most once.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct BusTransaction {
    pub sender: CacheId,
    pub event: BusEvent,
    pub addr: Addr,
    pub remaining: u32,
    pub sender_needs_data: bool,
    pub data_phase: bool,
    /// the access behind this request is a write
    pub write_intent: bool,
}

impl BusTransaction {
    pub fn new(sender: CacheId, event: BusEvent, addr: Addr, cycles: u32, sender_needs_data: bool) -> Self {
        BusTransaction {
            sender,
            event,
            addr,
            remaining: cycles,
            sender_needs_data,
            data_phase: false,
            write_intent: false,
        }
    }

    pub fn with_write_intent(mut self, write_intent: bool) -> Self {
        self.write_intent = write_intent;
        self
    }

    /// Counts down one cycle, returns true once the current phase is over.
    pub fn tick(&mut self) -> bool {
        self.remaining = self.remaining.saturating_sub(1);
        self.remaining == 0
    }

    pub fn is_done(&self) -> bool {
        self.remaining == 0
    }

    pub fn awaits_data(&self) -> bool {
        self.sender_needs_data && !self.data_phase
    }

    pub fn extend(&mut self, cycles: u32) {
        assert!(!self.data_phase, "transaction of cache {} extended into a second data phase", self.sender);
        self.remaining = cycles;
        self.data_phase = true;
    }
}
