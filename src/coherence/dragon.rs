use super::cache::Protocol;
use super::transaction::{BusEvent, BusTransaction};
use crate::commons::{ProcCacheReq, SystemSpec};

/// Update-based coherence: writes to shared blocks are broadcast word by word
/// and every sharer keeps its copy.
pub struct Dragon;

#[derive(Default, Clone, Copy, PartialEq, Eq, Debug)]
pub enum DragonState {
    #[default]
    NotPresent,
    Exclusive,
    SharedClean,
    SharedModified,
    Modified,
}

impl Protocol for Dragon {
    type State = DragonState;

    const NAME: &'static str = "Dragon";

    fn is_dirty(state: DragonState) -> bool {
        matches!(state, DragonState::SharedModified | DragonState::Modified)
    }

    fn is_shared(state: DragonState) -> bool {
        matches!(state, DragonState::SharedClean | DragonState::SharedModified)
    }

    fn hit_needs_bus(state: DragonState, req: &ProcCacheReq) -> bool {
        Self::is_shared(state) && req.is_write()
    }

    fn local_hit(state: DragonState, req: &ProcCacheReq) -> DragonState {
        match state {
            DragonState::Exclusive if req.is_write() => DragonState::Modified,
            _ => state,
        }
    }

    fn request_event(req: &ProcCacheReq, resident: bool) -> BusEvent {
        // misses always fetch; the write itself travels as the transaction's write intent
        if resident && req.is_write() {
            BusEvent::Update
        } else {
            BusEvent::ReadShared
        }
    }

    fn complete(_state: DragonState, req: &ProcCacheReq, shared: bool) -> DragonState {
        match (req, shared) {
            (ProcCacheReq::Read(_), false) => DragonState::Exclusive,
            (ProcCacheReq::Read(_), true) => DragonState::SharedClean,
            (ProcCacheReq::Write(_), false) => DragonState::Modified,
            (ProcCacheReq::Write(_), true) => DragonState::SharedModified,
        }
    }

    fn snoop(state: &mut DragonState, txn: &BusTransaction, specs: &SystemSpec) -> u32 {
        use DragonState::*;

        let transfer = specs.t_cache_to_cache_transfer();
        let flush = specs.t_flush();
        let update = specs.t_update();
        let (next, cost) = match txn.event {
            BusEvent::ReadShared if !txn.write_intent => match *state {
                NotPresent => return 0,
                Exclusive => (SharedClean, transfer),
                SharedClean => (SharedClean, transfer),
                // the dirty owner answers from its own copy after writing it back
                SharedModified => (SharedModified, flush),
                Modified => (SharedModified, flush + transfer),
            },
            // write miss: supply the block, then take the written word; the
            // requester becomes the only dirty owner
            BusEvent::ReadShared => match *state {
                NotPresent => return 0,
                Exclusive | SharedClean => (SharedClean, transfer + update),
                SharedModified => (SharedClean, flush + update),
                Modified => (SharedClean, flush + transfer + update),
            },
            BusEvent::Update => match *state {
                NotPresent => return 0,
                Exclusive | SharedClean | SharedModified => (SharedClean, update),
                Modified => (SharedClean, flush + update),
            },
            BusEvent::ReadExclusive => return 0,
        };
        *state = next;
        cost
    }
}
