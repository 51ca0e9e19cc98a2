use super::cache::Protocol;
use super::transaction::{BusEvent, BusTransaction};
use crate::commons::{ProcCacheReq, SystemSpec};

/// Invalidate-based coherence: a writer first removes every other copy.
pub struct Mesi;

#[derive(Default, Clone, Copy, PartialEq, Eq, Debug)]
pub enum MesiState {
    #[default]
    Invalid,
    Shared,
    Exclusive,
    Modified,
}

impl Protocol for Mesi {
    type State = MesiState;

    const NAME: &'static str = "MESI";

    fn is_dirty(state: MesiState) -> bool {
        state == MesiState::Modified
    }

    fn is_shared(state: MesiState) -> bool {
        state == MesiState::Shared
    }

    fn hit_needs_bus(state: MesiState, req: &ProcCacheReq) -> bool {
        // write hit on a shared line: invalidate the other copies
        state == MesiState::Shared && req.is_write()
    }

    fn local_hit(state: MesiState, req: &ProcCacheReq) -> MesiState {
        match state {
            MesiState::Exclusive if req.is_write() => MesiState::Modified,
            _ => state,
        }
    }

    fn request_event(req: &ProcCacheReq, _resident: bool) -> BusEvent {
        match req {
            ProcCacheReq::Read(_) => BusEvent::ReadShared,
            ProcCacheReq::Write(_) => BusEvent::ReadExclusive,
        }
    }

    fn complete(_state: MesiState, req: &ProcCacheReq, shared: bool) -> MesiState {
        match req {
            ProcCacheReq::Read(_) if shared => MesiState::Shared,
            ProcCacheReq::Read(_) => MesiState::Exclusive,
            ProcCacheReq::Write(_) => MesiState::Modified,
        }
    }

    fn snoop(state: &mut MesiState, txn: &BusTransaction, specs: &SystemSpec) -> u32 {
        let transfer = specs.t_cache_to_cache_transfer();
        let (next, cost) = match (*state, txn.event) {
            (MesiState::Invalid, _) | (_, BusEvent::Update) => return 0,
            (MesiState::Shared, BusEvent::ReadShared) => (MesiState::Shared, transfer),
            (MesiState::Exclusive, BusEvent::ReadShared) => (MesiState::Shared, transfer),
            // flush before anyone may read memory
            (MesiState::Modified, BusEvent::ReadShared) => (MesiState::Shared, specs.t_flush() + transfer),
            (MesiState::Shared | MesiState::Exclusive | MesiState::Modified, BusEvent::ReadExclusive) => {
                (MesiState::Invalid, transfer)
            },
        };
        *state = next;
        cost
    }
}
