use log::trace;

use super::bus::BusController;
use super::cache::CoherentCache;
use super::transaction::CacheId;
use crate::commons::*;

#[derive(Default, Clone, Copy, PartialEq, Eq, Debug)]
pub enum ProcState {
    #[default]
    Idle,
    Blocking,       // waiting for the cache to resolve a memory access
    Executing,
}

/// Replays one core's instruction stream against its cache.
pub struct Processor {
    pub id: CacheId,
    state: ProcState,
    instructions: Instructions,
    executing_left: u32,

    // cycle counters
    cycle_count: u64,
    idle_cycle_count: u64,
    compute_cycle_count: u64,

    // instruction counters
    load_count: u64,
    store_count: u64,
}

impl Processor {
    pub fn new(id: CacheId, instructions: Instructions) -> Self {
        Processor {
            id,
            state: ProcState::Idle,
            instructions,
            executing_left: 0,
            cycle_count: 0,
            idle_cycle_count: 0,
            compute_cycle_count: 0,
            load_count: 0,
            store_count: 0,
        }
    }

    pub fn tick<C: CoherentCache>(&mut self, cache: &mut C, ctl: &mut BusController) {
        match self.state {
            ProcState::Idle => self.exec_instr(cache, ctl),
            ProcState::Blocking => self.idle_cycle_count += 1,
            ProcState::Executing => self.tick_other(),
        }
        if !self.is_done() {
            self.cycle_count += 1;
        }
    }

    /// Called on behalf of the bound cache once it resolved the access.
    pub fn wake(&mut self) {
        assert!(
            self.state == ProcState::Blocking,
            "wake called on processor {} while {:?}", self.id, self.state
        );
        self.state = ProcState::Idle;
    }

    pub fn is_done(&self) -> bool {
        self.state == ProcState::Idle && self.instructions.is_empty()
    }

    fn exec_instr<C: CoherentCache>(&mut self, cache: &mut C, ctl: &mut BusController) {
        let Some(instr) = self.instructions.pop_front() else { return };
        trace!("processor {}: executing {:?}", self.id, instr);
        match instr {
            Instr::Read(addr) => {
                self.load_count += 1;
                self.state = ProcState::Blocking;
                cache.ask(ProcCacheReq::Read(addr), ctl);
            },
            Instr::Write(addr) => {
                self.store_count += 1;
                self.state = ProcState::Blocking;
                cache.ask(ProcCacheReq::Write(addr), ctl);
            },
            Instr::Other(0) => (),
            Instr::Other(t) => {
                // the issuing cycle is the first of the burst
                self.compute_cycle_count += u64::from(t);
                self.executing_left = t;
                self.state = ProcState::Executing;
                self.tick_other();
            },
        }
    }

    fn tick_other(&mut self) {
        self.executing_left -= 1;
        if self.executing_left == 0 {
            self.state = ProcState::Idle;
        }
    }

    pub fn state(&self) -> ProcState {
        self.state
    }

    pub fn remaining_instructions(&self) -> usize {
        self.instructions.len()
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    pub fn idle_cycle_count(&self) -> u64 {
        self.idle_cycle_count
    }

    pub fn compute_cycle_count(&self) -> u64 {
        self.compute_cycle_count
    }

    pub fn load_count(&self) -> u64 {
        self.load_count
    }

    pub fn store_count(&self) -> u64 {
        self.store_count
    }
}
