use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use asynchronix::model::Model;
use asynchronix::simulation::{Mailbox, SimInit, Simulation};
use asynchronix::time::MonotonicTime;
use log::{debug, info};

use crate::coherence::{BusController, Cache, CacheId, CoherentCache, Processor, Protocol};
use crate::commons::{Instructions, SystemSpec};
use crate::error::ConfigError;

/// N processors, each bound to its own cache, sharing one bus.
pub struct System<P: Protocol> {
    specs: SystemSpec,
    procs: Vec<Processor>,
    caches: Vec<Cache<P>>,
    ctl: BusController,
    cycle: u64,
}

impl<P: Protocol> System<P> {
    /// One core per instruction stream.
    pub fn new(specs: SystemSpec, insts: Vec<Instructions>) -> Result<Self, ConfigError> {
        specs.validate()?;
        let caches = (0..insts.len())
            .map(|i| Cache::<P>::new(i, specs))
            .collect::<Result<Vec<_>, _>>()?;
        let procs = insts
            .into_iter()
            .enumerate()
            .map(|(i, insts)| Processor::new(i, insts))
            .collect();
        let mut ctl = BusController::new(specs);
        for cache in &caches {
            ctl.attach(cache);
        }
        Ok(System {
            specs,
            procs,
            caches,
            ctl,
            cycle: 0,
        })
    }

    /// One global cycle. The order is fixed: processors, caches, bus, then
    /// wake-ups for every access that completed during the cycle.
    pub fn step(&mut self) {
        self.tick();
        self.post_tick();
    }

    /// first half of a cycle: processors, caches and the bus advance
    pub fn tick(&mut self) {
        for (proc, cache) in self.procs.iter_mut().zip(self.caches.iter_mut()) {
            proc.tick(cache, &mut self.ctl);
        }
        for cache in self.caches.iter_mut() {
            cache.tick(&mut self.ctl);
        }
        self.ctl.tick(&mut self.caches);
    }

    /// second half of a cycle: completed accesses wake their processors
    pub fn post_tick(&mut self) {
        for (proc, cache) in self.procs.iter_mut().zip(self.caches.iter_mut()) {
            if cache.take_wakeup() {
                proc.wake();
            }
        }
        self.cycle += 1;
    }

    pub fn is_done(&self) -> bool {
        self.procs.iter().all(|p| p.is_done())
    }

    /// Steps until every core finished or `max_cycles` elapsed.
    pub fn run(&mut self, max_cycles: Option<u64>) -> u64 {
        while !self.is_done() && max_cycles.map_or(true, |max| self.cycle < max) {
            self.step();
        }
        self.cycle
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn specs(&self) -> &SystemSpec {
        &self.specs
    }

    pub fn processor(&self, id: CacheId) -> &Processor {
        &self.procs[id]
    }

    pub fn cache(&self, id: CacheId) -> &Cache<P> {
        &self.caches[id]
    }

    pub fn caches(&self) -> &[Cache<P>] {
        &self.caches
    }

    pub fn controller(&self) -> &BusController {
        &self.ctl
    }

    pub fn report(&self) -> Report {
        let cores = self.procs
            .iter()
            .zip(self.caches.iter())
            .map(|(proc, cache)| CoreReport {
                id: proc.id,
                cycles: proc.cycle_count(),
                compute_cycles: proc.compute_cycle_count(),
                loads: proc.load_count(),
                stores: proc.store_count(),
                idle_cycles: proc.idle_cycle_count(),
                misses: cache.miss_count(),
                private_accesses: cache.private_accesses(),
                shared_accesses: cache.shared_accesses(),
            })
            .collect::<Vec<_>>();
        Report {
            protocol: P::NAME,
            cycles: cores.iter().map(|c| c.cycles).max().unwrap_or(0),
            finished: self.is_done(),
            bus_traffic: self.ctl.bus_traffic(),
            invalidations: self.ctl.bus().invalidations(),
            updates: self.ctl.bus().updates(),
            bus_grants: self.ctl.grants(),
            cores,
        }
    }
}

// statistics

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoreReport {
    pub id: CacheId,
    pub cycles: u64,
    pub compute_cycles: u64,
    pub loads: u64,
    pub stores: u64,
    pub idle_cycles: u64,
    pub misses: u64,
    pub private_accesses: u64,
    pub shared_accesses: u64,
}

impl CoreReport {
    pub fn accesses(&self) -> u64 {
        self.loads + self.stores
    }

    /// in percent of all loads and stores
    pub fn miss_rate(&self) -> f64 {
        match self.accesses() {
            0 => 0.0,
            n => self.misses as f64 / n as f64 * 100.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Report {
    pub protocol: &'static str,
    pub cycles: u64,
    pub finished: bool,
    pub cores: Vec<CoreReport>,
    pub bus_traffic: u64,       // bytes
    pub invalidations: u64,
    pub updates: u64,
    pub bus_grants: u64,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "protocol: {}", self.protocol)?;
        writeln!(f, "overall execution cycles: {}", self.cycles)?;
        if !self.finished {
            writeln!(f, "(cycle limit reached before all cores finished)")?;
        }
        writeln!(
            f,
            "{:>4} {:>12} {:>12} {:>10} {:>10} {:>12} {:>10} {:>9} {:>10} {:>10}",
            "core", "cycles", "compute", "loads", "stores", "idle", "misses", "miss %", "private", "shared"
        )?;
        for c in &self.cores {
            writeln!(
                f,
                "{:>4} {:>12} {:>12} {:>10} {:>10} {:>12} {:>10} {:>9.3} {:>10} {:>10}",
                c.id, c.cycles, c.compute_cycles, c.loads, c.stores, c.idle_cycles,
                c.misses, c.miss_rate(), c.private_accesses, c.shared_accesses
            )?;
        }
        writeln!(f, "bus data traffic: {} bytes", self.bus_traffic)?;
        writeln!(f, "bus transactions: {}", self.bus_grants)?;
        writeln!(f, "invalidations: {}", self.invalidations)?;
        write!(f, "updates: {}", self.updates)
    }
}

// simulation clock

/// Runs a `System` as an asynchronix model, one tick event per cycle.
pub struct Machine<P: Protocol> {
    system: System<P>,
    ticked: bool,       // a tick of the current cycle awaits its post-tick
    done: Arc<AtomicBool>,
    report: Arc<Mutex<Option<Report>>>,
}

/// Shared view on a `Machine` that was moved into the simulation.
#[derive(Clone)]
pub struct MachineHandle {
    done: Arc<AtomicBool>,
    report: Arc<Mutex<Option<Report>>>,
}

impl MachineHandle {
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Relaxed)
    }

    pub fn take_report(&self) -> Option<Report> {
        self.report.lock().ok().and_then(|mut r| r.take())
    }
}

impl<P: Protocol> Machine<P> {
    pub fn new(system: System<P>) -> (Self, MachineHandle) {
        let done = Arc::new(AtomicBool::new(false));
        let report = Arc::new(Mutex::new(None));
        let handle = MachineHandle {
            done: done.clone(),
            report: report.clone(),
        };
        (Machine { system, ticked: false, done, report }, handle)
    }

    pub async fn on_tick(&mut self, _: ()) {
        if !self.system.is_done() {
            self.system.tick();
            self.ticked = true;
        }
    }

    pub async fn on_post_tick(&mut self, _: ()) {
        if std::mem::take(&mut self.ticked) {
            self.system.post_tick();
        }
        if self.system.is_done() {
            self.done.store(true, Ordering::Relaxed);
        }
    }

    pub async fn on_publish(&mut self, _: ()) {
        if let Ok(mut report) = self.report.lock() {
            *report = Some(self.system.report());
        }
    }
}

impl<P: Protocol> Model for Machine<P> {}

/// Simulates one core per instruction stream until all of them finished or
/// `max_cycles` elapsed.
pub fn simulate<P: Protocol>(
    specs: SystemSpec,
    insts: Vec<Instructions>,
    max_cycles: Option<u64>,
) -> Result<Report, ConfigError> {
    let num_cores = insts.len();
    let system = System::<P>::new(specs, insts)?;
    info!(
        "simulating {} cores under {}: {} byte caches, {}-way, {} byte blocks",
        num_cores, P::NAME, specs.cache_size, specs.cache_assoc, specs.block_size
    );

    // create model and mailbox
    let (machine, handle) = Machine::new(system);
    let machine_mbox = Mailbox::<Machine<P>>::new();
    let tick_addr = machine_mbox.address();

    // initialize simulation
    let mut sim = SimInit::new()
        .add_model(machine, machine_mbox)
        .init(MonotonicTime::EPOCH);

    // run simulation, one simulated second per cycle
    let elapsed = |sim: &Simulation| sim.time().as_secs().max(0) as u64;
    while !handle.is_done() && max_cycles.map_or(true, |max| elapsed(&sim) < max) {
        sim.send_event(Machine::<P>::on_tick, (), &tick_addr);
        sim.send_event(Machine::<P>::on_post_tick, (), &tick_addr);
        sim.step_by(Duration::from_secs(1));
    }
    debug!("clock stopped after {} cycles", elapsed(&sim));

    sim.send_event(Machine::<P>::on_publish, (), &tick_addr);
    let report = handle
        .take_report()
        .expect("machine did not publish its report");
    info!("simulation finished after {} cycles", report.cycles);
    Ok(report)
}
