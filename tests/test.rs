use std::fs;
use std::path::PathBuf;

use cachesim::coherence::{
    self, BusController, BusEvent, BusTransaction, Cache, CacheState, CoherentCache, Dragon, DragonState, Mesi,
    MesiState, ProcState, Processor, Protocol as _,
};
use cachesim::commons::*;
use cachesim::error::{ConfigError, TraceError};
use cachesim::simulator::{simulate, System};
use cachesim::utils::{parse_trace, read_testfiles};

fn system<P: coherence::Protocol>(specs: SystemSpec, traces: Vec<Vec<Instr>>) -> System<P> {
    System::new(specs, traces.into_iter().map(Instructions::from).collect()).unwrap()
}

// a single set of two 32 byte blocks, so every third distinct block evicts
fn one_set() -> SystemSpec {
    SystemSpec {
        cache_size: 64,
        ..Default::default()
    }
}

#[test]
fn test_address_mapping() {
    let specs = SystemSpec::default();
    assert_eq!(specs.num_sets(), 64);
    assert_eq!(Addr(0x1234).pos(&specs), (17, 2));
    assert_eq!(Addr(0x1f).pos(&specs), Addr(0).pos(&specs));
    assert_eq!(specs.t_cache_to_cache_msg(), 2);
    assert_eq!(specs.t_cache_to_cache_transfer(), 16);
}

#[test]
fn test_config_errors() {
    let zero = SystemSpec { word_size: 0, ..Default::default() };
    assert_eq!(zero.validate(), Err(ConfigError::Zero("word size")));

    let unaligned = SystemSpec { block_size: 30, ..Default::default() };
    assert!(matches!(unaligned.validate(), Err(ConfigError::BlockNotWordAligned { .. })));

    let geometry = SystemSpec { cache_size: 100, ..Default::default() };
    assert!(matches!(geometry.validate(), Err(ConfigError::Geometry { .. })));

    assert!(Cache::<Mesi>::new(0, geometry).is_err());
    assert!(System::<Dragon>::new(geometry, vec![Instructions::new()]).is_err());

    // a zero latency would make a data fetch free and leave the requester without data
    let no_mem = SystemSpec { mem_lat: 0, ..Default::default() };
    assert_eq!(no_mem.validate(), Err(ConfigError::Zero("memory latency")));
    assert!(System::<Mesi>::new(no_mem, vec![Instructions::from(vec![Instr::Read(Addr(0))])]).is_err());

    let no_bus = SystemSpec { bus_word_tf_lat: 0, ..Default::default() };
    assert_eq!(no_bus.validate(), Err(ConfigError::Zero("bus word transfer latency")));
    assert!(Cache::<Dragon>::new(1, no_bus).is_err());
}

#[test]
fn test_transaction_phases() {
    let mut txn = BusTransaction::new(0, BusEvent::ReadShared, Addr(0), 2, true);
    assert!(!txn.tick());
    assert!(txn.tick());
    assert!(txn.is_done());
    assert!(txn.awaits_data());

    txn.extend(16);
    assert!(!txn.is_done());
    assert!(!txn.awaits_data());
    assert_eq!(txn.remaining, 16);
}

#[test]
fn test_single_read_miss() {
    let mut sys = system::<Mesi>(SystemSpec::default(), vec![vec![Instr::Read(Addr(0))]]);

    sys.step();
    assert_eq!(sys.processor(0).state(), ProcState::Blocking);
    assert_eq!(sys.cache(0).state(), CacheState::WaitingForBusData);
    assert_eq!(sys.controller().master(), Some(0));

    // request message, then the block from memory
    assert_eq!(sys.run(None), 102);
    assert_eq!(sys.cache(0).line_state(Addr(0)), MesiState::Exclusive);
    assert_eq!(sys.processor(0).state(), ProcState::Idle);

    let report = sys.report();
    assert_eq!(report.cycles, 102);
    assert!(report.finished);
    assert_eq!(report.bus_traffic, 32);
    assert_eq!(report.cores[0].misses, 1);
    assert_eq!(report.cores[0].idle_cycles, 101);
    assert_eq!(report.cores[0].loads, 1);
}

#[test]
fn test_private_hit_takes_one_cycle() {
    let mut sys = system::<Mesi>(
        SystemSpec::default(),
        vec![vec![Instr::Read(Addr(0)), Instr::Read(Addr(4)), Instr::Write(Addr(8))]],
    );
    assert_eq!(sys.run(None), 104);
    assert_eq!(sys.cache(0).line_state(Addr(0)), MesiState::Modified);
    assert_eq!(sys.cache(0).miss_count(), 1);
    assert_eq!(sys.cache(0).private_accesses(), 2);
    assert_eq!(sys.controller().grants(), 1);
}

#[test]
fn test_mesi_read_sharing() {
    let read = vec![Instr::Read(Addr(0))];
    let mut sys = system::<Mesi>(SystemSpec::default(), vec![read.clone(), read]);

    sys.step();
    assert_eq!(sys.controller().master(), Some(0));
    assert_eq!(sys.controller().queued().collect::<Vec<_>>(), vec![1]);

    // the second read is served by the first cache
    assert_eq!(sys.run(None), 120);
    assert_eq!(sys.cache(0).line_state(Addr(0)), MesiState::Shared);
    assert_eq!(sys.cache(1).line_state(Addr(0)), MesiState::Shared);

    let report = sys.report();
    assert_eq!(report.cycles, 120);
    assert_eq!(report.cores[0].cycles, 102);
    assert_eq!(report.bus_traffic, 64);
    assert_eq!(report.bus_grants, 2);
}

#[test]
fn test_mesi_modified_block_read_by_other() {
    let mut sys = system::<Mesi>(
        SystemSpec::default(),
        vec![vec![Instr::Write(Addr(0))], vec![Instr::Read(Addr(0))]],
    );

    // the owner flushes, then hands the block over
    sys.run(Some(104));
    assert_eq!(sys.cache(0).line_state(Addr(0)), MesiState::Shared);
    let txn = sys.controller().bus().current().unwrap();
    assert_eq!((txn.sender, txn.data_phase, txn.remaining), (1, true, 116));
    assert!(sys.controller().exists_elsewhere(sys.caches(), 1, Addr(0)));
    assert!(!sys.controller().exists_elsewhere(sys.caches(), 0, Addr(0)));

    assert_eq!(sys.run(None), 220);
    assert_eq!(sys.cache(0).line_state(Addr(0)), MesiState::Shared);
    assert_eq!(sys.cache(1).line_state(Addr(0)), MesiState::Shared);
    assert!(sys.controller().exists_elsewhere(sys.caches(), 0, Addr(0)));
    assert!(sys.controller().exists_elsewhere(sys.caches(), 1, Addr(0)));
    assert!(sys.controller().bus().current().is_none());

    let report = sys.report();
    assert_eq!(report.cores[1].cycles, 220);
    assert_eq!(report.bus_traffic, 64);
    assert_eq!(report.invalidations, 1);
}

#[test]
fn test_bus_grants_in_request_order() {
    let mut sys = system::<Mesi>(
        SystemSpec::default(),
        (0..4).map(|i| vec![Instr::Read(Addr(i * 32))]).collect(),
    );
    sys.step();
    assert_eq!(sys.controller().master(), Some(0));
    assert_eq!(sys.controller().queued().collect::<Vec<_>>(), vec![1, 2, 3]);

    // every transaction is a request plus a memory fetch
    sys.run(Some(102));
    assert_eq!(sys.controller().master(), Some(1));
    assert_eq!(sys.controller().queued().collect::<Vec<_>>(), vec![2, 3]);
    assert_eq!(sys.controller().bus().current().map(|t| t.sender), Some(1));

    sys.run(Some(204));
    assert_eq!(sys.controller().master(), Some(2));
    assert_eq!(sys.controller().queued().collect::<Vec<_>>(), vec![3]);

    assert_eq!(sys.run(None), 408);
    let cycles = sys.report().cores.iter().map(|c| c.cycles).collect::<Vec<_>>();
    assert_eq!(cycles, vec![102, 204, 306, 408]);
    assert_eq!(sys.controller().master(), None);
    assert_eq!(sys.controller().grants(), 4);
}

#[test]
fn test_mesi_write_invalidates_sharers() {
    let mut sys = system::<Mesi>(
        SystemSpec::default(),
        vec![
            vec![Instr::Read(Addr(0))],
            vec![Instr::Read(Addr(0)), Instr::Write(Addr(0))],
        ],
    );
    assert_eq!(sys.run(None), 122);
    assert_eq!(sys.cache(0).line_state(Addr(0)), MesiState::Invalid);
    assert!(!sys.cache(0).cache_hit(Addr(0)));
    assert_eq!(sys.cache(1).line_state(Addr(0)), MesiState::Modified);

    let report = sys.report();
    assert_eq!(report.invalidations, 1);
    assert_eq!(report.updates, 0);
    assert_eq!(report.bus_traffic, 64);
    assert_eq!(report.cores[1].shared_accesses, 1);
}

#[test]
fn test_mesi_upgrade_lost_while_queued() {
    // both caches share the block and write it in consecutive cycles
    let mut sys = system::<Mesi>(
        SystemSpec::default(),
        vec![
            vec![Instr::Read(Addr(0)), Instr::Other(19), Instr::Write(Addr(0))],
            vec![Instr::Read(Addr(0)), Instr::Write(Addr(0))],
        ],
    );
    sys.run(Some(122));
    assert_eq!(sys.controller().master(), Some(0));
    assert_eq!(sys.cache(0).state(), CacheState::WaitingForBusData);
    assert_eq!(sys.cache(1).line_state(Addr(0)), MesiState::Modified);

    assert_eq!(sys.run(None), 140);
    assert_eq!(sys.cache(0).line_state(Addr(0)), MesiState::Modified);
    assert_eq!(sys.cache(1).line_state(Addr(0)), MesiState::Invalid);
    assert_eq!(sys.report().invalidations, 2);
    assert_eq!(sys.report().bus_traffic, 96);
}

#[test]
fn test_dragon_write_updates_sharers() {
    let mut sys = system::<Dragon>(
        SystemSpec { protocol: Protocol::Dragon, ..Default::default() },
        vec![
            vec![Instr::Read(Addr(0))],
            vec![Instr::Read(Addr(0)), Instr::Write(Addr(0))],
        ],
    );
    assert_eq!(sys.run(None), 122);
    assert_eq!(sys.cache(0).line_state(Addr(0)), DragonState::SharedClean);
    assert_eq!(sys.cache(1).line_state(Addr(0)), DragonState::SharedModified);

    let report = sys.report();
    assert_eq!(report.updates, 1);
    assert_eq!(report.invalidations, 0);
    // two blocks and one word
    assert_eq!(report.bus_traffic, 68);
}

#[test]
fn test_dragon_write_miss_on_shared_block() {
    let mut sys = system::<Dragon>(
        SystemSpec { protocol: Protocol::Dragon, ..Default::default() },
        vec![vec![Instr::Read(Addr(0))], vec![Instr::Write(Addr(0))]],
    );
    assert_eq!(sys.run(None), 122);
    assert_eq!(sys.cache(0).line_state(Addr(0)), DragonState::SharedClean);
    assert_eq!(sys.cache(1).line_state(Addr(0)), DragonState::SharedModified);
    assert_eq!(sys.cache(1).miss_count(), 1);
}

#[test]
fn test_dragon_modified_block_read_by_other() {
    let mut sys = system::<Dragon>(
        SystemSpec { protocol: Protocol::Dragon, ..Default::default() },
        vec![vec![Instr::Write(Addr(0))], vec![Instr::Read(Addr(0))]],
    );
    sys.run(Some(104));
    assert_eq!(sys.cache(0).line_state(Addr(0)), DragonState::SharedModified);
    assert_eq!(sys.controller().bus().current().map(|t| t.remaining), Some(116));

    assert_eq!(sys.run(None), 220);
    assert_eq!(sys.cache(0).line_state(Addr(0)), DragonState::SharedModified);
    assert_eq!(sys.cache(1).line_state(Addr(0)), DragonState::SharedClean);
    assert_eq!(sys.report().updates, 0);
}

#[test]
fn test_dragon_snoop_table() {
    let specs = SystemSpec { protocol: Protocol::Dragon, ..Default::default() };
    let update = BusTransaction::new(1, BusEvent::Update, Addr(0), 2, false);
    let read = BusTransaction::new(1, BusEvent::ReadShared, Addr(0), 2, true);

    let mut state = DragonState::Modified;
    assert_eq!(Dragon::snoop(&mut state, &update, &specs), 102);
    assert_eq!(state, DragonState::SharedClean);

    let mut state = DragonState::Modified;
    assert_eq!(Dragon::snoop(&mut state, &read, &specs), 116);
    assert_eq!(state, DragonState::SharedModified);

    let mut state = DragonState::Modified;
    assert_eq!(Dragon::snoop(&mut state, &read.clone().with_write_intent(true), &specs), 118);
    assert_eq!(state, DragonState::SharedClean);

    let mut state = DragonState::SharedModified;
    assert_eq!(Dragon::snoop(&mut state, &update, &specs), 2);
    assert_eq!(state, DragonState::SharedClean);

    let mut state = DragonState::NotPresent;
    assert_eq!(Dragon::snoop(&mut state, &update, &specs), 0);
    assert_eq!(state, DragonState::NotPresent);
}

#[test]
fn test_dragon_private_write() {
    let mut sys = system::<Dragon>(
        SystemSpec { protocol: Protocol::Dragon, ..Default::default() },
        vec![vec![Instr::Write(Addr(0)), Instr::Read(Addr(0))]],
    );
    assert_eq!(sys.run(None), 103);
    assert_eq!(sys.cache(0).line_state(Addr(0)), DragonState::Modified);
    assert_eq!(sys.report().updates, 0);
}

#[test]
fn test_dirty_eviction_counts_one_miss() {
    let mut sys = system::<Mesi>(
        one_set(),
        vec![vec![Instr::Write(Addr(0)), Instr::Write(Addr(32)), Instr::Write(Addr(64))]],
    );
    sys.run(Some(205));
    assert_eq!(sys.cache(0).state(), CacheState::WaitingForMemory(99));
    assert_eq!(sys.cache(0).miss_count(), 3);

    assert_eq!(sys.run(None), 405);
    assert_eq!(sys.cache(0).miss_count(), 3);
    assert!(!sys.cache(0).cache_hit(Addr(0)));
    assert_eq!(sys.cache(0).line_state(Addr(32)), MesiState::Modified);
    assert_eq!(sys.cache(0).line_state(Addr(64)), MesiState::Modified);
    assert_eq!(sys.report().invalidations, 3);
}

#[test]
fn test_lru_replacement() {
    let mut sys = system::<Mesi>(
        one_set(),
        vec![vec![
            Instr::Read(Addr(0)),
            Instr::Read(Addr(32)),
            Instr::Read(Addr(0)),
            Instr::Read(Addr(64)),
        ]],
    );
    sys.run(None);
    let cache = sys.cache(0);
    assert!(cache.cache_hit(Addr(0)));
    assert!(!cache.cache_hit(Addr(32)));
    assert!(cache.cache_hit(Addr(64)));
    assert_eq!(cache.miss_count(), 3);
    assert_eq!(cache.private_accesses(), 1);
}

#[test]
fn test_cache_hit_follows_line_state() {
    let specs = SystemSpec::default();
    let cache = Cache::<Dragon>::new(0, specs).unwrap();
    assert!(!cache.cache_hit(Addr(0)));
    assert_eq!(cache.line_state(Addr(0)), DragonState::NotPresent);
    assert_eq!(cache.state(), CacheState::Idle);
}

#[test]
fn test_processor_compute() {
    let mut sys = system::<Mesi>(
        SystemSpec::default(),
        vec![vec![Instr::Other(5), Instr::Other(0)]],
    );
    sys.step();
    assert_eq!(sys.processor(0).state(), ProcState::Executing);
    assert_eq!(sys.processor(0).remaining_instructions(), 1);
    sys.run(None);
    let proc = sys.processor(0);
    assert!(proc.is_done());
    assert_eq!(proc.cycle_count(), 5);
    assert_eq!(proc.compute_cycle_count(), 5);
    assert_eq!(proc.idle_cycle_count(), 0);
    assert_eq!(sys.controller().grants(), 0);
}

#[test]
fn test_empty_trace_is_done() {
    let mut sys = system::<Mesi>(SystemSpec::default(), vec![vec![]]);
    assert!(sys.is_done());
    assert_eq!(sys.run(None), 0);
    assert_eq!(sys.report().cycles, 0);
    assert_eq!(sys.report().cores[0].miss_rate(), 0.0);
}

#[test]
#[should_panic(expected = "wake called")]
fn test_wake_without_request() {
    let mut proc = Processor::new(0, Instructions::new());
    proc.wake();
}

#[test]
#[should_panic(expected = "attached twice")]
fn test_attach_twice() {
    let specs = SystemSpec::default();
    let cache = Cache::<Mesi>::new(0, specs).unwrap();
    let mut ctl = BusController::new(specs);
    ctl.attach(&cache);
    ctl.attach(&cache);
}

#[test]
#[should_panic(expected = "already queued")]
fn test_request_ownership_twice() {
    let specs = SystemSpec::default();
    let mut cache = Cache::<Mesi>::new(0, specs).unwrap();
    let mut ctl = BusController::new(specs);
    ctl.attach(&cache);
    cache.ask(ProcCacheReq::Read(Addr(0)), &mut ctl);
    assert_eq!(ctl.master(), Some(0));
    ctl.request_ownership(&mut cache);
}

#[test]
#[should_panic(expected = "alert called with no active transaction")]
fn test_alert_on_idle_bus() {
    let specs = SystemSpec::default();
    let mut caches = vec![Cache::<Mesi>::new(0, specs).unwrap()];
    let mut ctl = BusController::new(specs);
    ctl.attach(&caches[0]);
    ctl.alert(&mut caches);
}

fn contested_traces() -> Vec<Vec<Instr>> {
    vec![
        vec![Instr::Write(Addr(0)), Instr::Read(Addr(32)), Instr::Write(Addr(64)), Instr::Write(Addr(32))],
        vec![Instr::Read(Addr(0)), Instr::Write(Addr(32)), Instr::Read(Addr(64)), Instr::Write(Addr(0))],
        vec![Instr::Read(Addr(64)), Instr::Other(3), Instr::Write(Addr(0)), Instr::Read(Addr(32))],
    ]
}

#[test]
fn test_counters_match_grants() {
    let mut sys = system::<Mesi>(one_set(), contested_traces());
    sys.run(None);
    assert_eq!(sys.specs().cache_size, 64);

    let report = sys.report();
    let ctl = sys.controller();
    assert!(report.finished);
    assert_eq!(report.invalidations, ctl.grants_of(BusEvent::ReadExclusive));
    assert_eq!(report.updates, ctl.grants_of(BusEvent::Update));
    assert_eq!(report.updates, 0);
    assert_eq!(
        report.bus_grants,
        ctl.grants_of(BusEvent::ReadShared) + ctl.grants_of(BusEvent::ReadExclusive)
    );
    let accesses: u64 = report.cores.iter().map(|c| c.accesses()).sum();
    assert_eq!(accesses, 11);

    let mut sys = system::<Dragon>(
        SystemSpec { protocol: Protocol::Dragon, ..one_set() },
        contested_traces(),
    );
    sys.run(None);
    let report = sys.report();
    let ctl = sys.controller();
    assert!(report.finished);
    assert_eq!(report.updates, ctl.grants_of(BusEvent::Update));
    assert_eq!(report.invalidations, 0);
    assert_eq!(ctl.grants_of(BusEvent::ReadExclusive), 0);
    assert_eq!(report.bus_grants, ctl.grants_of(BusEvent::ReadShared) + ctl.grants_of(BusEvent::Update));
}

#[test]
fn test_trace_parsing() {
    let insts = parse_trace("0 0x20\n\n  2 a\n1 40\n", None).unwrap();
    assert_eq!(
        insts.iter().copied().collect::<Vec<_>>(),
        vec![Instr::Read(Addr(0x20)), Instr::Other(10), Instr::Write(Addr(0x40))]
    );
    assert_eq!(parse_trace("0 0x20\n1 0x40\n2 0x1\n", Some(2)).unwrap().len(), 2);

    assert!(matches!(parse_trace("0 0x10 7", None), Err(TraceError::Malformed { line: 1, .. })));
    assert!(matches!(parse_trace("0 1\n3 10", None), Err(TraceError::UnknownOp { line: 2, .. })));
    assert!(matches!(parse_trace("1 0xzz", None), Err(TraceError::Value { line: 1, .. })));
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("cachesim-{}-{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn test_read_testfiles() {
    let dir = scratch_dir("traces");
    fs::write(dir.join("bench_1.data"), "1 0x40\n").unwrap();
    fs::write(dir.join("bench_0.data"), "0 0x20\n2 0x3\n").unwrap();
    fs::write(dir.join("bench_2.data"), "not a trace\n").unwrap();
    fs::write(dir.join("other_0.data"), "0 0x0\n").unwrap();

    let insts = read_testfiles(&dir, "bench", None).unwrap();
    assert_eq!(insts.len(), 3);
    assert_eq!(insts[0].len(), 2);
    assert_eq!(insts[1].front(), Some(&Instr::Write(Addr(0x40))));
    assert!(insts[2].is_empty());

    assert!(matches!(read_testfiles(&dir, "missing", None), Err(TraceError::NoTraces { .. })));
    assert!(matches!(
        read_testfiles(&dir.join("nope"), "bench", None),
        Err(TraceError::Io { .. })
    ));
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_simulate() {
    let read = Instructions::from(vec![Instr::Read(Addr(0))]);
    let report = simulate::<Mesi>(SystemSpec::default(), vec![read.clone(), read.clone()], None).unwrap();
    assert!(report.finished);
    assert_eq!(report.protocol, "MESI");
    assert_eq!(report.cycles, 120);
    assert_eq!(report.bus_traffic, 64);

    let text = report.to_string();
    assert!(text.contains("protocol: MESI"));
    assert!(text.contains("bus data traffic: 64 bytes"));

    let cut = simulate::<Dragon>(SystemSpec::default(), vec![read], Some(10)).unwrap();
    assert!(!cut.finished);
    assert_eq!(cut.cycles, 10);
}
