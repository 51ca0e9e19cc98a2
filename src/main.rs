use std::error::Error;
use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use env_logger::Env;
use log::info;

use cachesim::coherence::{Dragon, Mesi};
use cachesim::commons::*;
use cachesim::simulator::simulate;
use cachesim::utils;

/// Cycle-level simulator of snooping caches under MESI or Dragon.
#[derive(Debug, Parser)]
#[command(name = "cachesim", version, about)]
struct Cli {
    #[arg(value_enum, ignore_case = true)]
    protocol: Protocol,

    /// benchmark name; each `<INPUT>*.data` trace runs on its own core
    input: String,

    /// bytes
    #[arg(default_value_t = 4096)]
    cache_size: u32,

    /// blocks per set
    #[arg(default_value_t = 2)]
    associativity: u32,

    /// bytes
    #[arg(default_value_t = 32)]
    block_size: u32,

    #[arg(long, default_value = "datasets")]
    trace_dir: PathBuf,

    /// read at most this many instructions per trace
    #[arg(long)]
    max_instructions: Option<usize>,

    /// stop after this many cycles even if cores are still running
    #[arg(long)]
    max_cycles: Option<u64>,
}

fn main() -> Result<(), Box<dyn Error>> {
    // logging
    let env = Env::default()
        .filter_or("CACHESIM_LOG", "warn")
        .write_style_or("CACHESIM_LOG_STYLE", "auto");
    env_logger::init_from_env(env);

    let cli = Cli::parse();
    let specs = SystemSpec {
        protocol: cli.protocol,
        cache_size: cli.cache_size,
        cache_assoc: cli.associativity,
        block_size: cli.block_size,
        ..Default::default()
    };
    specs.validate()?;

    let insts = utils::read_testfiles(&cli.trace_dir, &cli.input, cli.max_instructions)?;
    info!("{} cores, {:?}", insts.len(), specs);

    let t0 = Instant::now();
    let report = match specs.protocol {
        Protocol::Mesi => simulate::<Mesi>(specs, insts, cli.max_cycles)?,
        Protocol::Dragon => simulate::<Dragon>(specs, insts, cli.max_cycles)?,
    };
    let t1 = Instant::now();

    println!("{report}");
    println!("execution time {:?}", t1 - t0);
    Ok(())
}
