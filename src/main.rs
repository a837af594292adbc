// BEDLAM v1.2.0 -- MULTI-CORE SCHEDULING POLICY ENGINE
// PER-CORE FIFO QUEUES + INTERACTIVITY CLASSIFICATION + WORK STEALING
//
// THE BINARY DRIVES THE ENGINE WITH A SYNTHETIC WORKLOAD ON A DETECTED
// OR SYNTHETIC TOPOLOGY AND REPORTS WHAT THE POLICY DID

mod cli;

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use clap::{Parser, Subcommand};

use bedlam::clock::Clock;
use bedlam::engine::Engine;
use bedlam::event::EventLog;
use bedlam::params::Params;
use bedlam::sim::{self, SimConfig};
use bedlam::topology::{detect_host, synthetic};
use bedlam::{log_info, log_warn};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[derive(Parser)]
#[command(name = "bedlam")]
#[command(about = "BEDLAM -- MULTI-CORE SCHEDULING POLICY ENGINE")]
struct Cli {
    // CORES TO SIMULATE (0 = DETECT FROM THE HOST)
    #[arg(long, default_value_t = 0)]
    cores: usize,

    // SYNTHETIC PROCESSES TO FORK
    #[arg(long, default_value_t = 32)]
    procs: usize,

    // SIMULATED DURATION IN TICKS (1 TICK = 1MS)
    #[arg(long, default_value_t = 10_000)]
    ticks: u64,

    // BASE TIME SLICE IN TICKS
    #[arg(long, default_value_t = 200)]
    slice: i64,

    // PERIODIC BALANCING INTERVAL IN TICKS
    #[arg(long, default_value_t = 128)]
    balance_interval: u32,

    // WORKLOAD SEED
    #[arg(long, default_value_t = 0xBED1A)]
    seed: u32,

    // SHARE OF INTERACTIVE PROCESSES, 0..=100
    #[arg(long, default_value_t = 40)]
    interactive_pct: u32,

    // DUMP FULL EVENT LOG ON EXIT
    #[arg(long)]
    dump_log: bool,

    // DUMP EVERY CORE'S RUN STATE ON EXIT
    #[arg(long)]
    dump_cores: bool,

    // PRINT VERBOSE OUTPUT
    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    // CHECK HOST SUPPORT FOR TOPOLOGY DETECTION
    Check,
    // PRINT THE DETECTED SCHEDULING-DOMAIN HIERARCHY
    Topo,
}

fn nr_host_cpus() -> usize {
    let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if n < 1 {
        1
    } else {
        n as usize
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Check) => return cli::check::run_check(),
        Some(Command::Topo) => return cli::topo::run_topo(),
        None => {}
    }

    ctrlc::set_handler(move || {
        SHUTDOWN.store(true, Ordering::Relaxed);
    })?;

    let nr_cores = if cli.cores > 0 { cli.cores } else { nr_host_cpus() };

    // CACHE TOPOLOGY FROM SYSFS WHEN SIMULATING THE HOST'S OWN CORE
    // COUNT; A SYNTHETIC TWO-LEVEL HIERARCHY OTHERWISE
    let chains = if cli.cores == 0 {
        match detect_host(nr_cores) {
            Ok(chains) => chains,
            Err(e) => {
                log_warn!("TOPOLOGY DETECTION FAILED ({}), USING SYNTHETIC", e);
                synthetic(nr_cores, &[2, 4])
            }
        }
    } else {
        synthetic(nr_cores, &[2, 4])
    };

    let params = Params {
        slice_ticks: cli.slice,
        balance_interval: cli.balance_interval.max(1),
        ..Default::default()
    };

    println!("BEDLAM v1.2.0");
    println!("CORES:           {}{}", nr_cores,
             if cli.cores == 0 { " (host)" } else { " (synthetic)" });
    println!("PROCESSES:       {}", cli.procs);
    println!("DURATION:        {} ticks", cli.ticks);
    println!("SLICE:           {} ticks (min divisor {})", params.slice_ticks, params.slice_min_divisor);
    println!("BALANCE:         every ~{} ticks", params.balance_interval);
    println!("INTERACTIVE:     {}%", cli.interactive_pct);
    println!("SEED:            {:#x}", cli.seed);
    println!("VERBOSE:         {}", cli.verbose);
    println!();

    let engine = Engine::new(nr_cores, params, &chains, Clock::manual())?;
    for core in 0..nr_cores {
        engine.on_core_entry(core);
    }

    if cli.verbose {
        print!("{}", engine.dump_topology());
        println!();
    }

    println!("BEDLAM IS ACTIVE (CTRL+C TO EXIT)");

    let cfg = SimConfig {
        nr_procs: cli.procs,
        duration_ticks: cli.ticks,
        seed: cli.seed,
        interactive_pct: cli.interactive_pct.min(100),
        verbose: cli.verbose,
    };
    let mut log = EventLog::new();

    if cli.dump_cores {
        // DUMP BEFORE THE DRAIN SO THE QUEUES ARE STILL POPULATED
        sim::run_with_dump(&engine, &cfg, &mut log, &SHUTDOWN)?;
    } else {
        sim::run(&engine, &cfg, &mut log, &SHUTDOWN)?;
    }

    println!("BEDLAM IS SHUTTING DOWN");

    if cli.dump_log {
        log.dump();
    }
    log.summary();

    let stats = engine.stats.snapshot();
    log_info!(
        "STATS: dispatches={} migrations={} steals={} passes={} skips={} forks={} exits={} expiries={} yields={} wake_int={} wake_reg={}",
        stats.nr_dispatches,
        stats.nr_migrations,
        stats.nr_steal_attempts,
        stats.nr_balance_passes,
        stats.nr_balance_skips,
        stats.nr_forks,
        stats.nr_exits,
        stats.nr_slice_expiries,
        stats.nr_yields,
        stats.nr_wakeups_interactive,
        stats.nr_wakeups_regular
    );

    println!("BEDLAM OUT.");
    Ok(())
}
