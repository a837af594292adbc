// SYNTHETIC WORKLOAD DRIVER
// PLAYS THE HOST RUNTIME'S ROLE AGAINST THE POLICY ENGINE: FORKS A
// PROCESS MIX, DELIVERS TICKS, BLOCKS AND WAKES SLEEPERS, FIRES THE
// PERIODIC BALANCER, AND SAMPLES STATS INTO THE EVENT LOG. DRIVEN BY
// THE MANUAL CLOCK SO EVERY RUN WITH THE SAME SEED IS REPRODUCIBLE.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;

use crate::engine::Engine;
use crate::event::EventLog;
use crate::log_info;
use crate::mask::CoreSet;
use crate::params::TICK_NS;
use crate::process::Pid;

const SNAPSHOT_EVERY_TICKS: u64 = 1000;

#[derive(Clone, Copy)]
pub struct SimConfig {
    pub nr_procs: usize,
    pub duration_ticks: u64,
    pub seed: u32,
    // SHARE OF PROCESSES WITH A RUN/SLEEP PATTERN, 0..=100
    pub interactive_pct: u32,
    pub verbose: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            nr_procs: 32,
            duration_ticks: 10_000,
            seed: 0xBED1A,
            interactive_pct: 40,
            verbose: false,
        }
    }
}

// PER-PROCESS BEHAVIOR SCRIPT
#[derive(Clone, Copy)]
enum Profile {
    CpuBound,
    // RUNS run_ticks, THEN SLEEPS sleep_ticks, FOREVER
    Interactive { run_ticks: u64, sleep_ticks: u64 },
}

struct SimProc {
    profile: Profile,
    // TICKS RUN SINCE LAST DISPATCH-OR-WAKE
    ran: u64,
    // ABSOLUTE TICK AT WHICH A SLEEPER WAKES
    wake_at: Option<u64>,
}

// SAME LCG AS THE PER-CORE JITTER SOURCE, SEPARATELY SEEDED FOR THE
// WORKLOAD SO POLICY JITTER AND WORKLOAD SHAPE DON'T ENTANGLE
struct SimRng(u32);

impl SimRng {
    fn next(&mut self) -> u32 {
        self.0 = self.0.wrapping_mul(69069).wrapping_add(5);
        self.0 >> 16
    }
}

pub fn run(
    engine: &Engine,
    cfg: &SimConfig,
    log: &mut EventLog,
    shutdown: &AtomicBool,
) -> Result<()> {
    run_inner(engine, cfg, log, shutdown, false)
}

// LIKE run, BUT PRINTS EVERY CORE'S RUN STATE BEFORE THE FINAL DRAIN
// EMPTIES THE QUEUES
pub fn run_with_dump(
    engine: &Engine,
    cfg: &SimConfig,
    log: &mut EventLog,
    shutdown: &AtomicBool,
) -> Result<()> {
    run_inner(engine, cfg, log, shutdown, true)
}

fn run_inner(
    engine: &Engine,
    cfg: &SimConfig,
    log: &mut EventLog,
    shutdown: &AtomicBool,
    dump_before_drain: bool,
) -> Result<()> {
    let nr_cores = engine.nr_cores();
    let mut rng = SimRng(cfg.seed | 1);
    // ORDERED MAP: WAKE-UP AND DRAIN ORDER MUST NOT DEPEND ON HASHING,
    // OR SEEDED RUNS STOP BEING REPRODUCIBLE
    let mut procs: BTreeMap<Pid, SimProc> = BTreeMap::new();

    // FORK THE MIX: ORIGIN CORES ROUND-ROBIN, FULL MASKS
    for i in 0..cfg.nr_procs {
        let pid = (i + 1) as Pid;
        let origin = i % nr_cores;
        let profile = if rng.next() % 100 < cfg.interactive_pct {
            Profile::Interactive {
                run_ticks: 1 + (rng.next() % 4) as u64,
                sleep_ticks: 5 + (rng.next() % 20) as u64,
            }
        } else {
            Profile::CpuBound
        };
        engine.on_new_prepare(pid, None, origin, CoreSet::all(nr_cores))?;
        engine.on_new_place(pid)?;
        procs.insert(pid, SimProc { profile, ran: 0, wake_at: None });
    }
    log_info!("SIM: {} PROCESSES ON {} CORES, {} TICKS",
        cfg.nr_procs, nr_cores, cfg.duration_ticks);

    for tick in 0..cfg.duration_ticks {
        if shutdown.load(Ordering::Relaxed) {
            log_info!("SIM: SHUTDOWN AT TICK {}", tick);
            break;
        }
        engine.clock().advance_ns(TICK_NS);

        // WAKE DUE SLEEPERS
        let due: Vec<Pid> = procs
            .iter()
            .filter(|(_, sp)| sp.wake_at.is_some_and(|w| w <= tick))
            .map(|(&pid, _)| pid)
            .collect();
        for pid in due {
            engine.on_unblock_prepare(pid)?;
            engine.on_unblock_place(pid)?;
            if let Some(sp) = procs.get_mut(&pid) {
                sp.wake_at = None;
                sp.ran = 0;
            }
        }

        // FILL EMPTY CORES, STEALING FIRST WHEN THE LOCAL QUEUES ARE DRY
        for core in 0..nr_cores {
            if engine.current_running(core).is_some() {
                continue;
            }
            if engine.load(core) == 0 {
                engine.on_enter_idle(core);
                engine.on_newly_idle(core);
                if engine.load(core) == 0 {
                    continue;
                }
                engine.on_exit_idle(core);
            }
            engine.schedule(core);
        }

        // DRIVE EVERY RUNNING PROCESS ONE TICK
        for core in 0..nr_cores {
            let Some(pid) = engine.current_running(core) else {
                continue;
            };
            let Some(sp) = procs.get_mut(&pid) else {
                continue;
            };
            sp.ran += 1;
            match sp.profile {
                Profile::CpuBound => {
                    engine.on_tick(pid)?;
                }
                Profile::Interactive { run_ticks, sleep_ticks } => {
                    if sp.ran >= run_ticks {
                        engine.on_block(pid)?;
                        sp.wake_at = Some(tick + sleep_ticks);
                        sp.ran = 0;
                    } else {
                        engine.on_tick(pid)?;
                    }
                }
            }
        }

        // THE PERIODIC BALANCER, TRIGGERED FROM EVERY CORE'S TICK PATH
        for core in 0..nr_cores {
            engine.on_balancing(core);
        }

        if tick % SNAPSHOT_EVERY_TICKS == 0 {
            log.snapshot(engine.clock().now_ns(), &engine.stats.snapshot());
            if cfg.verbose {
                let loads: Vec<String> =
                    (0..nr_cores).map(|c| engine.load(c).to_string()).collect();
                log_info!("TICK {}: LOADS [{}]", tick, loads.join(" "));
            }
        }
    }

    if dump_before_drain {
        for core in 0..nr_cores {
            print!("{}", engine.dump_core(core));
        }
    }

    // DRAIN: TERMINATE EVERYTHING STILL TRACKED, THEN VERIFY THE BOOKS
    for (&pid, _) in procs.iter() {
        engine.on_terminate(pid)?;
    }
    engine.audit()?;
    log.snapshot(engine.clock().now_ns(), &engine.stats.snapshot());
    Ok(())
}
