// THE SCHEDULING POLICY ENGINE
// EVENT HANDLERS FOR THE HOST RUNTIME: PROCESS LIFECYCLE (NEW/UNBLOCK IN
// TWO PHASES, TICK, YIELD, BLOCK, TERMINATE), THE PER-CORE SCHEDULING
// DECISION, AND CORE ACTIVITY. PLACEMENT WALKS THE CACHE-DOMAIN CHAIN FOR
// AN IDLE CORE; THE SLICE SHRINKS WITH CORE LOAD; WAKE-UPS EARN THE
// REALTIME QUEUE WHEN SLEEP TIME EXCEEDS RUN TIME. STEALING LIVES IN
// balance.rs.
//
// LOCK HIERARCHY: CORE LOCKS (DONOR BEFORE THIEF) -> PROCESS TABLE.
// NO HANDLER BLOCKS OR SLEEPS; EVERY PATH IS SHORT AND BOUNDED.

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, Result};
use spin::Mutex;

use crate::board::StateBoard;
use crate::clock::Clock;
use crate::cpu::{Activity, Core, CoreActivityState};
use crate::log_warn;
use crate::mask::CoreSet;
use crate::params::Params;
use crate::process::{Pid, PrioClass, ProcMeta, ProcState, ProcTable};
use crate::rq::QueueKind;
use crate::topology::{Topology, TopologyLevel, DOMAIN_CACHE};

// PERIODIC-BALANCE COUNTDOWN AND PASS COUNT, SERIALIZED BY THE GLOBAL
// BALANCE LOCK (TAKEN NON-BLOCKINGLY; CONTENTION MEANS SKIP)
pub(crate) struct BalanceState {
    pub ticks: i64,
    pub nr: u64,
}

#[derive(Default)]
pub struct EngineStats {
    pub nr_dispatches: AtomicU64,
    pub nr_forks: AtomicU64,
    pub nr_exits: AtomicU64,
    pub nr_slice_expiries: AtomicU64,
    pub nr_yields: AtomicU64,
    pub nr_blocks: AtomicU64,
    pub nr_wakeups_interactive: AtomicU64,
    pub nr_wakeups_regular: AtomicU64,
    pub nr_migrations: AtomicU64,
    pub nr_steal_attempts: AtomicU64,
    pub nr_balance_passes: AtomicU64,
    pub nr_balance_skips: AtomicU64,
}

#[derive(Clone, Copy, Default, Debug)]
pub struct StatsSnapshot {
    pub nr_dispatches: u64,
    pub nr_forks: u64,
    pub nr_exits: u64,
    pub nr_slice_expiries: u64,
    pub nr_yields: u64,
    pub nr_blocks: u64,
    pub nr_wakeups_interactive: u64,
    pub nr_wakeups_regular: u64,
    pub nr_migrations: u64,
    pub nr_steal_attempts: u64,
    pub nr_balance_passes: u64,
    pub nr_balance_skips: u64,
}

impl EngineStats {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            nr_dispatches: self.nr_dispatches.load(Ordering::Relaxed),
            nr_forks: self.nr_forks.load(Ordering::Relaxed),
            nr_exits: self.nr_exits.load(Ordering::Relaxed),
            nr_slice_expiries: self.nr_slice_expiries.load(Ordering::Relaxed),
            nr_yields: self.nr_yields.load(Ordering::Relaxed),
            nr_blocks: self.nr_blocks.load(Ordering::Relaxed),
            nr_wakeups_interactive: self.nr_wakeups_interactive.load(Ordering::Relaxed),
            nr_wakeups_regular: self.nr_wakeups_regular.load(Ordering::Relaxed),
            nr_migrations: self.nr_migrations.load(Ordering::Relaxed),
            nr_steal_attempts: self.nr_steal_attempts.load(Ordering::Relaxed),
            nr_balance_passes: self.nr_balance_passes.load(Ordering::Relaxed),
            nr_balance_skips: self.nr_balance_skips.load(Ordering::Relaxed),
        }
    }
}

pub struct Engine {
    pub(crate) params: Params,
    pub(crate) clock: Clock,
    pub(crate) cores: Vec<Core>,
    pub(crate) board: StateBoard,
    pub(crate) procs: ProcTable,
    pub(crate) topo: Topology,
    pub(crate) activity: Activity,
    // THE POLICY'S ALLOWED-CORE SET (DISTINCT FROM PER-PROCESS MASKS)
    pub(crate) allowed: CoreSet,
    pub(crate) balance: Mutex<BalanceState>,
    pub stats: EngineStats,
}

impl Engine {
    pub fn new(
        nr_cores: usize,
        params: Params,
        chains: &[Vec<TopologyLevel>],
        clock: Clock,
    ) -> Result<Self> {
        if nr_cores == 0 {
            bail!("engine: zero cores");
        }
        let topo = Topology::build(nr_cores, chains)?;

        let cores: Vec<Core> = (0..nr_cores)
            .map(|id| Core::new(id, topo.leaf(id), id as u32 + 1))
            .collect();

        let activity = Activity::new();
        for id in 0..nr_cores {
            activity.set_active(id);
        }

        Ok(Self {
            params,
            clock,
            cores,
            board: StateBoard::new(nr_cores),
            procs: ProcTable::new(),
            topo,
            activity,
            allowed: CoreSet::all(nr_cores),
            balance: Mutex::new(BalanceState { ticks: 1, nr: 0 }),
            stats: EngineStats::default(),
        })
    }

    pub fn nr_cores(&self) -> usize {
        self.cores.len()
    }

    pub fn load(&self, core: usize) -> i64 {
        self.cores[core].load()
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn nr_procs(&self) -> usize {
        self.procs.len()
    }

    // DIAGNOSTIC READ OF THE RUNNING SLOT
    pub fn current_running(&self, core: usize) -> Option<Pid> {
        self.board.current_running(core)
    }

    // DIAGNOSTIC COPY OF ONE READY QUEUE, IN DISPATCH ORDER
    pub fn ready_pids(&self, core: usize, kind: QueueKind) -> Vec<Pid> {
        self.board.lock(core).queue_ref(kind).iter().copied().collect()
    }

    pub fn proc_snapshot(&self, pid: Pid) -> Option<ProcMeta> {
        self.procs.snapshot(pid)
    }

    // --- PROCESS LIFECYCLE ---

    // PHASE ONE OF CREATION: ALLOCATE METADATA, INHERIT THE CLASS (AND
    // CHARGE THE PARENT THE FORK PENALTY), PICK A TARGET CORE. THE UNIT
    // IS NOT YET ASSIGNED ANYWHERE; on_new_place COMMITS IT.
    pub fn on_new_prepare(
        &self,
        pid: Pid,
        parent: Option<Pid>,
        origin: usize,
        allowed: CoreSet,
    ) -> Result<usize> {
        if origin >= self.nr_cores() {
            bail!("new: origin core {} out of range", origin);
        }
        let parent = parent.filter(|&pp| self.procs.contains(pp));

        let mut meta = ProcMeta::new(origin, allowed, parent);
        if let Some(pp) = parent {
            let penalty = self.params.fork_penalty_ns();
            if let Some(prio) = self.procs.with(pp, |p| {
                p.rtime_ns += penalty;
                p.prio
            }) {
                meta.prio = prio;
            }
        }

        let target = self.pickup_core(origin, meta.prio, &meta.allowed);
        meta.last_core = target;

        if !self.procs.insert(pid, meta) {
            bail!("new: pid {} already tracked", pid);
        }
        EngineStats::bump(&self.stats.nr_forks);
        Ok(target)
    }

    // PHASE TWO: THE UNIT IS BOUND TO THE CHOSEN CORE -- TAKE THE LOAD
    // AND ENQUEUE READY INTO THE CLASS QUEUE
    pub fn on_new_place(&self, pid: Pid) -> Result<()> {
        let Some((core, prio)) = self.procs.with(pid, |p| (p.last_core, p.prio)) else {
            bail!("new place: unknown pid {}", pid);
        };
        let mut run = self.board.lock(core);
        self.cores[core].add_load(1);
        run.queue(class_queue(prio)).enqueue(pid);
        self.procs.with(pid, |p| p.state = ProcState::Ready);
        Ok(())
    }

    // MIRROR OF CREATION: DETACH, DROP THE LOAD, FREE THE METADATA
    pub fn on_terminate(&self, pid: Pid) -> Result<()> {
        let Some((core, state)) = self.procs.with(pid, |p| (p.last_core, p.state)) else {
            bail!("terminate: unknown pid {}", pid);
        };
        {
            let mut run = self.board.lock(core);
            run.detach(pid);
            // BLOCKED/MIGRATING PROCESSES ALREADY GAVE UP THEIR LOAD
            if matches!(state, ProcState::Ready | ProcState::Running) {
                self.cores[core].add_load(-1);
            }
            self.procs.with(pid, |p| p.state = ProcState::Terminated);
        }
        self.procs.remove(pid);
        EngineStats::bump(&self.stats.nr_exits);
        Ok(())
    }

    // TIMER TICK FOR THE RUNNING PROCESS: BURN ONE SLICE TICK; ON
    // EXPIRY, RECORD THE RUN SPAN AND FALL BACK TO TIMESHARE
    pub fn on_tick(&self, pid: Pid) -> Result<()> {
        let Some(expired) = self.procs.with(pid, |p| {
            p.slice -= 1;
            p.slice <= 0
        }) else {
            bail!("tick: unknown pid {}", pid);
        };
        if expired {
            self.record_rtime(pid);
            self.requeue_timeshare(pid);
            EngineStats::bump(&self.stats.nr_slice_expiries);
        }
        Ok(())
    }

    // VOLUNTARY YIELD: SAME BOOKKEEPING AS EXPIRY, ALWAYS TIMESHARE
    pub fn on_yield(&self, pid: Pid) -> Result<()> {
        if !self.procs.contains(pid) {
            bail!("yield: unknown pid {}", pid);
        }
        self.record_rtime(pid);
        self.requeue_timeshare(pid);
        EngineStats::bump(&self.stats.nr_yields);
        Ok(())
    }

    pub fn on_block(&self, pid: Pid) -> Result<()> {
        let now = self.clock.now_ns();
        let Some(core) = self.procs.with(pid, |p| p.last_core) else {
            bail!("block: unknown pid {}", pid);
        };
        {
            let mut run = self.board.lock(core);
            run.detach(pid);
            self.procs.with(pid, |p| {
                p.last_blocked_ns = now;
                p.state = ProcState::Blocked;
            });
            self.cores[core].add_load(-1);
        }
        EngineStats::bump(&self.stats.nr_blocks);
        Ok(())
    }

    // PHASE ONE OF WAKE-UP: MEASURE THE SLEEP SPAN AND PICK A CORE
    pub fn on_unblock_prepare(&self, pid: Pid) -> Result<usize> {
        let now = self.clock.now_ns();
        let Some((home, prio, allowed)) =
            self.procs.with(pid, |p| (p.last_core, p.prio, p.allowed.clone()))
        else {
            bail!("unblock: unknown pid {}", pid);
        };
        let target = self.pickup_core(home, prio, &allowed);
        self.procs.with(pid, |p| {
            p.slptime_ns = now.saturating_sub(p.last_blocked_ns);
            p.last_core = target;
        });
        Ok(target)
    }

    // PHASE TWO: TAKE THE LOAD AND ENQUEUE BY THE INTERACTIVITY TEST
    pub fn on_unblock_place(&self, pid: Pid) -> Result<()> {
        let Some((core, eligible)) = self.procs.with(pid, |p| {
            (p.last_core, update_interactivity(p))
        }) else {
            bail!("unblock place: unknown pid {}", pid);
        };
        {
            let mut run = self.board.lock(core);
            self.cores[core].add_load(1);
            let kind = if eligible {
                QueueKind::Realtime
            } else {
                QueueKind::Timeshare
            };
            run.queue(kind).enqueue(pid);
            self.procs.with(pid, |p| p.state = ProcState::Ready);
        }
        if eligible {
            EngineStats::bump(&self.stats.nr_wakeups_interactive);
        } else {
            EngineStats::bump(&self.stats.nr_wakeups_regular);
        }
        Ok(())
    }

    // HOST-DECLARED CLASS CHANGE (THE setscheduler PATH). TAKES EFFECT
    // AT THE NEXT ENQUEUE; AN ALREADY-QUEUED PROCESS IS NOT RESHUFFLED.
    pub fn set_class(&self, pid: Pid, prio: PrioClass) -> Result<()> {
        if self.procs.with(pid, |p| p.prio = prio).is_none() {
            bail!("set class: unknown pid {}", pid);
        }
        Ok(())
    }

    // HOST-DECLARED AFFINITY CHANGE. CONSULTED AT THE NEXT PLACEMENT OR
    // STEAL; THE PROCESS IS NOT EVICTED FROM A NOW-FORBIDDEN CORE.
    pub fn set_allowed(&self, pid: Pid, allowed: CoreSet) -> Result<()> {
        if allowed.is_empty() {
            bail!("set allowed: empty mask for pid {}", pid);
        }
        if self.procs.with(pid, |p| p.allowed = allowed).is_none() {
            bail!("set allowed: unknown pid {}", pid);
        }
        Ok(())
    }

    // --- SCHEDULING DECISION ---

    // PICK THE NEXT PROCESS FOR A CORE: REALTIME HEAD, ELSE TIMESHARE
    // HEAD, ELSE NOTHING. THE WINNER GETS A LOAD-SIZED SLICE AND THE
    // RUNNING SLOT (DISPLACING ANY PREVIOUS OCCUPANT POINTER).
    pub fn schedule(&self, core: usize) -> Option<Pid> {
        let now = self.clock.now_ns();
        let mut run = self.board.lock(core);

        let pid = run
            .first_ready(QueueKind::Realtime)
            .or_else(|| run.first_ready(QueueKind::Timeshare))?;

        run.detach(pid);
        let slice = self.slice_for(core);
        self.procs.with(pid, |p| {
            p.last_schedule_ns = now;
            p.last_core = core;
            p.slice = slice;
            p.state = ProcState::Running;
        });
        run.curr = Some(pid);

        EngineStats::bump(&self.stats.nr_dispatches);
        Some(pid)
    }

    // LOAD-SENSITIVE SLICE: BASE/DIVISOR ABOVE THE DIVISOR THRESHOLD,
    // BASE/LOAD OTHERWISE. ZERO LOAD CANNOT HAPPEN ON A DISPATCHING
    // CORE; WARN AND HAND OUT THE BASE SLICE.
    pub fn slice_for(&self, core: usize) -> i64 {
        let load = self.cores[core].load();
        let p = &self.params;
        if load > p.slice_min_divisor {
            return p.slice_ticks / p.slice_min_divisor;
        }
        if load == 0 {
            log_warn!("slice: core {} reports zero load", core);
            return p.slice_ticks;
        }
        p.slice_ticks / load
    }

    // --- CORE PLACEMENT ---

    // INTERRUPT WORK PINS TO ITS LAST CORE. EVERYONE ELSE WALKS THE
    // HOME CORE'S CACHE-DOMAIN CHAIN FOR THE CLOSEST IDLE CORE, THEN
    // FALLS BACK TO THE GLOBALLY LEAST-LOADED ALLOWED CORE.
    pub(crate) fn pickup_core(&self, home: usize, prio: PrioClass, allowed: &CoreSet) -> usize {
        if prio == PrioClass::Interrupt {
            return home;
        }

        for (_, d) in self.topo.chain(home) {
            if d.flags & DOMAIN_CACHE == 0 {
                continue;
            }
            for cpu in d.cores.iter() {
                if !self.allowed.test(cpu) || !allowed.test(cpu) {
                    continue;
                }
                if self.cores[cpu].load() == 0 {
                    return cpu;
                }
            }
        }

        let mut idlest = home;
        let mut min_load = i64::MAX;
        for cpu in self.allowed.iter() {
            if !allowed.test(cpu) {
                continue;
            }
            let load = self.cores[cpu].load();
            if load < min_load {
                min_load = load;
                idlest = cpu;
            }
        }
        idlest
    }

    // --- CORE ACTIVITY ---

    pub fn on_core_entry(&self, core: usize) {
        self.cores[core].set_balanced(false);
        self.activity.set_active(core);
    }

    pub fn on_core_exit(&self, core: usize) {
        self.activity.set_idle(core);
    }

    pub fn on_enter_idle(&self, core: usize) {
        self.activity.set_idle(core);
    }

    pub fn on_exit_idle(&self, core: usize) {
        self.activity.set_active(core);
    }

    pub fn core_state(&self, core: usize) -> CoreActivityState {
        self.activity.state(core)
    }

    // --- INTERNAL BOOKKEEPING ---

    fn record_rtime(&self, pid: Pid) {
        let now = self.clock.now_ns();
        self.procs.with(pid, |p| {
            p.rtime_ns = now.saturating_sub(p.last_schedule_ns);
        });
    }

    // BACK TO READY IN TIMESHARE ON THE PROCESS'S CURRENT CORE,
    // RELEASING THE RUNNING SLOT IF IT HELD IT
    fn requeue_timeshare(&self, pid: Pid) {
        let Some(core) = self.procs.with(pid, |p| p.last_core) else {
            return;
        };
        let mut run = self.board.lock(core);
        run.detach(pid);
        run.queue(QueueKind::Timeshare).enqueue(pid);
        self.procs.with(pid, |p| p.state = ProcState::Ready);
    }

    // --- INTROSPECTION ---

    // PER-CORE DUMP: RUNNING SLOT, BOTH QUEUES, LOAD, DOMAIN CHAIN
    pub fn dump_core(&self, core: usize) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let run = self.board.lock(core);
        let _ = writeln!(out, "CORE: {}", core);
        let _ = writeln!(
            out,
            "RUNNING: {}",
            run.curr.map_or_else(|| "-".to_string(), |p| p.to_string())
        );
        for (label, kind) in [
            ("realtime", QueueKind::Realtime),
            ("timeshare", QueueKind::Timeshare),
        ] {
            let q = run.queue_ref(kind);
            let pids: Vec<String> = q.iter().map(|p| p.to_string()).collect();
            let _ = writeln!(out, "READY[{}]: {} (nr_tasks = {})", label, pids.join(" -> "), q.len());
        }
        let _ = writeln!(out, "cload = {}", self.cores[core].load());
        drop(run);

        let _ = writeln!(out, "topology:");
        for (_, d) in self.topo.chain(core) {
            let groups: Vec<String> = d.groups.iter().map(|g| format!("{{{}}}", g.cores)).collect();
            let _ = writeln!(out, "[{}]: {}", d.cores, groups.join(""));
        }
        out
    }

    pub fn dump_topology(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        for level in 0..self.topo.nr_levels() {
            let _ = write!(out, "level {}: ", level);
            for &id in self.topo.level(level) {
                let _ = write!(out, "[{}]", self.topo.domain(id).cores);
            }
            let _ = writeln!(out);
        }
        out
    }

    pub fn balance_passes(&self) -> u64 {
        self.balance.lock().nr
    }

    // TEST-HARNESS INVARIANT CHECK: EVERY PROCESS IN EXACTLY ONE PLACE,
    // EVERY CORE'S LOAD EQUAL TO ITS ASSIGNED COUNT
    pub fn audit(&self) -> Result<()> {
        use std::collections::HashMap;

        let mut placement: HashMap<Pid, (usize, ProcState)> = HashMap::new();
        for core in 0..self.nr_cores() {
            let run = self.board.lock(core);
            let mut count = 0usize;
            if let Some(pid) = run.curr {
                if placement.insert(pid, (core, ProcState::Running)).is_some() {
                    bail!("audit: pid {} placed twice", pid);
                }
                count += 1;
            }
            for kind in [QueueKind::Realtime, QueueKind::Timeshare] {
                for &pid in run.queue_ref(kind).iter() {
                    if placement.insert(pid, (core, ProcState::Ready)).is_some() {
                        bail!("audit: pid {} placed twice", pid);
                    }
                    count += 1;
                }
            }
            let load = self.cores[core].load();
            if load != count as i64 {
                bail!("audit: core {} cload {} but {} assigned", core, load, count);
            }
        }

        for pid in self.procs.pids() {
            let Some(meta) = self.procs.snapshot(pid) else {
                continue;
            };
            match meta.state {
                ProcState::Ready | ProcState::Running => {
                    let Some(&(core, seen)) = placement.get(&pid) else {
                        bail!("audit: pid {} is {:?} but placed nowhere", pid, meta.state);
                    };
                    if seen != meta.state {
                        bail!(
                            "audit: pid {} state {:?} but recorded {:?} on core {}",
                            pid,
                            meta.state,
                            seen,
                            core
                        );
                    }
                }
                _ => {
                    if placement.contains_key(&pid) {
                        bail!("audit: pid {} is {:?} but still placed", pid, meta.state);
                    }
                }
            }
        }
        Ok(())
    }
}

fn class_queue(prio: PrioClass) -> QueueKind {
    if prio == PrioClass::Regular {
        QueueKind::Timeshare
    } else {
        QueueKind::Realtime
    }
}

// THE SLEEP/RUN HEURISTIC: MORE SLEEP THAN RUN EARNS INTERACTIVE;
// OTHERWISE DEMOTE TO REGULAR UNLESS THE CLASS IS INTERRUPT. RETURNS
// REALTIME ELIGIBILITY.
fn update_interactivity(p: &mut ProcMeta) -> bool {
    if p.slptime_ns > p.rtime_ns {
        p.prio = PrioClass::Interactive;
    } else if p.prio != PrioClass::Interrupt {
        p.prio = PrioClass::Regular;
    }
    p.realtime_eligible()
}
