// LOAD BALANCING AND WORK STEALING
// PERIODIC BALANCING RUNS BEHIND A GLOBAL TRY-LOCK: THE TICKING CORE
// THAT WINS DRAINS A JITTERED COUNTDOWN, THEN REPEATEDLY PAIRS THE
// LEAST-LOADED UNBALANCED CORE WITH THE MOST-LOADED ELIGIBLE DONOR AND
// MOVES EXACTLY ONE PROCESS. NEWLY-IDLE STEALING (engine.rs CALLS IN
// HERE) REUSES THE SAME SINGLE-MIGRATION PRIMITIVE SCOPED TO A DOMAIN.
//
// MIGRATION LOCKS DONOR THEN THIEF AND RELEASES THE DONOR BEFORE THE
// THIEF IS TAKEN; THE WINDOW IN BETWEEN IS THE Migrating STATE.

use crate::engine::{Engine, EngineStats};
use crate::mask::CoreSet;
use crate::process::{Pid, ProcState};
use crate::rq::QueueKind;
use crate::topology::DOMAIN_CACHE;

impl Engine {
    // TIMER-DRIVEN ENTRY POINT, CALLED FROM EVERY CORE'S TICK PATH.
    // ONLY ONE CORE AT A TIME RUNS A PASS; LOSERS SKIP RATHER THAN WAIT.
    pub fn on_balancing(&self, core: usize) {
        let Some(mut bal) = self.balance.try_lock() else {
            EngineStats::bump(&self.stats.nr_balance_skips);
            return;
        };

        bal.ticks -= 1;
        if bal.ticks != 0 {
            return;
        }
        let interval = i64::from(self.params.balance_interval);
        let jitter = i64::from(self.cores[core].sched_random()) % interval;
        bal.ticks = (interval / 2).max(1) + jitter;
        bal.nr += 1;

        for c in &self.cores {
            c.set_balanced(false);
        }
        EngineStats::bump(&self.stats.nr_balance_passes);

        // EACH ROUND RESCANS FROM SCRATCH: PICK THE LEAST-LOADED CORE
        // NOT YET BALANCED THIS PASS AND TRY TO FILL IT. A ROUND WITH
        // NO CANDIDATE ENDS THE PASS.
        loop {
            let mut thief: Option<usize> = None;
            let mut min_load = i64::MAX;
            for cpu in self.allowed.iter() {
                if self.cores[cpu].balanced() {
                    continue;
                }
                let load = self.cores[cpu].load();
                if load < min_load {
                    min_load = load;
                    thief = Some(cpu);
                }
            }
            let Some(thief) = thief else {
                break;
            };
            self.steal_for_scope(thief, None);
        }
    }

    // A CORE THAT RAN OUT OF WORK WALKS ITS CACHE-DOMAIN CHAIN OUTWARD,
    // TRYING TO STEAL WITHIN EACH DOMAIN BEFORE WIDENING. STOPS AS SOON
    // AS THE CORE HAS LOAD AGAIN.
    pub fn on_newly_idle(&self, core: usize) -> bool {
        for (_, d) in self.topo.chain(core) {
            if d.flags & DOMAIN_CACHE == 0 {
                continue;
            }
            self.steal_for_scope(core, Some(&d.cores));
            if self.cores[core].load() > 0 {
                return true;
            }
        }
        false
    }

    // ONE STEAL ATTEMPT FOR A THIEF: PICK THE MOST-LOADED ELIGIBLE
    // DONOR (STRICTLY MORE LOADED THAN THE THIEF) WITHIN THE OPTIONAL
    // SCOPE AND MOVE ONE PROCESS. THE THIEF IS ALWAYS MARKED BALANCED
    // AFTERWARD -- THAT IS WHAT DRIVES THE PERIODIC PASS TO COMPLETION.
    // A SELECTED DONOR IS MARKED TOO, EVEN IF NOTHING WAS MOVABLE.
    pub(crate) fn steal_for_scope(&self, thief: usize, scope: Option<&CoreSet>) {
        EngineStats::bump(&self.stats.nr_steal_attempts);

        let mut victim: Option<usize> = None;
        let mut max_load = self.cores[thief].load();
        for donor in self.activity.active_set().iter() {
            if !self.allowed.test(donor) {
                continue;
            }
            if let Some(scope) = scope {
                if !scope.test(donor) {
                    continue;
                }
            }
            if !self.can_steal(donor, thief) {
                continue;
            }
            let load = self.cores[donor].load();
            if load > max_load {
                max_load = load;
                victim = Some(donor);
            }
        }

        if let Some(victim) = victim {
            self.migrate_from_to(victim, thief);
            self.cores[victim].set_balanced(true);
        }
        self.cores[thief].set_balanced(true);
    }

    // A PAIR IS ELIGIBLE WHEN NEITHER SIDE WAS BALANCED THIS PASS AND
    // THE DONOR IS STRICTLY MORE LOADED. LOADS ARE READ UNLOCKED; A
    // STALE READ COSTS A WASTED ATTEMPT, NOT CORRECTNESS.
    fn can_steal(&self, donor: usize, thief: usize) -> bool {
        if donor == thief {
            return false;
        }
        if self.cores[donor].balanced() || self.cores[thief].balanced() {
            return false;
        }
        self.cores[donor].load() > self.cores[thief].load()
    }

    // MOVE AT MOST ONE READY PROCESS FROM DONOR TO THIEF. THE RUNNING
    // PROCESS NEVER MOVES; NEITHER DOES ONE WHOSE ALLOWED MASK EXCLUDES
    // THE THIEF. REALTIME IS SCANNED BEFORE TIMESHARE.
    pub(crate) fn migrate_from_to(&self, donor: usize, thief: usize) -> bool {
        let picked: Option<Pid> = {
            let mut run = self.board.lock(donor);
            let mut found = None;
            'scan: for kind in [QueueKind::Realtime, QueueKind::Timeshare] {
                for &pid in run.queue_ref(kind).iter() {
                    let movable = self
                        .procs
                        .with(pid, |p| p.allowed.test(thief))
                        .unwrap_or(false);
                    if movable {
                        found = Some((pid, kind));
                        break 'scan;
                    }
                }
            }
            let Some((pid, kind)) = found else {
                return false;
            };
            run.queue(kind).remove(pid);
            self.procs.with(pid, |p| {
                p.state = ProcState::Migrating;
                p.last_core = thief;
            });
            self.cores[donor].add_load(-1);
            Some(pid)
            // DONOR GUARD DROPS HERE, BEFORE THE THIEF LOCK
        };

        if let Some(pid) = picked {
            let mut run = self.board.lock(thief);
            let kind = self
                .procs
                .with(pid, |p| {
                    if p.realtime_eligible() {
                        QueueKind::Realtime
                    } else {
                        QueueKind::Timeshare
                    }
                })
                .unwrap_or(QueueKind::Timeshare);
            run.queue(kind).enqueue(pid);
            self.procs.with(pid, |p| p.state = ProcState::Ready);
            self.cores[thief].add_load(1);
            EngineStats::bump(&self.stats.nr_migrations);
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use crate::clock::Clock;
    use crate::engine::Engine;
    use crate::mask::CoreSet;
    use crate::params::Params;
    use crate::process::PrioClass;
    use crate::topology::synthetic;

    fn engine(nr_cores: usize) -> Engine {
        let chains = synthetic(nr_cores, &[2, 4]);
        Engine::new(nr_cores, Params::default(), &chains, Clock::manual()).unwrap()
    }

    // LOAD CORE 0 WITH READY PROCESSES BY PINNING THEM THERE
    fn load_core(e: &Engine, core: usize, pids: &[u64]) {
        let mask = CoreSet::single(core);
        for &pid in pids {
            e.on_new_prepare(pid, None, core, mask.clone()).unwrap();
            e.on_new_place(pid).unwrap();
        }
    }

    #[test]
    fn newly_idle_steals_one_from_loaded_sibling() {
        let e = engine(2);
        for pid in 1..=5 {
            e.on_new_prepare(pid, None, 0, CoreSet::single(0)).unwrap();
            // WIDEN THE MASK AFTER PLACEMENT SO THE STEAL IS PERMITTED
            e.on_new_place(pid).unwrap();
            e.procs.with(pid, |p| p.allowed = CoreSet::all(2));
        }
        assert_eq!(e.load(0), 5);
        assert_eq!(e.load(1), 0);

        assert!(e.on_newly_idle(1));
        assert_eq!(e.load(0), 4);
        assert_eq!(e.load(1), 1);
        e.audit().unwrap();
    }

    #[test]
    fn newly_idle_comes_back_empty_when_everything_is_pinned() {
        let e = engine(2);
        load_core(&e, 0, &[1, 2]);
        // BOTH PINNED TO CORE 0: THE IDLE CORE WALKS ITS WHOLE CHAIN
        // AND STILL COMES BACK EMPTY-HANDED
        assert!(!e.on_newly_idle(1));
        assert_eq!(e.load(0), 2);
        assert_eq!(e.load(1), 0);
        e.audit().unwrap();
    }

    #[test]
    fn steal_skips_running_process() {
        let e = engine(2);
        e.on_new_prepare(1, None, 0, CoreSet::all(2)).unwrap();
        e.procs.with(1, |p| p.last_core = 0);
        e.on_new_place(1).unwrap();
        assert_eq!(e.schedule(0), Some(1));
        // THE ONLY CANDIDATE IS RUNNING: NOTHING MOVES EVEN THOUGH THE
        // DONOR LOOKS HEAVIER
        e.steal_for_scope(1, None);
        assert_eq!(e.load(0), 1);
        assert_eq!(e.load(1), 0);
        assert_eq!(e.current_running(0), Some(1));
    }

    #[test]
    fn steal_respects_allowed_mask() {
        let e = engine(2);
        load_core(&e, 0, &[1, 2, 3]);
        // ALL PINNED TO CORE 0: CORE 1 MAY NOT TAKE ANY
        e.steal_for_scope(1, None);
        assert_eq!(e.load(0), 3);
        assert_eq!(e.load(1), 0);
        // BOTH SIDES STILL CONSUMED THEIR PASS ELIGIBILITY
        assert!(e.cores[0].balanced());
        assert!(e.cores[1].balanced());
    }

    #[test]
    fn migrated_realtime_process_lands_in_realtime() {
        let e = engine(2);
        e.on_new_prepare(1, None, 0, CoreSet::single(0)).unwrap();
        e.procs.with(1, |p| p.prio = PrioClass::Interactive);
        e.on_new_place(1).unwrap();
        e.on_new_prepare(2, None, 0, CoreSet::single(0)).unwrap();
        e.on_new_place(2).unwrap();
        e.procs.with(1, |p| p.allowed = CoreSet::all(2));
        e.procs.with(2, |p| p.allowed = CoreSet::all(2));

        assert!(e.migrate_from_to(0, 1));
        // REALTIME SCANNED FIRST: PID 1 MOVED AND KEPT ITS QUEUE CLASS
        let run = e.board.lock(1);
        assert!(run.queue_ref(crate::rq::QueueKind::Realtime).contains(1));
    }

    #[test]
    fn balancing_pass_reseeds_countdown_and_clears_flags() {
        let e = engine(4);
        load_core(&e, 0, &[1, 2, 3, 4]);
        e.cores[2].set_balanced(true);

        // DRAIN THE COUNTDOWN (SEEDED TO 1) IN ONE CALL
        e.on_balancing(0);
        let bal = e.balance.lock();
        assert_eq!(bal.nr, 1);
        let interval = i64::from(e.params().balance_interval);
        assert!(bal.ticks >= interval / 2 && bal.ticks < interval / 2 + interval);
        drop(bal);
        assert_eq!(e.stats.nr_balance_passes.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[test]
    fn contended_balance_lock_skips() {
        let e = engine(2);
        let guard = e.balance.try_lock().unwrap();
        e.on_balancing(0);
        drop(guard);
        assert_eq!(e.stats.nr_balance_skips.load(std::sync::atomic::Ordering::Relaxed), 1);
        assert_eq!(e.stats.nr_balance_passes.load(std::sync::atomic::Ordering::Relaxed), 0);

        // A SKIP DOES NOT BURN THE COUNTDOWN: THE NEXT UNCONTENDED CALL
        // FIRES THE PASS
        e.on_balancing(0);
        assert_eq!(e.stats.nr_balance_passes.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[test]
    fn balancing_moves_work_toward_idle_cores() {
        let e = engine(4);
        for pid in 1..=8 {
            e.on_new_prepare(pid, None, 0, CoreSet::single(0)).unwrap();
            e.on_new_place(pid).unwrap();
            e.procs.with(pid, |p| p.allowed = CoreSet::all(4));
        }
        assert_eq!(e.load(0), 8);

        e.on_balancing(0);
        // AT LEAST ONE PROCESS LEFT THE OVERLOADED CORE
        assert!(e.load(0) < 8);
        let total: i64 = (0..4).map(|c| e.load(c)).sum();
        assert_eq!(total, 8);
        // THE PASS ENDS ONLY WHEN EVERY CORE HAS BEEN BALANCED ONCE
        for c in 0..4 {
            assert!(e.cores[c].balanced());
        }
        e.audit().unwrap();
    }
}
