// CORE METADATA AND ACTIVITY TRACKING
// ONE Core PER PHYSICAL CORE, IN A Vec INDEXED BY CORE ID, SIZED ONCE AT
// STARTUP. cload AND balanced ARE ATOMICS: BALANCING SCANS THEM ACROSS
// CORES WITHOUT TAKING THE OWNING CORE'S LOCK, EXACTLY LIKE THE UNLOCKED
// LOAD READS THE STEAL HEURISTIC TOLERATES.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};

use spin::Mutex;

use crate::mask::CoreSet;
use crate::topology::DomainId;

pub struct Core {
    pub id: usize,
    // READY + RUNNING PROCESSES ASSIGNED TO THIS CORE
    cload: AtomicI64,
    // TRANSIENT PER-BALANCING-PASS MARKER
    balanced: AtomicBool,
    // PER-CORE PRNG WORD FOR BALANCE-INTERVAL JITTER
    rng: AtomicU32,
    // LEAF SCHEDULING DOMAIN; None ON A FLAT (UNICORE) TOPOLOGY
    pub domain: Option<DomainId>,
}

impl Core {
    pub fn new(id: usize, domain: Option<DomainId>, seed: u32) -> Self {
        Self {
            id,
            cload: AtomicI64::new(0),
            balanced: AtomicBool::new(false),
            rng: AtomicU32::new(seed),
            domain,
        }
    }

    pub fn load(&self) -> i64 {
        self.cload.load(Ordering::Relaxed)
    }

    pub fn add_load(&self, delta: i64) {
        self.cload.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn balanced(&self) -> bool {
        self.balanced.load(Ordering::Relaxed)
    }

    pub fn set_balanced(&self, v: bool) {
        self.balanced.store(v, Ordering::Relaxed);
    }

    // THE BSD SCHEDULER LCG: x = x * 69069 + 5, TOP HALF RETURNED.
    // JITTER ONLY -- NEVER A CORRECTNESS INPUT.
    pub fn sched_random(&self) -> u32 {
        let next = self
            .rng
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |x| {
                Some(x.wrapping_mul(69069).wrapping_add(5))
            })
            .unwrap_or(0)
            .wrapping_mul(69069)
            .wrapping_add(5);
        next >> 16
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CoreActivityState {
    Active,
    Idle,
}

#[derive(Default)]
struct ActivitySets {
    active: CoreSet,
    idle: CoreSet,
}

// PROCESS-WIDE ACTIVE/IDLE CORE SETS. A CORE IS ALWAYS IN EXACTLY ONE.
#[derive(Default)]
pub struct Activity {
    sets: Mutex<ActivitySets>,
}

impl Activity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_active(&self, core: usize) {
        let mut sets = self.sets.lock();
        sets.idle.clear(core);
        sets.active.set(core);
    }

    pub fn set_idle(&self, core: usize) {
        let mut sets = self.sets.lock();
        sets.active.clear(core);
        sets.idle.set(core);
    }

    pub fn state(&self, core: usize) -> CoreActivityState {
        if self.sets.lock().idle.test(core) {
            CoreActivityState::Idle
        } else {
            CoreActivityState::Active
        }
    }

    pub fn active_set(&self) -> CoreSet {
        self.sets.lock().active.clone()
    }

    pub fn idle_set(&self) -> CoreSet {
        self.sets.lock().idle.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_counter_round_trip() {
        let c = Core::new(0, None, 1);
        assert_eq!(c.load(), 0);
        c.add_load(3);
        c.add_load(-1);
        assert_eq!(c.load(), 2);
    }

    #[test]
    fn sched_random_matches_lcg() {
        let c = Core::new(0, None, 1);
        // FIRST STEP FROM SEED 1: 1 * 69069 + 5 = 69074
        assert_eq!(c.sched_random(), 69074 >> 16);
        // SECOND STEP ADVANCES THE WORD
        let second = c.sched_random();
        assert_eq!(second, 69074u32.wrapping_mul(69069).wrapping_add(5) >> 16);
    }

    #[test]
    fn activity_sets_are_exclusive() {
        let act = Activity::new();
        act.set_active(2);
        assert_eq!(act.state(2), CoreActivityState::Active);
        act.set_idle(2);
        assert_eq!(act.state(2), CoreActivityState::Idle);
        assert!(!act.active_set().test(2));
        assert!(act.idle_set().test(2));
        act.set_active(2);
        assert!(!act.idle_set().test(2));
    }
}
