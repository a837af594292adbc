// PROCESS METADATA AND THE POLICY-OWNED PROCESS TABLE
// ONE ProcMeta PER SCHEDULABLE UNIT: CREATED AT new_prepare, FREED AT
// terminate. THE TABLE LOCK IS A LEAF LOCK -- IT IS NEVER HELD WHILE
// ACQUIRING A CORE LOCK (CORE -> TABLE IS THE ONLY PERMITTED NESTING).

use std::collections::HashMap;

use spin::Mutex;

use crate::mask::CoreSet;

pub type Pid = u64;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ProcState {
    New,
    Ready,
    Running,
    Blocked,
    Migrating,
    Terminated,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PrioClass {
    // PINNED TO ITS LAST CORE, ALWAYS REALTIME-ELIGIBLE, NEVER DEMOTED
    Interrupt,
    // TIMESHARE QUEUE
    Regular,
    // REALTIME QUEUE, EARNED THROUGH THE SLEEP/RUN HEURISTIC
    Interactive,
}

#[derive(Clone, Debug)]
pub struct ProcMeta {
    pub state: ProcState,
    pub prio: PrioClass,
    pub last_core: usize,
    // REMAINING TICK BUDGET FOR THE CURRENT RUN
    pub slice: i64,
    // RECORDED BY ASSIGNMENT (NOW - MARK), NOT ACCUMULATED
    pub rtime_ns: u64,
    pub slptime_ns: u64,
    pub last_blocked_ns: u64,
    pub last_schedule_ns: u64,
    // NON-OWNING BACK-REFERENCE, CONSULTED ONCE AT FORK
    pub parent: Option<Pid>,
    pub allowed: CoreSet,
}

impl ProcMeta {
    pub fn new(origin: usize, allowed: CoreSet, parent: Option<Pid>) -> Self {
        Self {
            state: ProcState::New,
            prio: PrioClass::Regular,
            last_core: origin,
            slice: 0,
            rtime_ns: 0,
            slptime_ns: 0,
            last_blocked_ns: 0,
            last_schedule_ns: 0,
            parent,
            allowed,
        }
    }

    pub fn realtime_eligible(&self) -> bool {
        matches!(self.prio, PrioClass::Interactive | PrioClass::Interrupt)
    }
}

#[derive(Default)]
pub struct ProcTable {
    map: Mutex<HashMap<Pid, ProcMeta>>,
}

impl ProcTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, pid: Pid, meta: ProcMeta) -> bool {
        let mut map = self.map.lock();
        if map.contains_key(&pid) {
            return false;
        }
        map.insert(pid, meta);
        true
    }

    pub fn remove(&self, pid: Pid) -> Option<ProcMeta> {
        self.map.lock().remove(&pid)
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.map.lock().contains_key(&pid)
    }

    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }

    // SHORT CRITICAL SECTION OVER ONE ENTRY; None IF THE PID IS UNTRACKED
    pub fn with<R>(&self, pid: Pid, f: impl FnOnce(&mut ProcMeta) -> R) -> Option<R> {
        self.map.lock().get_mut(&pid).map(f)
    }

    pub fn snapshot(&self, pid: Pid) -> Option<ProcMeta> {
        self.map.lock().get(&pid).cloned()
    }

    pub fn pids(&self) -> Vec<Pid> {
        self.map.lock().keys().copied().collect()
    }
}
