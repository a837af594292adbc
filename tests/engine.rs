// BEDLAM POLICY SCENARIO TESTS
// END-TO-END EVENT SEQUENCES AGAINST THE PUBLIC ENGINE API, DRIVEN BY
// THE MANUAL CLOCK. EACH TEST REPLAYS ONE CANONICAL WORKLOAD SHAPE AND
// CHECKS THE RESULTING QUEUE STATE, CLASS, AND LOAD ACCOUNTING.

use bedlam::clock::Clock;
use bedlam::engine::Engine;
use bedlam::mask::CoreSet;
use bedlam::params::{Params, TICK_NS};
use bedlam::process::{PrioClass, ProcState};
use bedlam::rq::QueueKind;
use bedlam::topology::synthetic;

fn engine(nr_cores: usize) -> Engine {
    let chains = synthetic(nr_cores, &[2, 4]);
    Engine::new(nr_cores, Params::default(), &chains, Clock::manual()).unwrap()
}

fn advance_ticks(e: &Engine, n: u64) {
    e.clock().advance_ns(n * TICK_NS);
}

#[test]
fn single_core_lifecycle() {
    let e = engine(1);

    // FORK: LANDS READY IN TIMESHARE, LOAD 1
    let target = e.on_new_prepare(1, None, 0, CoreSet::all(1)).unwrap();
    assert_eq!(target, 0);
    e.on_new_place(1).unwrap();
    assert_eq!(e.load(0), 1);
    assert_eq!(e.ready_pids(0, QueueKind::Timeshare), vec![1]);
    assert_eq!(e.proc_snapshot(1).unwrap().state, ProcState::Ready);

    // DISPATCH: RUNNING SLOT TAKEN, FULL SLICE AT LOAD 1
    assert_eq!(e.schedule(0), Some(1));
    assert_eq!(e.current_running(0), Some(1));
    let p = e.proc_snapshot(1).unwrap();
    assert_eq!(p.state, ProcState::Running);
    assert_eq!(p.slice, 200);

    // BURN THE SLICE: EXPIRY RETURNS IT TO TIMESHARE
    for _ in 0..200 {
        advance_ticks(&e, 1);
        e.on_tick(1).unwrap();
    }
    assert_eq!(e.current_running(0), None);
    assert_eq!(e.ready_pids(0, QueueKind::Timeshare), vec![1]);
    let p = e.proc_snapshot(1).unwrap();
    assert_eq!(p.state, ProcState::Ready);
    assert_eq!(p.rtime_ns, 200 * TICK_NS);

    e.on_terminate(1).unwrap();
    assert_eq!(e.load(0), 0);
    assert_eq!(e.nr_procs(), 0);
    e.audit().unwrap();
}

#[test]
fn two_core_steal_moves_exactly_one() {
    let e = engine(2);

    // PILE FIVE PROCESSES ONTO CORE 0, THEN OPEN THEIR MASKS
    for pid in 1..=5 {
        e.on_new_prepare(pid, None, 0, CoreSet::single(0)).unwrap();
        e.on_new_place(pid).unwrap();
        e.set_allowed(pid, CoreSet::all(2)).unwrap();
    }
    assert_eq!(e.load(0), 5);
    assert_eq!(e.load(1), 0);

    // CORE 1 RUNS DRY AND STEALS ONE
    assert!(e.on_newly_idle(1));
    assert_eq!(e.load(0), 4);
    assert_eq!(e.load(1), 1);

    // THE MIGRATED PROCESS ENDED UP READY ON CORE 1
    let moved = e.ready_pids(1, QueueKind::Timeshare);
    assert_eq!(moved.len(), 1);
    assert_eq!(e.proc_snapshot(moved[0]).unwrap().state, ProcState::Ready);
    assert_eq!(e.proc_snapshot(moved[0]).unwrap().last_core, 1);
    e.audit().unwrap();
}

#[test]
fn interrupt_class_child_pins_to_origin() {
    let e = engine(4);

    // CORE 3 IS THE BUSIEST; AN IDLE SIBLING EXISTS
    for pid in 1..=3 {
        e.on_new_prepare(pid, None, 3, CoreSet::single(3)).unwrap();
        e.on_new_place(pid).unwrap();
    }
    e.set_class(1, PrioClass::Interrupt).unwrap();

    // CHILD OF AN INTERRUPT PARENT, FORKED ON CORE 3: INHERITS THE
    // CLASS AND STAYS ON 3 DESPITE THE LOAD
    let target = e.on_new_prepare(10, Some(1), 3, CoreSet::all(4)).unwrap();
    assert_eq!(target, 3);
    let child = e.proc_snapshot(10).unwrap();
    assert_eq!(child.prio, PrioClass::Interrupt);

    // AND IT QUEUES REALTIME
    e.on_new_place(10).unwrap();
    assert_eq!(e.ready_pids(3, QueueKind::Realtime), vec![10]);

    // A REGULAR CHILD FROM THE SAME CORE SPILLS TO AN IDLE ONE
    let spilled = e.on_new_prepare(11, None, 3, CoreSet::all(4)).unwrap();
    assert_ne!(spilled, 3);
    assert_eq!(e.load(spilled), 0);
    e.audit().unwrap();
}

#[test]
fn fork_penalty_charges_the_parent() {
    let e = engine(1);
    e.on_new_prepare(1, None, 0, CoreSet::all(1)).unwrap();
    e.on_new_place(1).unwrap();
    assert_eq!(e.proc_snapshot(1).unwrap().rtime_ns, 0);

    e.on_new_prepare(2, Some(1), 0, CoreSet::all(1)).unwrap();
    // 666 TICKS OF RUN TIME LAND ON THE PARENT, NOT THE CHILD
    assert_eq!(e.proc_snapshot(1).unwrap().rtime_ns, 666 * TICK_NS);
    assert_eq!(e.proc_snapshot(2).unwrap().rtime_ns, 0);
}

#[test]
fn sleepy_process_earns_realtime() {
    let e = engine(1);
    e.on_new_prepare(1, None, 0, CoreSet::all(1)).unwrap();
    e.on_new_place(1).unwrap();

    // RUN 2 TICKS, YIELD (RECORDS RTIME), THEN SLEEP 10
    e.schedule(0).unwrap();
    advance_ticks(&e, 2);
    e.on_yield(1).unwrap();
    e.schedule(0).unwrap();
    e.on_block(1).unwrap();
    advance_ticks(&e, 10);

    e.on_unblock_prepare(1).unwrap();
    e.on_unblock_place(1).unwrap();
    let p = e.proc_snapshot(1).unwrap();
    assert_eq!(p.prio, PrioClass::Interactive);
    assert_eq!(e.ready_pids(0, QueueKind::Realtime), vec![1]);
    assert!(p.slptime_ns > p.rtime_ns);
}

#[test]
fn busy_process_is_demoted_to_timeshare() {
    let e = engine(1);
    e.on_new_prepare(1, None, 0, CoreSet::all(1)).unwrap();
    e.on_new_place(1).unwrap();

    // RUN 10 TICKS, YIELD, SLEEP ONLY 2
    e.schedule(0).unwrap();
    advance_ticks(&e, 10);
    e.on_yield(1).unwrap();
    e.schedule(0).unwrap();
    e.on_block(1).unwrap();
    advance_ticks(&e, 2);

    e.on_unblock_prepare(1).unwrap();
    e.on_unblock_place(1).unwrap();
    let p = e.proc_snapshot(1).unwrap();
    assert_eq!(p.prio, PrioClass::Regular);
    assert_eq!(e.ready_pids(0, QueueKind::Timeshare), vec![1]);
}

#[test]
fn slice_shrinks_under_load() {
    let e = engine(1);
    for pid in 1..=4 {
        e.on_new_prepare(pid, None, 0, CoreSet::all(1)).unwrap();
        e.on_new_place(pid).unwrap();
    }
    // LOAD 4: QUARTER SLICE
    e.schedule(0).unwrap();
    let first = e.current_running(0).unwrap();
    assert_eq!(e.proc_snapshot(first).unwrap().slice, 50);

    // TEN MORE: CLAMPED AT BASE / 8
    for pid in 5..=14 {
        e.on_new_prepare(pid, None, 0, CoreSet::all(1)).unwrap();
        e.on_new_place(pid).unwrap();
    }
    e.on_yield(first).unwrap();
    let next = e.schedule(0).unwrap();
    assert_eq!(e.proc_snapshot(next).unwrap().slice, 25);
}

#[test]
fn first_balancing_call_runs_a_pass() {
    let e = engine(2);
    // COUNTDOWN IS SEEDED TO FIRE ON THE FIRST TICK
    assert_eq!(e.balance_passes(), 0);
    e.on_balancing(0);
    assert_eq!(e.balance_passes(), 1);

    // THE RESEEDED COUNTDOWN IS JITTERED BUT BOUNDED
    let before = e.balance_passes();
    e.on_balancing(0);
    assert_eq!(e.balance_passes(), before);
}

#[test]
fn balancing_spreads_a_pileup() {
    let e = engine(4);
    for pid in 1..=8 {
        e.on_new_prepare(pid, None, 0, CoreSet::single(0)).unwrap();
        e.on_new_place(pid).unwrap();
        e.set_allowed(pid, CoreSet::all(4)).unwrap();
    }
    e.on_balancing(0);
    assert!(e.load(0) < 8);
    let total: i64 = (0..4).map(|c| e.load(c)).sum();
    assert_eq!(total, 8);
    e.audit().unwrap();
}

#[test]
fn unblock_prefers_an_idle_core_near_home() {
    let e = engine(4);
    e.on_new_prepare(1, None, 0, CoreSet::all(4)).unwrap();
    e.on_new_place(1).unwrap();
    e.schedule(0).unwrap();
    e.on_block(1).unwrap();

    // HOME CORE 0 GETS BUSY WHILE PID 1 SLEEPS
    for pid in 2..=3 {
        e.on_new_prepare(pid, None, 0, CoreSet::single(0)).unwrap();
        e.on_new_place(pid).unwrap();
    }
    advance_ticks(&e, 5);
    let target = e.on_unblock_prepare(1).unwrap();
    e.on_unblock_place(1).unwrap();
    assert_ne!(target, 0);
    assert_eq!(e.proc_snapshot(1).unwrap().last_core, target);
    e.audit().unwrap();
}

#[test]
fn terminate_from_every_state() {
    let e = engine(2);
    // READY
    e.on_new_prepare(1, None, 0, CoreSet::all(2)).unwrap();
    e.on_new_place(1).unwrap();
    // RUNNING
    e.on_new_prepare(2, None, 1, CoreSet::single(1)).unwrap();
    e.on_new_place(2).unwrap();
    e.schedule(1).unwrap();
    // BLOCKED
    e.on_new_prepare(3, None, 0, CoreSet::single(0)).unwrap();
    e.on_new_place(3).unwrap();
    e.on_block(3).unwrap();

    for pid in [1, 2, 3] {
        e.on_terminate(pid).unwrap();
    }
    assert_eq!(e.nr_procs(), 0);
    assert_eq!(e.load(0) + e.load(1), 0);
    e.audit().unwrap();
}
