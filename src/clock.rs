// TIME SOURCE
// MONOTONIC FOR LIVE RUNS, MANUAL FOR THE SIMULATOR AND TESTS -- THE
// INTERACTIVITY HEURISTIC COMPARES SLEEP AND RUN SPANS, SO TESTS NEED
// FULL CONTROL OF "NOW".

use std::sync::atomic::{AtomicU64, Ordering};

pub enum Clock {
    Monotonic,
    Manual(AtomicU64),
}

impl Clock {
    pub fn manual() -> Self {
        Clock::Manual(AtomicU64::new(0))
    }

    pub fn now_ns(&self) -> u64 {
        match self {
            Clock::Monotonic => monotonic_ns(),
            Clock::Manual(t) => t.load(Ordering::Relaxed),
        }
    }

    // MANUAL MODE ONLY; A MONOTONIC CLOCK ADVANCES ITSELF
    pub fn advance_ns(&self, delta: u64) {
        if let Clock::Manual(t) = self {
            t.fetch_add(delta, Ordering::Relaxed);
        }
    }

    pub fn set_ns(&self, now: u64) {
        if let Clock::Manual(t) = self {
            t.store(now, Ordering::Relaxed);
        }
    }
}

fn monotonic_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    (ts.tv_sec as u64) * 1_000_000_000 + (ts.tv_nsec as u64)
}
