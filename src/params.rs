// BEDLAM TUNING KNOBS
// PURE-RUST MODULE, SHARED BETWEEN THE ENGINE AND THE CLI DRIVER.
// DEFAULTS ARE THE CLASSIC ULE VALUES: 200-TICK BASE SLICE, DIVISOR 8,
// 666-TICK FORK PENALTY, 128-TICK BALANCE INTERVAL.

// ONE SCHEDULER TICK IN NANOSECONDS (1MS -- HZ=1000)
pub const TICK_NS: u64 = 1_000_000;

pub const SCHED_SLICE: i64 = 200;
pub const SCHED_SLICE_MIN_DIVISOR: i64 = 8;
pub const PENALTY_FORK_TICKS: u64 = 666;
pub const BALANCE_INTERVAL: u32 = 128;

#[derive(Clone, Copy, Debug)]
pub struct Params {
    // BASE TIME SLICE IN TICKS; DIVIDED BY CORE LOAD AT DISPATCH
    pub slice_ticks: i64,
    // LOAD ABOVE THIS DIVISOR CLAMPS THE SLICE TO slice_ticks / DIVISOR
    pub slice_min_divisor: i64,
    // RUNTIME CHARGED TO THE PARENT AT FORK, IN TICKS
    pub fork_penalty_ticks: u64,
    // NOMINAL PERIODIC-BALANCE INTERVAL, IN BALANCE INVOCATIONS
    pub balance_interval: u32,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            slice_ticks: SCHED_SLICE,
            slice_min_divisor: SCHED_SLICE_MIN_DIVISOR,
            fork_penalty_ticks: PENALTY_FORK_TICKS,
            balance_interval: BALANCE_INTERVAL,
        }
    }
}

impl Params {
    pub fn fork_penalty_ns(&self) -> u64 {
        self.fork_penalty_ticks * TICK_NS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_ule_constants() {
        let p = Params::default();
        assert_eq!(p.slice_ticks, 200);
        assert_eq!(p.slice_min_divisor, 8);
        assert_eq!(p.fork_penalty_ticks, 666);
        assert_eq!(p.balance_interval, 128);
        assert_eq!(p.fork_penalty_ns(), 666 * TICK_NS);
    }
}
