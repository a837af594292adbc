// BEDLAM EVENT LOG
// RECORDS STATS SNAPSHOTS DURING POLICY EXECUTION
// PRE-ALLOCATED RING BUFFER. NO HEAP ALLOCATION DURING MONITORING.
// WRAPS AROUND AT CAPACITY -- OLDEST ENTRIES OVERWRITTEN.

use crate::engine::StatsSnapshot;

const MAX_SNAPSHOTS: usize = 8192;

#[derive(Clone, Copy, Default)]
pub struct Snapshot {
    pub ts_ns:       u64,
    pub dispatches:  u64,
    pub migrations:  u64,
    pub steals:      u64,
    pub passes:      u64,
    pub wake_int:    u64,
    pub wake_reg:    u64,
}

pub struct EventLog {
    snapshots: Vec<Snapshot>,
    head:      usize,
    len:       usize,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            snapshots: vec![Snapshot::default(); MAX_SNAPSHOTS],
            head: 0,
            len: 0,
        }
    }

    // RECORD ONE STATS SNAPSHOT FROM THE ENGINE'S CUMULATIVE COUNTERS.
    // OVERWRITES OLDEST ENTRY WHEN FULL.
    pub fn snapshot(&mut self, ts_ns: u64, stats: &StatsSnapshot) {
        self.snapshots[self.head] = Snapshot {
            ts_ns,
            dispatches: stats.nr_dispatches,
            migrations: stats.nr_migrations,
            steals: stats.nr_steal_attempts,
            passes: stats.nr_balance_passes,
            wake_int: stats.nr_wakeups_interactive,
            wake_reg: stats.nr_wakeups_regular,
        };
        self.head = (self.head + 1) % MAX_SNAPSHOTS;
        if self.len < MAX_SNAPSHOTS {
            self.len += 1;
        }
    }

    // ITERATE SNAPSHOTS IN CHRONOLOGICAL ORDER
    fn iter_chronological(&self) -> impl Iterator<Item = &Snapshot> {
        let start = if self.len < MAX_SNAPSHOTS { 0 } else { self.head };
        (0..self.len).map(move |i| {
            &self.snapshots[(start + i) % MAX_SNAPSHOTS]
        })
    }

    // DUMP THE TIME SERIES AFTER EXECUTION
    pub fn dump(&self) {
        if self.len == 0 {
            return;
        }

        let mut iter = self.iter_chronological();
        let first = iter.next().unwrap();
        let base_ts = first.ts_ns;

        println!("\n{:<10} {:<12} {:<10} {:<10} {:<10} {:<10} {:<10}",
            "TIME_S", "DISPATCHES", "MIGRATED", "STEALS", "PASSES", "WAKE_INT", "WAKE_REG");
        println!("{}", "-".repeat(76));

        // PRINT FIRST ENTRY
        println!("{:<10.1} {:<12} {:<10} {:<10} {:<10} {:<10} {:<10}",
            0.0, first.dispatches, first.migrations, first.steals,
            first.passes, first.wake_int, first.wake_reg);

        for s in iter {
            let elapsed_s = (s.ts_ns - base_ts) as f64 / 1_000_000_000.0;
            println!("{:<10.1} {:<12} {:<10} {:<10} {:<10} {:<10} {:<10}",
                elapsed_s, s.dispatches, s.migrations, s.steals,
                s.passes, s.wake_int, s.wake_reg);
        }

        if self.len == MAX_SNAPSHOTS {
            println!("\n(RING BUFFER WRAPPED -- SHOWING MOST RECENT {} SNAPSHOTS)", MAX_SNAPSHOTS);
        }
        println!("TOTAL SNAPSHOTS: {}", self.len);
    }

    // SUMMARY STATISTICS. COUNTERS ARE CUMULATIVE, SO THE LAST SNAPSHOT
    // CARRIES THE TOTALS AND DELTAS GIVE THE RATES.
    pub fn summary(&self) {
        if self.len < 2 {
            return;
        }

        let snapshots: Vec<&Snapshot> = self.iter_chronological().collect();
        let first = snapshots.first().unwrap();
        let last = snapshots.last().unwrap();

        let total_d = last.dispatches - first.dispatches;
        let total_mig = last.migrations - first.migrations;
        let total_steal = last.steals - first.steals;
        let total_pass = last.passes - first.passes;
        let total_int = last.wake_int - first.wake_int;
        let total_reg = last.wake_reg - first.wake_reg;

        let mut peak_d = 0u64;
        for w in snapshots.windows(2) {
            peak_d = peak_d.max(w[1].dispatches - w[0].dispatches);
        }

        let elapsed_ns = last.ts_ns - first.ts_ns;
        let elapsed_s = elapsed_ns as f64 / 1_000_000_000.0;

        println!("\n{}", "=".repeat(50));
        println!("BEDLAM SUMMARY");
        println!("{}", "=".repeat(50));
        println!("  TOTAL DISPATCHES:  {}", total_d);
        println!("  TOTAL MIGRATIONS:  {}", total_mig);
        println!("  STEAL ATTEMPTS:    {}", total_steal);
        println!("  BALANCE PASSES:    {}", total_pass);
        if elapsed_s > 0.0 {
            println!("  AVG DISPATCH/S:    {:.0}", total_d as f64 / elapsed_s);
            println!("  PEAK PER SAMPLE:   {}", peak_d);
        }
        let total_wake = total_int + total_reg;
        if total_wake > 0 {
            let int_pct = total_int as f64 / total_wake as f64 * 100.0;
            println!("  WAKE-UP CLASSES:   INTERACTIVE {:.1}% / REGULAR {:.1}%",
                int_pct, 100.0 - int_pct);
        }
        println!("  ELAPSED:           {:.1}s", elapsed_s);
        println!("  SAMPLES:           {}", self.len);
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}
