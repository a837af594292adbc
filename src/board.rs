// STATE BOARD -- THE STATE-TRANSITION LEDGER
// AUTHORITATIVE PER-CORE RUN STATE: THE "CURRENTLY RUNNING" SLOT AND THE
// TWO READY QUEUES, BEHIND ONE LOCK PER CORE. THE POLICY DECIDES; THIS
// RECORDS. LOCKS ARE SCOPED GUARDS: EVERY EXIT PATH RELEASES. CROSS-CORE
// OPERATIONS TAKE DONOR BEFORE THIEF AND NEVER HOLD BOTH GUARDS AT ONCE.

use spin::{Mutex, MutexGuard};

use crate::process::Pid;
use crate::rq::{QueueKind, RunQueue};

#[derive(Default)]
pub struct CoreRunState {
    pub curr: Option<Pid>,
    pub realtime: RunQueue,
    pub timeshare: RunQueue,
}

impl CoreRunState {
    pub fn queue(&mut self, kind: QueueKind) -> &mut RunQueue {
        match kind {
            QueueKind::Realtime => &mut self.realtime,
            QueueKind::Timeshare => &mut self.timeshare,
        }
    }

    pub fn queue_ref(&self, kind: QueueKind) -> &RunQueue {
        match kind {
            QueueKind::Realtime => &self.realtime,
            QueueKind::Timeshare => &self.timeshare,
        }
    }

    pub fn first_ready(&self, kind: QueueKind) -> Option<Pid> {
        self.queue_ref(kind).first()
    }

    // REMOVE A PROCESS FROM WHEREVER IT SITS ON THIS CORE: THE RUNNING
    // SLOT OR EITHER QUEUE. RETURNS true IF IT WAS PRESENT.
    pub fn detach(&mut self, pid: Pid) -> bool {
        if self.curr == Some(pid) {
            self.curr = None;
            return true;
        }
        self.realtime.remove(pid) || self.timeshare.remove(pid)
    }

    // READY + RUNNING PROCESSES RECORDED ON THIS CORE
    pub fn assigned(&self) -> usize {
        self.realtime.len() + self.timeshare.len() + usize::from(self.curr.is_some())
    }
}

pub struct StateBoard {
    cores: Vec<Mutex<CoreRunState>>,
}

impl StateBoard {
    pub fn new(nr_cores: usize) -> Self {
        Self {
            cores: (0..nr_cores).map(|_| Mutex::new(CoreRunState::default())).collect(),
        }
    }

    pub fn nr_cores(&self) -> usize {
        self.cores.len()
    }

    // THE CORE'S PROTECTING LOCK; DROPPED GUARD == UNLOCK ON EVERY PATH
    pub fn lock(&self, core: usize) -> MutexGuard<'_, CoreRunState> {
        self.cores[core].lock()
    }

    // DIAGNOSTIC READ; NOT USED BY DECISION LOGIC
    pub fn current_running(&self, core: usize) -> Option<Pid> {
        self.cores[core].lock().curr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detach_clears_running_slot_first() {
        let board = StateBoard::new(1);
        {
            let mut run = board.lock(0);
            run.curr = Some(1);
            run.realtime.enqueue(2);
            run.timeshare.enqueue(3);
        }
        {
            let mut run = board.lock(0);
            assert!(run.detach(1));
            assert_eq!(run.curr, None);
            assert!(run.detach(3));
            assert!(!run.detach(3));
            assert_eq!(run.assigned(), 1);
        }
        assert_eq!(board.current_running(0), None);
    }

    #[test]
    fn first_ready_peeks_without_removing() {
        let board = StateBoard::new(2);
        {
            let mut run = board.lock(1);
            run.queue(QueueKind::Timeshare).enqueue(9);
        }
        let run = board.lock(1);
        assert_eq!(run.first_ready(QueueKind::Timeshare), Some(9));
        assert_eq!(run.first_ready(QueueKind::Timeshare), Some(9));
        assert_eq!(run.first_ready(QueueKind::Realtime), None);
    }
}
