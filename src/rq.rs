// FIFO RUN QUEUE
// TWO PER CORE: REALTIME (INTERRUPT + INTERACTIVE CLASSES) AND TIMESHARE
// (REGULAR). ARRIVAL ORDER IS THE DISPATCH ORDER; REALTIME OUTRANKS
// TIMESHARE AT EVERY SCHEDULING DECISION.

use std::collections::VecDeque;

use crate::process::Pid;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum QueueKind {
    Realtime,
    Timeshare,
}

#[derive(Default, Debug)]
pub struct RunQueue {
    q: VecDeque<Pid>,
}

impl RunQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, pid: Pid) {
        self.q.push_back(pid);
    }

    pub fn dequeue(&mut self) -> Option<Pid> {
        self.q.pop_front()
    }

    // PEEK WITHOUT REMOVING
    pub fn first(&self) -> Option<Pid> {
        self.q.front().copied()
    }

    pub fn remove(&mut self, pid: Pid) -> bool {
        if let Some(pos) = self.q.iter().position(|&p| p == pid) {
            self.q.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.q.iter().any(|&p| p == pid)
    }

    pub fn len(&self) -> usize {
        self.q.len()
    }

    pub fn is_empty(&self) -> bool {
        self.q.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pid> {
        self.q.iter()
    }
}
