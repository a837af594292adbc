// BEDLAM -- MULTI-CORE SCHEDULING POLICY ENGINE
// PER-CORE FIFO RUN QUEUES, SLEEP/RUN INTERACTIVITY CLASSIFICATION,
// LOAD-SENSITIVE TIME SLICES, CACHE-AWARE PLACEMENT AND WORK STEALING
// OVER A SCHEDULING-DOMAIN HIERARCHY.
//
// THE ENGINE IS PASSIVE: A HOST RUNTIME (OR THE BUILT-IN SIMULATOR)
// DELIVERS PROCESS AND CORE EVENTS AND ASKS FOR SCHEDULING DECISIONS.

pub mod log;

pub mod balance;
pub mod board;
pub mod clock;
pub mod cpu;
pub mod engine;
pub mod event;
pub mod mask;
pub mod params;
pub mod process;
pub mod rq;
pub mod sim;
pub mod topology;
