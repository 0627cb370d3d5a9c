// kernel/src/lib.rs
//
// Teaching operating-system kernel for a simulated computer. The machine
// (CPU, memory, MMU, I/O controller, clock, program loader) is a separate
// collaborator; this crate owns everything from the interrupt entry point
// down: process table and state machine, priority-aging scheduler with
// quantum preemption, system calls, blocking terminal I/O, demand paging
// over a swap store with a simulated disk timeline, and the metrics that
// account for all of it.

pub mod config;
pub mod error;
pub mod hw;
pub mod metrics;
pub mod mm;
pub mod os;
pub mod process;

pub use config::KernelConfig;
pub use error::KernelError;
pub use os::{Os, HALT, RESUME};
