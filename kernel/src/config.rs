// kernel/src/config.rs
//
// Every tunable the kernel reads lives here, threaded in by value at
// construction. The defaults are the classroom ones; tests shrink them.

use crate::mm::frame_table::ReplacementPolicy;
use crate::process::scheduler::SchedPolicy;

#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Instruction budget a process may run before preemption.
    pub quantum: i32,
    /// Instructions between clock interrupts.
    pub tick_interval: i32,
    /// Words per page (and per frame).
    pub page_size: usize,
    /// Process table capacity.
    pub max_processes: usize,
    /// Backing store capacity, in pages.
    pub swap_pages: usize,
    /// Simulated instructions to move one page to or from the disk.
    pub disk_page_cost: i64,
    /// Number of terminals on the I/O controller.
    pub terminals: usize,
    /// Upper bound on the program name accepted by spawn.
    pub name_max: usize,
    pub scheduler: SchedPolicy,
    pub replacement: ReplacementPolicy,
    /// Image executed by pid 1.
    pub init_program: String,
    /// Interrupt-handler stub loaded into physical memory at reset.
    pub trap_program: String,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            quantum: 50,
            tick_interval: 50,
            page_size: 10,
            max_processes: 8,
            swap_pages: 1000,
            disk_page_cost: 10,
            terminals: 4,
            name_max: 100,
            scheduler: SchedPolicy::PriorityAging,
            replacement: ReplacementPolicy::Fifo,
            init_program: "init.maq".into(),
            trap_program: "trata_int.maq".into(),
        }
    }
}
