// kernel/src/process/mod.rs

pub mod scheduler;

use std::fmt;

use crate::metrics::Metrics;
use crate::mm::page_table::PageTable;

/// Process identifier. Valid processes have pid >= 1; pid 0 stands for
/// "no process" in parent links and in the kill-self convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub i32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid {}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Ready,
    Running,
    Blocked,
    Dead,
}

/// Why a blocked process is blocked. The cause carries everything its
/// unblock predicate needs, so the pending-work drain never has to guess.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockCause {
    /// Waiting for the keyboard data register at `device` to become ready.
    DeviceRead { device: usize },
    /// Waiting for the screen data register at `device`; `byte` is the
    /// datum held back until the device accepts it.
    DeviceWrite { device: usize, byte: i32 },
    /// Waiting for every awaited child to die.
    ChildExit,
    /// Waiting out a swap transfer; ready once the clock reaches `until`.
    SwapIo { until: i64 },
}

/// Registers the CPU saves at the well-known addresses on every interrupt.
#[derive(Debug, Clone, Copy, Default)]
pub struct Registers {
    pub a: i32,
    pub x: i32,
    pub pc: i32,
    pub err: i32,
    pub complement: i32,
}

/// Process descriptor.
#[derive(Debug)]
pub struct Process {
    pub pid: Pid,
    pub ppid: Pid,
    /// Bus index of the first register of this process's terminal.
    pub terminal: usize,
    pub regs: Registers,
    pub state: ProcessState,
    /// Instructions left in the current quantum.
    pub quantum_left: i32,
    pub block: Option<BlockCause>,
    /// Children this process is waiting on.
    pub awaiting: Vec<Pid>,
    /// Aged priority in [0, 1]; lower runs first.
    pub priority: f32,
    pub page_table: PageTable,
    /// Size of the virtual address space, in pages.
    pub pages: usize,
    /// Demand-paging faults taken.
    pub faults: u32,
    /// Per-virtual-page aging shift registers for LRU approximation.
    pub page_aging: Vec<u32>,
    pub created_at: i64,
}

impl Process {
    fn new(pid: Pid, ppid: Pid, terminal: usize, quantum: i32, now: i64) -> Self {
        Self {
            pid,
            ppid,
            terminal,
            regs: Registers::default(),
            state: ProcessState::Ready,
            quantum_left: quantum,
            block: None,
            awaiting: Vec::new(),
            priority: 0.5,
            page_table: PageTable::new(),
            pages: 0,
            faults: 0,
            page_aging: Vec::new(),
            created_at: now,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.state != ProcessState::Dead
    }
}

/// Fixed-capacity descriptor table. Handlers refer to processes by slot
/// index; pids map to slots through a scan (the table is small by design).
/// Dead slots are reused by later spawns.
pub struct ProcessTable {
    slots: Vec<Option<Process>>,
    next_pid: i32,
}

impl ProcessTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            next_pid: 1,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Create a descriptor in a free (empty or dead) slot. Returns the
    /// slot, or `None` when the table is full of live processes.
    pub fn create(
        &mut self,
        ppid: Pid,
        terminals: usize,
        quantum: i32,
        now: i64,
        metrics: &mut Metrics,
    ) -> Option<usize> {
        let slot = self
            .slots
            .iter()
            .position(|s| s.as_ref().map_or(true, |p| !p.is_alive()))?;
        let pid = Pid(self.next_pid);
        self.next_pid += 1;
        let terminal = ((pid.0 - 1) as usize % terminals) * crate::hw::bus::TERM_SUBDEVS;
        self.slots[slot] = Some(Process::new(pid, ppid, terminal, quantum, now));
        metrics.on_created(pid, now);
        log::debug!("process table: created {pid} (parent {}) in slot {slot}", ppid.0);
        Some(slot)
    }

    pub fn get(&self, slot: usize) -> Option<&Process> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Discard a descriptor outright. Only for rolling back a spawn that
    /// could not be completed; a process that ever ran dies through the
    /// state machine instead.
    pub fn remove(&mut self, slot: usize) {
        if let Some(s) = self.slots.get_mut(slot) {
            *s = None;
        }
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut Process> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    /// Slot of the live process with this pid.
    pub fn find_live(&self, pid: Pid) -> Option<usize> {
        self.slots.iter().position(|s| {
            s.as_ref()
                .map_or(false, |p| p.pid == pid && p.is_alive())
        })
    }

    pub fn is_alive(&self, pid: Pid) -> bool {
        self.find_live(pid).is_some()
    }

    /// Slots of live processes in creation order (ascending pid).
    pub fn ordered_slots(&self) -> Vec<usize> {
        let mut live: Vec<(i32, usize)> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| {
                s.as_ref()
                    .filter(|p| p.is_alive())
                    .map(|p| (p.pid.0, i))
            })
            .collect();
        live.sort_unstable();
        live.into_iter().map(|(_, i)| i).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Process> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    /// True when no process could ever run again without outside help:
    /// every descriptor is dead (or was never created).
    pub fn all_dead(&self) -> bool {
        self.iter().all(|p| !p.is_alive())
    }

    /// Move the process in `slot` to `state` at instant `now`, keeping the
    /// metrics in step. This is the only place the state field changes.
    pub fn set_state(
        &mut self,
        slot: usize,
        state: ProcessState,
        now: i64,
        metrics: &mut Metrics,
    ) {
        let Some(proc) = self.get_mut(slot) else { return };
        if proc.state == state || proc.state == ProcessState::Dead {
            return;
        }
        log::debug!("{}: {:?} -> {:?} at {now}", proc.pid, proc.state, state);
        metrics.on_transition(proc.pid, proc.state, state, now);
        proc.state = state;
        if state != ProcessState::Blocked {
            proc.block = None;
        }
    }

    /// Block the process in `slot` for `cause`.
    pub fn block(&mut self, slot: usize, cause: BlockCause, now: i64, metrics: &mut Metrics) {
        self.set_state(slot, ProcessState::Blocked, now, metrics);
        if let Some(proc) = self.get_mut(slot) {
            proc.block = Some(cause);
        }
    }
}
