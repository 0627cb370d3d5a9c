// kernel/src/process/scheduler.rs
//
// Short-term scheduling. Two policies, selectable from the wrapper's
// command line: plain round robin, and priority aging. Each preemption
// smooths the process priority with `new = (old + t_exec/Q) / 2`, so
// CPU hogs drift toward 1 (bad) and processes that block early drift
// toward 0 (good) without any hard reset that could starve someone.

use crate::metrics::Metrics;
use crate::process::{ProcessState, ProcessTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedPolicy {
    RoundRobin,
    PriorityAging,
}

impl SchedPolicy {
    /// Wrapper CLI convention: 1 = round robin, 2 = priority aging.
    pub fn from_arg(arg: i32) -> Option<Self> {
        match arg {
            1 => Some(Self::RoundRobin),
            2 => Some(Self::PriorityAging),
            _ => None,
        }
    }
}

pub struct Scheduler {
    policy: SchedPolicy,
    quantum: i32,
}

impl Scheduler {
    pub fn new(policy: SchedPolicy, quantum: i32) -> Self {
        Self { policy, quantum }
    }

    pub fn policy(&self) -> SchedPolicy {
        self.policy
    }

    /// Pick the next process to run. Returns the slot of the new RUNNING
    /// process, or `None` when nothing is ready (idle).
    pub fn pick(
        &self,
        table: &mut ProcessTable,
        current: Option<usize>,
        now: i64,
        metrics: &mut Metrics,
    ) -> Option<usize> {
        let prev_pid = current.and_then(|slot| table.get(slot)).map(|p| p.pid);

        if let Some(slot) = current {
            if let Some(proc) = table.get(slot) {
                if proc.state == ProcessState::Running && proc.quantum_left > 0 {
                    return Some(slot);
                }
            }
            self.retire(table, slot, now, metrics);
        }

        let next = match self.policy {
            SchedPolicy::PriorityAging => self.pick_by_priority(table),
            SchedPolicy::RoundRobin => self.pick_round_robin(table, prev_pid.map(|p| p.0)),
        };

        let slot = next?;
        table.set_state(slot, ProcessState::Running, now, metrics);
        if let Some(proc) = table.get_mut(slot) {
            proc.quantum_left = self.quantum;
            log::debug!("scheduler: {} runs (priority {:.3})", proc.pid, proc.priority);
            if let Some(prev) = prev_pid {
                if prev != proc.pid {
                    metrics.on_preemption(prev);
                }
            }
        }
        Some(slot)
    }

    /// The current process lost the CPU: re-age its priority from the time
    /// it actually executed, and requeue it if it is still runnable.
    fn retire(&self, table: &mut ProcessTable, slot: usize, now: i64, metrics: &mut Metrics) {
        let Some(proc) = table.get_mut(slot) else { return };
        match proc.state {
            ProcessState::Running | ProcessState::Blocked => {
                if self.policy == SchedPolicy::PriorityAging {
                    let t_exec = (self.quantum - proc.quantum_left).max(0);
                    proc.priority =
                        (proc.priority + t_exec as f32 / self.quantum as f32) / 2.0;
                    log::trace!("scheduler: {} re-aged to {:.3}", proc.pid, proc.priority);
                }
            }
            _ => return,
        }
        if proc.state == ProcessState::Running {
            table.set_state(slot, ProcessState::Ready, now, metrics);
        }
    }

    /// Smallest priority wins; ties go to the lowest pid.
    fn pick_by_priority(&self, table: &ProcessTable) -> Option<usize> {
        let mut best: Option<(f32, i32, usize)> = None;
        for slot in table.ordered_slots() {
            let Some(proc) = table.get(slot) else { continue };
            if proc.state != ProcessState::Ready {
                continue;
            }
            let better = match best {
                None => true,
                Some((priority, pid, _)) => (proc.priority, proc.pid.0) < (priority, pid),
            };
            if better {
                best = Some((proc.priority, proc.pid.0, slot));
            }
        }
        best.map(|(_, _, slot)| slot)
    }

    /// First ready pid after the previous one, wrapping around.
    fn pick_round_robin(&self, table: &ProcessTable, prev_pid: Option<i32>) -> Option<usize> {
        let ready: Vec<(i32, usize)> = table
            .ordered_slots()
            .into_iter()
            .filter_map(|slot| {
                table
                    .get(slot)
                    .filter(|p| p.state == ProcessState::Ready)
                    .map(|p| (p.pid.0, slot))
            })
            .collect();
        let prev = prev_pid.unwrap_or(0);
        ready
            .iter()
            .find(|&&(pid, _)| pid > prev)
            .or_else(|| ready.first())
            .map(|&(_, slot)| slot)
    }
}
