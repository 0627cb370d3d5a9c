// kernel/src/metrics.rs
//
// Execution accounting. Fed exclusively by the centralized state-change
// operation and by the dispatcher, so the numbers cannot drift from the
// actual transitions: for a live process, accumulated per-state time plus
// the open interval always equals the time since creation.

use std::fmt::Write as _;

use crate::hw::IRQ_KINDS;
use crate::process::{Pid, ProcessState};

/// States with accounted time: Ready, Running, Blocked (dead time is not a
/// thing; death closes the books via the turnaround figure).
const TRACKED_STATES: usize = 3;

fn state_index(state: ProcessState) -> Option<usize> {
    match state {
        ProcessState::Ready => Some(0),
        ProcessState::Running => Some(1),
        ProcessState::Blocked => Some(2),
        ProcessState::Dead => None,
    }
}

const STATE_NAMES: [&str; TRACKED_STATES] = ["ready", "running", "blocked"];

#[derive(Debug, Clone)]
pub struct ProcStats {
    entries: [u32; TRACKED_STATES],
    time: [i64; TRACKED_STATES],
    state_since: i64,
    current: ProcessState,
    preemptions: u32,
    created_at: i64,
    turnaround: Option<i64>,
}

impl ProcStats {
    fn new(now: i64) -> Self {
        // a process is born READY: that first entry counts
        let mut entries = [0; TRACKED_STATES];
        entries[0] = 1;
        Self {
            entries,
            time: [0; TRACKED_STATES],
            state_since: now,
            current: ProcessState::Ready,
            preemptions: 0,
            created_at: now,
            turnaround: None,
        }
    }

    /// How many times the process entered `state`.
    pub fn entries(&self, state: ProcessState) -> u32 {
        state_index(state).map(|i| self.entries[i]).unwrap_or(0)
    }

    /// Closed time spent in `state` (not counting the open interval).
    pub fn time_in(&self, state: ProcessState) -> i64 {
        state_index(state).map(|i| self.time[i]).unwrap_or(0)
    }

    pub fn preemptions(&self) -> u32 {
        self.preemptions
    }

    /// Wall-clock from creation to death, once dead.
    pub fn turnaround(&self) -> Option<i64> {
        self.turnaround
    }

    /// Total accounted time as of `now`, including the open interval of a
    /// live process. For a live process this equals `now - created_at`.
    pub fn accounted_time(&self, now: i64) -> i64 {
        let open = if self.current == ProcessState::Dead {
            0
        } else {
            now - self.state_since
        };
        self.time.iter().sum::<i64>() + open
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    /// Mean time per blocked episode.
    pub fn mean_response(&self) -> i64 {
        let (episodes, time) = (self.entries[2], self.time[2]);
        if episodes == 0 {
            0
        } else {
            time / i64::from(episodes)
        }
    }
}

#[derive(Debug, Default)]
struct IdleTracker {
    idle: bool,
    since: i64,
    total: i64,
}

#[derive(Debug, Default)]
pub struct Metrics {
    created: u32,
    irqs: [u32; IRQ_KINDS],
    preemptions: u32,
    procs: Vec<(Pid, ProcStats)>,
    idle: IdleTracker,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_created(&mut self, pid: Pid, now: i64) {
        self.created += 1;
        self.procs.push((pid, ProcStats::new(now)));
    }

    pub fn on_transition(&mut self, pid: Pid, old: ProcessState, new: ProcessState, now: i64) {
        let Some(stats) = self.proc_mut(pid) else { return };
        if let Some(i) = state_index(old) {
            stats.time[i] += now - stats.state_since;
        }
        match state_index(new) {
            Some(i) => {
                stats.entries[i] += 1;
                stats.state_since = now;
            }
            None => stats.turnaround = Some(now - stats.created_at),
        }
        stats.current = new;
    }

    /// Undo `on_created` for a spawn that was rolled back before the
    /// process ever existed.
    pub fn forget(&mut self, pid: Pid) {
        let before = self.procs.len();
        self.procs.retain(|(p, _)| *p != pid);
        if self.procs.len() < before {
            self.created -= 1;
        }
    }

    pub fn on_preemption(&mut self, pid: Pid) {
        self.preemptions += 1;
        if let Some(stats) = self.proc_mut(pid) {
            stats.preemptions += 1;
        }
    }

    pub fn on_irq(&mut self, bucket: usize) {
        self.irqs[bucket.min(IRQ_KINDS - 1)] += 1;
    }

    /// Track whether the whole system is idle (everything blocked or dead)
    /// as of `now`; accumulates the idle interval on the way out.
    pub fn on_idle_check(&mut self, idle: bool, now: i64) {
        if idle == self.idle.idle {
            return;
        }
        if idle {
            self.idle.since = now;
        } else {
            self.idle.total += now - self.idle.since;
        }
        self.idle.idle = idle;
    }

    pub fn created(&self) -> u32 {
        self.created
    }

    pub fn preemptions(&self) -> u32 {
        self.preemptions
    }

    pub fn irq_count(&self, bucket: usize) -> u32 {
        self.irqs[bucket.min(IRQ_KINDS - 1)]
    }

    /// Idle time accumulated up to `now` (counting an open idle interval).
    pub fn idle_time(&self, now: i64) -> i64 {
        let open = if self.idle.idle { now - self.idle.since } else { 0 };
        self.idle.total + open
    }

    pub fn proc(&self, pid: Pid) -> Option<&ProcStats> {
        self.procs
            .iter()
            .find(|(p, _)| *p == pid)
            .map(|(_, s)| s)
    }

    fn proc_mut(&mut self, pid: Pid) -> Option<&mut ProcStats> {
        self.procs
            .iter_mut()
            .find(|(p, _)| *p == pid)
            .map(|(_, s)| s)
    }

    /// Human-readable end-of-run report.
    pub fn report(&self, now: i64) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "system metrics");
        let _ = writeln!(out, "  processes created: {}", self.created);
        let _ = writeln!(out, "  total time: {now}");
        let _ = writeln!(out, "  idle time: {}", self.idle_time(now));
        let _ = writeln!(
            out,
            "  interrupts: reset={} cpu-error={} syscall={} clock={} other={}",
            self.irqs[0],
            self.irqs[1],
            self.irqs[2],
            self.irqs[3],
            self.irqs[4..].iter().sum::<u32>(),
        );
        let _ = writeln!(out, "  preemptions: {}", self.preemptions);
        for (pid, stats) in &self.procs {
            let _ = writeln!(
                out,
                "  {pid}: turnaround={} preemptions={} response(mean)={}",
                stats
                    .turnaround
                    .map_or_else(|| "-".into(), |t| t.to_string()),
                stats.preemptions,
                stats.mean_response(),
            );
            for i in 0..TRACKED_STATES {
                let _ = writeln!(
                    out,
                    "    {}: entries={} time={}",
                    STATE_NAMES[i], stats.entries[i], stats.time[i],
                );
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_time_is_conserved() {
        let mut m = Metrics::new();
        let pid = Pid(1);
        m.on_created(pid, 0);
        m.on_transition(pid, ProcessState::Ready, ProcessState::Running, 10);
        m.on_transition(pid, ProcessState::Running, ProcessState::Blocked, 35);
        m.on_transition(pid, ProcessState::Blocked, ProcessState::Ready, 50);

        let stats = m.proc(pid).unwrap();
        assert_eq!(stats.time_in(ProcessState::Ready), 10);
        assert_eq!(stats.time_in(ProcessState::Running), 25);
        assert_eq!(stats.time_in(ProcessState::Blocked), 15);
        // open ready interval counts toward the conservation law
        assert_eq!(stats.accounted_time(60), 60);
    }

    #[test]
    fn turnaround_is_creation_to_death() {
        let mut m = Metrics::new();
        let pid = Pid(2);
        m.on_created(pid, 100);
        m.on_transition(pid, ProcessState::Ready, ProcessState::Running, 110);
        m.on_transition(pid, ProcessState::Running, ProcessState::Dead, 160);
        assert_eq!(m.proc(pid).unwrap().turnaround(), Some(60));
    }

    #[test]
    fn idle_interval_accumulates_on_exit() {
        let mut m = Metrics::new();
        m.on_idle_check(true, 100);
        assert_eq!(m.idle_time(130), 30);
        m.on_idle_check(true, 120); // still idle, no double count
        m.on_idle_check(false, 150);
        assert_eq!(m.idle_time(200), 50);
        m.on_idle_check(true, 300);
        m.on_idle_check(false, 310);
        assert_eq!(m.idle_time(400), 60);
    }

    #[test]
    fn mean_response_divides_blocked_time_by_entries() {
        let mut m = Metrics::new();
        let pid = Pid(3);
        m.on_created(pid, 0);
        m.on_transition(pid, ProcessState::Ready, ProcessState::Blocked, 10);
        m.on_transition(pid, ProcessState::Blocked, ProcessState::Ready, 30);
        m.on_transition(pid, ProcessState::Ready, ProcessState::Blocked, 40);
        m.on_transition(pid, ProcessState::Blocked, ProcessState::Ready, 50);
        assert_eq!(m.proc(pid).unwrap().mean_response(), 15);
    }
}
