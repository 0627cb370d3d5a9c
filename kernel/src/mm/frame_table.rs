// kernel/src/mm/frame_table.rs
//
// Ownership map of the physical frames available to user pages. Each
// occupied frame knows its owner (pid, virtual page), its FIFO load
// sequence and an aging shift-register fed from the page-table accessed
// bit on clock ticks; victim selection runs one of three policies over
// that state.

use crate::process::Pid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplacementPolicy {
    Fifo,
    SecondChance,
    LruAging,
}

const AGING_MSB: u32 = 1 << 31;

#[derive(Debug, Clone, Copy)]
pub struct FrameEntry {
    pub used: bool,
    pub owner: Pid,
    pub vpage: usize,
    pub fifo_seq: u64,
    pub aging: u32,
    pub accessed: bool,
    pub dirty: bool,
}

impl FrameEntry {
    fn free() -> Self {
        Self {
            used: false,
            owner: Pid(0),
            vpage: 0,
            fifo_seq: 0,
            aging: 0,
            accessed: false,
            dirty: false,
        }
    }
}

pub struct FrameTable {
    /// First physical frame managed here; lower frames belong to firmware.
    base: usize,
    entries: Vec<FrameEntry>,
    next_seq: u64,
    policy: ReplacementPolicy,
}

impl FrameTable {
    /// Manage frames `first_user..total_frames` of physical memory.
    pub fn new(total_frames: usize, first_user: usize, policy: ReplacementPolicy) -> Self {
        let managed = total_frames.saturating_sub(first_user);
        Self {
            base: first_user,
            entries: vec![FrameEntry::free(); managed],
            next_seq: 1,
            policy,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find_free(&self) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| !e.used)
            .map(|i| i + self.base)
    }

    /// Record `frame` as holding `vpage` of `pid`, freshly loaded: clean,
    /// referenced, next in FIFO order.
    pub fn occupy(&mut self, frame: usize, pid: Pid, vpage: usize) {
        let seq = self.next_seq;
        self.next_seq += 1;
        if let Some(entry) = self.entry_mut(frame) {
            *entry = FrameEntry {
                used: true,
                owner: pid,
                vpage,
                fifo_seq: seq,
                aging: AGING_MSB,
                accessed: true,
                dirty: false,
            };
        }
    }

    pub fn release(&mut self, frame: usize) {
        if let Some(entry) = self.entry_mut(frame) {
            *entry = FrameEntry::free();
        }
    }

    /// Free every frame owned by `pid`; returns how many were released.
    pub fn release_process(&mut self, pid: Pid) -> usize {
        let mut released = 0;
        for entry in &mut self.entries {
            if entry.used && entry.owner == pid {
                *entry = FrameEntry::free();
                released += 1;
            }
        }
        released
    }

    pub fn entry(&self, frame: usize) -> Option<&FrameEntry> {
        frame
            .checked_sub(self.base)
            .and_then(|i| self.entries.get(i))
    }

    pub fn owner(&self, frame: usize) -> Option<(Pid, usize)> {
        self.entry(frame)
            .filter(|e| e.used)
            .map(|e| (e.owner, e.vpage))
    }

    /// Clock-tick aging: shift the register right and fold in the accessed
    /// bit observed in the owner's page table.
    pub fn age(&mut self, frame: usize, accessed: bool, dirty: bool) {
        if let Some(entry) = self.entry_mut(frame) {
            if !entry.used {
                return;
            }
            entry.aging >>= 1;
            if accessed {
                entry.aging |= AGING_MSB;
            }
            entry.accessed = accessed;
            entry.dirty = dirty;
        }
    }

    /// Pick the frame to evict under the configured policy. `None` only
    /// when no frame is occupied.
    pub fn choose_victim(&mut self) -> Option<usize> {
        match self.policy {
            ReplacementPolicy::Fifo => self.victim_fifo(),
            ReplacementPolicy::LruAging => self.victim_lru(),
            ReplacementPolicy::SecondChance => self.victim_second_chance(),
        }
    }

    pub fn occupied(&self) -> impl Iterator<Item = (usize, &FrameEntry)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.used)
            .map(|(i, e)| (i + self.base, e))
    }

    fn victim_fifo(&self) -> Option<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.used)
            .min_by_key(|(_, e)| e.fifo_seq)
            .map(|(i, _)| i + self.base)
    }

    fn victim_lru(&self) -> Option<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.used)
            .min_by_key(|(_, e)| (e.aging, e.fifo_seq))
            .map(|(i, _)| i + self.base)
    }

    /// FIFO order, but a referenced frame gets its bit cleared and moves to
    /// the back of the queue instead of being evicted.
    fn victim_second_chance(&mut self) -> Option<usize> {
        let occupied = self.entries.iter().filter(|e| e.used).count();
        for _ in 0..=occupied {
            let frame = self.victim_fifo()?;
            let seq = self.next_seq;
            let entry = self.entry_mut(frame)?;
            if entry.accessed {
                entry.accessed = false;
                entry.fifo_seq = seq;
                self.next_seq += 1;
            } else {
                return Some(frame);
            }
        }
        // every frame was referenced and has been cleared; retry is FIFO
        self.victim_fifo()
    }

    fn entry_mut(&mut self, frame: usize) -> Option<&mut FrameEntry> {
        frame
            .checked_sub(self.base)
            .and_then(|i| self.entries.get_mut(i))
    }
}
