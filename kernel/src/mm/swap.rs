// kernel/src/mm/swap.rs
//
// Backing store for demand paging: a page-indexed array of words, carved
// into per-process extents that never move, plus the timeline of the
// single simulated disk. Every page transfer costs a fixed number of
// instructions and transfers serialize: a new one starts only when the
// previous one is done.

use thiserror::Error;

use crate::process::Pid;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("swap page {page} out of range ({pages} pages)")]
pub struct SwapError {
    pub page: usize,
    pub pages: usize,
}

/// Contiguous run of swap pages owned by one process for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapExtent {
    pub pid: Pid,
    pub first_page: usize,
    pub pages: usize,
}

pub struct SwapStore {
    words: Vec<i32>,
    page_size: usize,
    pages: usize,
    extents: Vec<SwapExtent>,
    busy_until: i64,
    page_cost: i64,
}

impl SwapStore {
    pub fn new(pages: usize, page_size: usize, page_cost: i64) -> Self {
        Self {
            words: vec![0; pages * page_size],
            page_size,
            pages,
            extents: Vec::new(),
            busy_until: 0,
            page_cost,
        }
    }

    pub fn pages(&self) -> usize {
        self.pages
    }

    /// Reserve `pages` contiguous swap pages for `pid`. First fit over the
    /// gaps left by dead processes; extents are never relocated.
    pub fn allocate(&mut self, pid: Pid, pages: usize) -> Option<usize> {
        if pages == 0 || pages > self.pages {
            return None;
        }
        self.extents.sort_by_key(|e| e.first_page);
        let mut candidate = 0;
        for extent in &self.extents {
            if candidate + pages <= extent.first_page {
                break;
            }
            candidate = extent.first_page + extent.pages;
        }
        if candidate + pages > self.pages {
            log::warn!("swap: no room for {pages} pages of {pid}");
            return None;
        }
        self.extents.push(SwapExtent { pid, first_page: candidate, pages });
        log::debug!("swap: allocated pages {candidate}..{} to {pid}", candidate + pages);
        Some(candidate)
    }

    /// Drop every extent owned by `pid`.
    pub fn release(&mut self, pid: Pid) {
        self.extents.retain(|e| e.pid != pid);
    }

    pub fn extent_of(&self, pid: Pid) -> Option<&SwapExtent> {
        self.extents.iter().find(|e| e.pid == pid)
    }

    pub fn extents(&self) -> &[SwapExtent] {
        &self.extents
    }

    /// Absolute swap page holding virtual page `vpage` of `pid`.
    pub fn page_of(&self, pid: Pid, vpage: usize) -> Option<usize> {
        self.extent_of(pid)
            .filter(|e| vpage < e.pages)
            .map(|e| e.first_page + vpage)
    }

    /// Copy one page out of the store. Returns the instant the transfer
    /// completes on the disk timeline.
    pub fn read_page(&mut self, page: usize, buf: &mut [i32], now: i64) -> Result<i64, SwapError> {
        let base = self.page_base(page)?;
        for (i, word) in buf.iter_mut().enumerate().take(self.page_size) {
            *word = self.words[base + i];
        }
        Ok(self.charge(now))
    }

    /// Copy one page into the store; same timeline accounting as reads.
    pub fn write_page(&mut self, page: usize, data: &[i32], now: i64) -> Result<i64, SwapError> {
        let base = self.page_base(page)?;
        for i in 0..self.page_size.min(data.len()) {
            self.words[base + i] = data[i];
        }
        Ok(self.charge(now))
    }

    pub fn busy_until(&self) -> i64 {
        self.busy_until
    }

    fn page_base(&self, page: usize) -> Result<usize, SwapError> {
        if page >= self.pages {
            return Err(SwapError { page, pages: self.pages });
        }
        Ok(page * self.page_size)
    }

    fn charge(&mut self, now: i64) -> i64 {
        self.busy_until = self.busy_until.max(now) + self.page_cost;
        self.busy_until
    }
}
