// kernel/src/mm/page_table.rs

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PteFlags: u8 {
        const VALID = 1 << 0;
        const ACCESSED = 1 << 1;
        const DIRTY = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Pte {
    frame: usize,
    flags: PteFlags,
}

/// Per-process virtual-page to physical-frame map.
///
/// A page is either mapped to a frame this process owns (the frame table
/// holds the reverse edge) or invalid. The MMU sets the accessed and dirty
/// bits as a side effect of translation; the kernel reads and clears them
/// for replacement bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct PageTable {
    entries: Vec<Pte>,
}

impl PageTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `vpage` onto `frame`, starting clean and unreferenced.
    pub fn define(&mut self, vpage: usize, frame: usize) {
        if self.entries.len() <= vpage {
            self.entries.resize_with(vpage + 1, Pte::default);
        }
        self.entries[vpage] = Pte { frame, flags: PteFlags::VALID };
    }

    pub fn invalidate(&mut self, vpage: usize) {
        if let Some(pte) = self.entries.get_mut(vpage) {
            *pte = Pte::default();
        }
    }

    /// Drop every mapping.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Frame holding `vpage`, or `None` when the page is absent. Pure: the
    /// access bits are the MMU's to set.
    pub fn translate(&self, vpage: usize) -> Option<usize> {
        self.entries
            .get(vpage)
            .filter(|pte| pte.flags.contains(PteFlags::VALID))
            .map(|pte| pte.frame)
    }

    pub fn is_valid(&self, vpage: usize) -> bool {
        self.translate(vpage).is_some()
    }

    pub fn accessed(&self, vpage: usize) -> bool {
        self.flag(vpage, PteFlags::ACCESSED)
    }

    pub fn clear_accessed(&mut self, vpage: usize) {
        if let Some(pte) = self.entries.get_mut(vpage) {
            pte.flags.remove(PteFlags::ACCESSED);
        }
    }

    pub fn dirty(&self, vpage: usize) -> bool {
        self.flag(vpage, PteFlags::DIRTY)
    }

    pub(crate) fn set_accessed(&mut self, vpage: usize) {
        if let Some(pte) = self.entries.get_mut(vpage) {
            pte.flags.insert(PteFlags::ACCESSED);
        }
    }

    pub(crate) fn set_dirty(&mut self, vpage: usize) {
        if let Some(pte) = self.entries.get_mut(vpage) {
            pte.flags.insert(PteFlags::ACCESSED | PteFlags::DIRTY);
        }
    }

    /// (vpage, frame) for every mapped page.
    pub fn mapped(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.entries.iter().enumerate().filter_map(|(vpage, pte)| {
            pte.flags
                .contains(PteFlags::VALID)
                .then_some((vpage, pte.frame))
        })
    }

    fn flag(&self, vpage: usize, flag: PteFlags) -> bool {
        self.entries
            .get(vpage)
            .map(|pte| pte.flags.contains(PteFlags::VALID | flag))
            .unwrap_or(false)
    }
}
