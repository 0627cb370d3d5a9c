// kernel/src/mm/mmu.rs
//
// Translation primitive of the memory-management unit. The MMU holds
// exactly one active page table (installed by the dispatcher before each
// resume); translation through an invalid page reports "page absent" and
// nothing else; turning that into a page fault or a kill is kernel policy,
// not MMU behavior.

use thiserror::Error;

use crate::hw::mem::{Memory, MemoryError};
use crate::mm::page_table::PageTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    User,
    Supervisor,
}

#[derive(Debug, Error)]
pub enum MmuError {
    #[error("page absent for virtual address {vaddr}")]
    PageAbsent { vaddr: usize },

    #[error(transparent)]
    Memory(#[from] MemoryError),
}

/// Active-table bookkeeping; the table contents stay owned by the process
/// descriptors, the MMU only remembers which slot is installed.
#[derive(Debug, Default)]
pub struct Mmu {
    active: Option<usize>,
}

impl Mmu {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&mut self, slot: Option<usize>) {
        self.active = slot;
    }

    pub fn active(&self) -> Option<usize> {
        self.active
    }
}

/// Read one word through `table`; marks the page accessed.
pub fn read(
    table: &mut PageTable,
    mem: &Memory,
    page_size: usize,
    vaddr: usize,
    mode: AccessMode,
) -> Result<i32, MmuError> {
    let (vpage, offset) = (vaddr / page_size, vaddr % page_size);
    let frame = table
        .translate(vpage)
        .ok_or(MmuError::PageAbsent { vaddr })?;
    table.set_accessed(vpage);
    let value = mem.read(frame * page_size + offset)?;
    log::trace!("mmu: {mode:?} read [{vaddr}] = {value} (frame {frame})");
    Ok(value)
}

/// Write one word through `table`; marks the page accessed and dirty.
pub fn write(
    table: &mut PageTable,
    mem: &mut Memory,
    page_size: usize,
    vaddr: usize,
    value: i32,
    mode: AccessMode,
) -> Result<(), MmuError> {
    let (vpage, offset) = (vaddr / page_size, vaddr % page_size);
    let frame = table
        .translate(vpage)
        .ok_or(MmuError::PageAbsent { vaddr })?;
    table.set_dirty(vpage);
    mem.write(frame * page_size + offset, value)?;
    log::trace!("mmu: {mode:?} write [{vaddr}] = {value} (frame {frame})");
    Ok(())
}
