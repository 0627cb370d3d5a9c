// kernel/src/os/fault.rs
//
// CPU-error handling and the demand-paging core. A page-absent error at a
// valid page is the normal case of virtual memory; everything else a user
// process manages to raise is fatal to it and only it.

use super::Os;
use crate::error::KernelError;
use crate::hw::CpuErr;
use crate::process::BlockCause;

impl Os {
    pub(super) fn handle_cpu_error(&mut self) -> Result<(), KernelError> {
        let Some(slot) = self.current else {
            log::warn!("kernel: CPU error with no current process");
            return Ok(());
        };
        let Some(proc) = self.procs.get(slot) else { return Ok(()) };
        let (pid, err, complement) = (proc.pid, proc.regs.err, proc.regs.complement);

        match CpuErr::from_code(err) {
            CpuErr::PageAbsent => {
                if complement < 0 {
                    log::info!("kernel: {pid} faulted on negative address {complement}");
                    return self.kill_slot(slot);
                }
                self.handle_page_fault(slot, complement as usize)
            }
            CpuErr::Ok => {
                log::warn!("kernel: {pid} raised a CPU error with no error code");
                Ok(())
            }
            fatal => {
                log::info!("kernel: {pid} died on CPU error {fatal:?}");
                self.kill_slot(slot)
            }
        }
    }

    /// Demand paging for a fault at `vaddr` of the process in `slot`:
    /// validate, bring the page in, and put the process to sleep until the
    /// simulated transfer completes. The faulting instruction re-executes
    /// on wake, this time through a valid mapping.
    fn handle_page_fault(&mut self, slot: usize, vaddr: usize) -> Result<(), KernelError> {
        let vpage = vaddr / self.cfg.page_size;
        let Some(proc) = self.procs.get(slot) else { return Ok(()) };
        let (pid, pages) = (proc.pid, proc.pages);

        if vpage >= pages {
            log::info!("kernel: {pid} accessed page {vpage} outside its {pages} pages");
            return self.kill_slot(slot);
        }

        if proc.page_table.is_valid(vpage) {
            // the fault was already serviced (e.g. during a name copy);
            // just let the instruction retry
            if let Some(proc) = self.procs.get_mut(slot) {
                proc.regs.err = CpuErr::Ok.code();
            }
            return Ok(());
        }

        let completion = self.page_in(slot, vpage)?;
        let now = self.now()?;
        if let Some(proc) = self.procs.get_mut(slot) {
            proc.faults += 1;
            proc.regs.err = CpuErr::Ok.code();
        }
        self.procs.block(
            slot,
            BlockCause::SwapIo { until: completion },
            now,
            &mut self.metrics,
        );
        log::debug!("kernel: {pid} faulted on page {vpage}, sleeping until {completion}");
        Ok(())
    }

    /// Bring `vpage` of the process in `slot` into a physical frame,
    /// evicting a victim when memory is full. Returns the instant the
    /// disk finishes the read. Does not touch the fault counter or the
    /// process state: callers decide whether to block.
    pub(super) fn page_in(&mut self, slot: usize, vpage: usize) -> Result<i64, KernelError> {
        let Some(proc) = self.procs.get(slot) else {
            return Err(KernelError::NoCurrentProcess);
        };
        let pid = proc.pid;

        let frame = match self.frames.find_free() {
            Some(frame) => frame,
            None => self.evict()?,
        };

        let swap_page = self
            .swap
            .page_of(pid, vpage)
            .ok_or(KernelError::NoSwapSlot { pid: pid.0, vpage })?;
        let now = self.now()?;
        let page_size = self.cfg.page_size;
        let mut buf = vec![0; page_size];
        let completion = self.swap.read_page(swap_page, &mut buf, now)?;

        let base = frame * page_size;
        for (i, word) in buf.iter().enumerate() {
            self.mem.write(base + i, *word)?;
        }

        if let Some(proc) = self.procs.get_mut(slot) {
            proc.page_table.define(vpage, frame);
        }
        self.frames.occupy(frame, pid, vpage);
        log::debug!("kernel: page {vpage} of {pid} loaded into frame {frame}");
        Ok(completion)
    }

    /// Free one frame by evicting its page under the configured policy.
    /// Dirty pages go back to their swap slot first, charging disk time.
    fn evict(&mut self) -> Result<usize, KernelError> {
        let frame = self.frames.choose_victim().ok_or(KernelError::NoVictim)?;
        let (owner, vpage) = self
            .frames
            .owner(frame)
            .ok_or(KernelError::OrphanFrame { frame })?;

        if let Some(owner_slot) = self.procs.find_live(owner) {
            let pte_dirty = self
                .procs
                .get(owner_slot)
                .map_or(false, |p| p.page_table.dirty(vpage));
            let soft_dirty = self.frames.entry(frame).map_or(false, |e| e.dirty);

            if pte_dirty || soft_dirty {
                let swap_page = self
                    .swap
                    .page_of(owner, vpage)
                    .ok_or(KernelError::NoSwapSlot { pid: owner.0, vpage })?;
                let page_size = self.cfg.page_size;
                let base = frame * page_size;
                let mut buf = vec![0; page_size];
                for (i, word) in buf.iter_mut().enumerate() {
                    *word = self.mem.read(base + i)?;
                }
                let now = self.now()?;
                self.swap.write_page(swap_page, &buf, now)?;
                log::debug!("kernel: wrote dirty page {vpage} of {owner} back to swap");
            }
            if let Some(proc) = self.procs.get_mut(owner_slot) {
                proc.page_table.invalidate(vpage);
            }
        }

        self.frames.release(frame);
        log::debug!("kernel: evicted page {vpage} of {owner} from frame {frame}");
        Ok(frame)
    }
}
