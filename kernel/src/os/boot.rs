// kernel/src/os/boot.rs
//
// Reset handling and program loading. The trap-handler stub is the only
// thing ever written straight into physical memory; user programs live in
// their swap extent and reach memory one page at a time, on demand. The
// single exception is page 0 of init, pre-faulted so the machine has an
// instruction to fetch when it leaves reset.

use super::Os;
use crate::error::KernelError;
use crate::hw::bus;
use crate::hw::layout;
use crate::process::{Pid, ProcessState};

impl Os {
    pub(super) fn handle_reset(&mut self) -> Result<(), KernelError> {
        log::info!("kernel: reset");

        let image = self.loader.open(&self.cfg.trap_program)?;
        if image.load_addr() != layout::HANDLER_BASE {
            return Err(KernelError::TrapImagePlacement {
                expected: layout::HANDLER_BASE,
                got: image.load_addr(),
            });
        }
        for offset in 0..image.len() {
            self.mem.write(image.load_addr() + offset, image.word(offset))?;
        }

        let clock = bus::clock_base(self.cfg.terminals);
        self.bus.write(clock + bus::CLOCK_TIMER, self.cfg.tick_interval)?;

        let now = self.now()?;
        let slot = self
            .procs
            .create(Pid(0), self.cfg.terminals, self.cfg.quantum, now, &mut self.metrics)
            .ok_or(KernelError::InitLoad("no free process slot"))?;

        let name = self.cfg.init_program.clone();
        if !self.load_into_swap(&name, slot)? {
            return Err(KernelError::InitLoad("image or swap extent unavailable"));
        }

        // pre-fault page 0 so the first instruction fetch succeeds
        self.page_in(slot, 0)?;

        self.procs
            .set_state(slot, ProcessState::Running, now, &mut self.metrics);
        self.current = Some(slot);
        log::info!("kernel: init is {}", self.procs.get(slot).map(|p| p.pid.0).unwrap_or(0));
        Ok(())
    }

    /// Size a swap extent for the named image and copy it there page by
    /// page, zero-padding the tail. `false` when the image does not exist
    /// or the store has no room; nothing is left allocated in that case.
    pub(super) fn load_into_swap(&mut self, name: &str, slot: usize) -> Result<bool, KernelError> {
        let image = match self.loader.open(name) {
            Ok(image) => image,
            Err(err) => {
                log::warn!("kernel: {err}");
                return Ok(false);
            }
        };
        let Some(pid) = self.procs.get(slot).map(|p| p.pid) else {
            return Ok(false);
        };

        let page_size = self.cfg.page_size;
        let pages = image.len().div_ceil(page_size).max(1);
        let Some(first) = self.swap.allocate(pid, pages) else {
            return Ok(false);
        };

        let now = self.now()?;
        let mut buf = vec![0; page_size];
        for page in 0..pages {
            for (i, word) in buf.iter_mut().enumerate() {
                *word = image.word(page * page_size + i);
            }
            self.swap.write_page(first + page, &buf, now)?;
        }

        if let Some(proc) = self.procs.get_mut(slot) {
            proc.pages = pages;
            proc.page_aging = vec![0; pages];
        }
        log::debug!("kernel: '{name}' staged into swap for {pid} ({pages} pages)");
        Ok(true)
    }
}
