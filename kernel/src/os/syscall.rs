// kernel/src/os/syscall.rs
//
// System-call layer. The call id arrives in register A, the argument in X,
// and the result goes back in A. A call that cannot complete because a
// device is not ready does not spin: the process blocks with the deferred
// work recorded in its block cause, and the pending drain finishes the
// I/O when the device comes around.

use super::Os;
use crate::error::KernelError;
use crate::hw::bus::{TERM_KEYBOARD, TERM_SCREEN};
use crate::mm::mmu::MmuError;
use crate::process::{BlockCause, Pid};

/// Call numbers shared with the user-program build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Read = 0,
    Write = 1,
    Spawn = 2,
    Kill = 3,
    Wait = 4,
}

impl Syscall {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Read),
            1 => Some(Self::Write),
            2 => Some(Self::Spawn),
            3 => Some(Self::Kill),
            4 => Some(Self::Wait),
            _ => None,
        }
    }
}

/// Result of pulling the program name out of the caller's address space.
enum NameCopy {
    Name(String),
    /// Bad string (overflow or a non-character word): the call fails.
    Invalid,
    /// The walk left the caller's address space: the caller was killed.
    KilledCaller,
}

impl Os {
    pub(super) fn handle_syscall(&mut self) -> Result<(), KernelError> {
        let slot = self.current.ok_or(KernelError::NoCurrentProcess)?;
        let proc = self.procs.get(slot).ok_or(KernelError::NoCurrentProcess)?;
        let (id, pid) = (proc.regs.a, proc.pid);

        match Syscall::from_code(id) {
            Some(Syscall::Read) => self.sys_read(slot),
            Some(Syscall::Write) => self.sys_write(slot),
            Some(Syscall::Spawn) => self.sys_spawn(slot),
            Some(Syscall::Kill) => self.sys_kill(slot),
            Some(Syscall::Wait) => self.sys_wait(slot),
            None => {
                log::warn!("kernel: {pid} made unknown system call {id}");
                self.kill_slot(slot)
            }
        }
    }

    /// Read one datum from the process's keyboard into A, or block until
    /// the keyboard has something.
    fn sys_read(&mut self, slot: usize) -> Result<(), KernelError> {
        let Some(proc) = self.procs.get(slot) else { return Ok(()) };
        let device = proc.terminal + TERM_KEYBOARD;
        if self.bus.read(device + 1)? != 0 {
            let datum = self.bus.read(device)?;
            if let Some(proc) = self.procs.get_mut(slot) {
                proc.regs.a = datum;
            }
        } else {
            let now = self.now()?;
            self.procs
                .block(slot, BlockCause::DeviceRead { device }, now, &mut self.metrics);
        }
        Ok(())
    }

    /// Write the datum in X to the process's screen, or stash it and block
    /// until the screen accepts output.
    fn sys_write(&mut self, slot: usize) -> Result<(), KernelError> {
        let Some(proc) = self.procs.get(slot) else { return Ok(()) };
        let device = proc.terminal + TERM_SCREEN;
        let byte = proc.regs.x;
        if self.bus.read(device + 1)? != 0 {
            self.bus.write(device, byte)?;
            if let Some(proc) = self.procs.get_mut(slot) {
                proc.regs.a = 0;
            }
        } else {
            let now = self.now()?;
            self.procs.block(
                slot,
                BlockCause::DeviceWrite { device, byte },
                now,
                &mut self.metrics,
            );
        }
        Ok(())
    }

    /// Create a process running the image named by the string at X in the
    /// caller's address space. Child pid in A, or -1.
    fn sys_spawn(&mut self, slot: usize) -> Result<(), KernelError> {
        let Some(proc) = self.procs.get(slot) else { return Ok(()) };
        let (vaddr, parent) = (proc.regs.x, proc.pid);

        if vaddr < 0 {
            log::info!("kernel: {parent} passed a negative name address to spawn");
            return self.kill_slot(slot);
        }
        let name = match self.copy_name(slot, vaddr as usize)? {
            NameCopy::KilledCaller => return Ok(()),
            NameCopy::Invalid => return self.reply(slot, -1),
            NameCopy::Name(name) => name,
        };

        // the image must exist before anything is committed
        if self.loader.open(&name).is_err() {
            log::info!("kernel: {parent} spawned unknown program '{name}'");
            return self.reply(slot, -1);
        }

        let now = self.now()?;
        let Some(child_slot) = self.procs.create(
            parent,
            self.cfg.terminals,
            self.cfg.quantum,
            now,
            &mut self.metrics,
        ) else {
            log::info!("kernel: no free process slot for '{name}'");
            return self.reply(slot, -1);
        };

        if !self.load_into_swap(&name, child_slot)? {
            // no extent was (or stays) consumed
            let pid = self.procs.get(child_slot).map(|p| p.pid);
            self.procs.remove(child_slot);
            if let Some(pid) = pid {
                self.metrics.forget(pid);
            }
            return self.reply(slot, -1);
        }

        let child = self.procs.get(child_slot).map(|p| p.pid.0).unwrap_or(-1);
        log::info!("kernel: {parent} spawned pid {child} running '{name}'");
        self.reply(slot, child)
    }

    /// Terminate the process with pid X (self when X is 0). 0 in A on
    /// success, -1 when there is no such live process.
    fn sys_kill(&mut self, slot: usize) -> Result<(), KernelError> {
        let Some(proc) = self.procs.get(slot) else { return Ok(()) };
        let target = if proc.regs.x == 0 { proc.pid } else { Pid(proc.regs.x) };

        match self.procs.find_live(target) {
            None => self.reply(slot, -1),
            Some(victim) => {
                self.kill_slot(victim)?;
                // a suicide has nobody to answer to
                if victim != slot {
                    self.reply(slot, 0)?;
                }
                Ok(())
            }
        }
    }

    /// Block until the process with pid X dies. -1 right away when it is
    /// already dead or never existed; 0 in A once the wake happens.
    fn sys_wait(&mut self, slot: usize) -> Result<(), KernelError> {
        let Some(proc) = self.procs.get(slot) else { return Ok(()) };
        let target = Pid(proc.regs.x);

        if target.0 <= 0 || !self.procs.is_alive(target) {
            return self.reply(slot, -1);
        }
        let now = self.now()?;
        if let Some(proc) = self.procs.get_mut(slot) {
            proc.awaiting.push(target);
        }
        self.procs
            .block(slot, BlockCause::ChildExit, now, &mut self.metrics);
        Ok(())
    }

    /// Kill the process in `slot`: evict its frames, drop its swap extent
    /// and page table, close its books. Waiters are woken by the drain.
    pub(super) fn kill_slot(&mut self, slot: usize) -> Result<(), KernelError> {
        let Some(proc) = self.procs.get_mut(slot) else { return Ok(()) };
        if !proc.is_alive() {
            return Ok(());
        }
        let pid = proc.pid;
        proc.page_table.clear();
        self.frames.release_process(pid);
        self.swap.release(pid);
        if self.mmu.active() == Some(slot) {
            self.mmu.install(None);
        }
        let now = self.now()?;
        self.procs
            .set_state(slot, crate::process::ProcessState::Dead, now, &mut self.metrics);
        if self.current == Some(slot) {
            self.current = None;
        }
        log::info!("kernel: {pid} terminated");
        Ok(())
    }

    /// Put a syscall result in the caller's A register.
    fn reply(&mut self, slot: usize, value: i32) -> Result<(), KernelError> {
        if let Some(proc) = self.procs.get_mut(slot) {
            proc.regs.a = value;
        }
        Ok(())
    }

    /// Walk the caller's virtual memory through the MMU collecting a
    /// zero-terminated name. Page faults on valid pages are serviced on
    /// the spot (the caller keeps the CPU; the disk timeline is still
    /// charged); leaving the address space is a fatal access like any
    /// other and kills the caller.
    fn copy_name(&mut self, slot: usize, vaddr: usize) -> Result<NameCopy, KernelError> {
        let page_size = self.cfg.page_size;
        let mut name = String::new();

        for offset in 0..self.cfg.name_max {
            let addr = vaddr + offset;
            let vpage = addr / page_size;
            let pages = self.procs.get(slot).map(|p| p.pages).unwrap_or(0);
            if vpage >= pages {
                let pid = self.procs.get(slot).map(|p| p.pid);
                log::info!(
                    "kernel: {:?} touched page {vpage} of {pages} copying a name",
                    pid
                );
                self.kill_slot(slot)?;
                return Ok(NameCopy::KilledCaller);
            }

            let word = match self.proc_read(slot, addr) {
                Ok(word) => word,
                Err(MmuError::PageAbsent { .. }) => {
                    self.page_in(slot, vpage)?;
                    if let Some(proc) = self.procs.get_mut(slot) {
                        proc.faults += 1;
                    }
                    match self.proc_read(slot, addr) {
                        Ok(word) => word,
                        Err(MmuError::PageAbsent { .. }) => return Ok(NameCopy::Invalid),
                        Err(MmuError::Memory(err)) => return Err(err.into()),
                    }
                }
                Err(MmuError::Memory(err)) => return Err(err.into()),
            };

            match u8::try_from(word) {
                Ok(0) => return Ok(NameCopy::Name(name)),
                Ok(byte) => name.push(byte as char),
                Err(_) => return Ok(NameCopy::Invalid),
            }
        }
        // never found the terminator
        Ok(NameCopy::Invalid)
    }

    /// MMU read through the page table of the process in `slot`.
    fn proc_read(&mut self, slot: usize, vaddr: usize) -> Result<i32, MmuError> {
        let Os { procs, mem, cfg, .. } = self;
        let proc = procs
            .get_mut(slot)
            .ok_or(MmuError::PageAbsent { vaddr })?;
        crate::mm::mmu::read(
            &mut proc.page_table,
            mem,
            cfg.page_size,
            vaddr,
            crate::mm::mmu::AccessMode::User,
        )
    }
}
