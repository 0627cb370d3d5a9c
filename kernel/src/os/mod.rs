// kernel/src/os/mod.rs
//
// The kernel proper. One value owns every piece of state (no globals), and
// one entry point, `interrupt`, is the only way in after construction:
// the firmware's call-into-kernel instruction lands here with the cause,
// and the return value tells the machine to resume the chosen process or
// halt the CPU.
//
// Handling always runs the same pipeline, whatever the cause:
//   save CPU state -> cause handler -> pending-work drain -> schedule ->
//   install page table + restore registers.

mod boot;
mod fault;
mod syscall;

pub use syscall::Syscall;

use crate::config::KernelConfig;
use crate::error::KernelError;
use crate::hw::bus::{self, DeviceBus};
use crate::hw::loader::ProgramLoader;
use crate::hw::mem::Memory;
use crate::hw::{layout, Irq, IRQ_KINDS};
use crate::metrics::Metrics;
use crate::mm::frame_table::FrameTable;
use crate::mm::mmu::{self, AccessMode, Mmu, MmuError};
use crate::mm::swap::SwapStore;
use crate::process::scheduler::Scheduler;
use crate::process::{BlockCause, Pid, ProcessState, ProcessTable, Registers};

/// Return value of `interrupt`: let the selected process execute.
pub const RESUME: i32 = 0;
/// Return value of `interrupt`: suspend the CPU until the next interrupt.
pub const HALT: i32 = 1;

pub struct Os {
    cfg: KernelConfig,
    mem: Memory,
    bus: DeviceBus,
    loader: Box<dyn ProgramLoader>,
    mmu: Mmu,
    procs: ProcessTable,
    frames: FrameTable,
    swap: SwapStore,
    sched: Scheduler,
    metrics: Metrics,
    /// Slot of the RUNNING process, if any.
    current: Option<usize>,
    /// Latched on any kernel-caused failure; forces halt forever after.
    internal_error: bool,
}

impl Os {
    pub fn new(cfg: KernelConfig, mem: Memory, bus: DeviceBus, loader: Box<dyn ProgramLoader>) -> Self {
        let total_frames = mem.len() / cfg.page_size;
        let first_user = layout::USER_BASE.div_ceil(cfg.page_size);
        let frames = FrameTable::new(total_frames, first_user, cfg.replacement);
        let swap = SwapStore::new(cfg.swap_pages, cfg.page_size, cfg.disk_page_cost);
        let procs = ProcessTable::new(cfg.max_processes);
        let sched = Scheduler::new(cfg.scheduler, cfg.quantum);
        Self {
            cfg,
            mem,
            bus,
            loader,
            mmu: Mmu::new(),
            procs,
            frames,
            swap,
            sched,
            metrics: Metrics::new(),
            current: None,
            internal_error: false,
        }
    }

    /// Kernel entry point. `cause` is the interrupt cause code the CPU put
    /// in register A before running the trap-handler stub.
    pub fn interrupt(&mut self, cause: i32) -> i32 {
        if let Err(err) = self.handle(cause) {
            log::error!("kernel: internal error: {err}");
            self.internal_error = true;
        }
        self.dispatch()
    }

    fn handle(&mut self, code: i32) -> Result<(), KernelError> {
        let cause = Irq::from_code(code);
        self.metrics
            .on_irq(cause.map(Irq::index).unwrap_or(IRQ_KINDS - 1));
        self.save_cpu_state()?;
        match cause {
            Some(Irq::Reset) => self.handle_reset()?,
            Some(Irq::Syscall) => self.handle_syscall()?,
            Some(Irq::CpuError) => self.handle_cpu_error()?,
            Some(Irq::Clock) => self.handle_clock()?,
            // terminals are polled in the pending-work drain; a device
            // interrupt reaching the kernel means broken wiring
            Some(Irq::Keyboard) | Some(Irq::Screen) | None => {
                return Err(KernelError::UnknownIrq(code));
            }
        }
        self.drain_pending()?;
        self.schedule()?;
        Ok(())
    }

    /// Current instant of the simulated clock (executed instructions).
    pub fn now(&self) -> Result<i64, KernelError> {
        let base = bus::clock_base(self.cfg.terminals);
        Ok(i64::from(self.bus.read(base + bus::CLOCK_INSTRUCTIONS)?))
    }

    /// Snapshot the save area into the interrupted process's descriptor.
    /// Nothing to do when the CPU was idle or the kernel stopped the
    /// process before it ever resumed.
    fn save_cpu_state(&mut self) -> Result<(), KernelError> {
        let Some(slot) = self.current else { return Ok(()) };
        let running = self
            .procs
            .get(slot)
            .map_or(false, |p| p.state == ProcessState::Running);
        if !running {
            return Ok(());
        }
        let regs = Registers {
            pc: self.mem.read(layout::SAVE_PC)?,
            a: self.mem.read(layout::SAVE_A)?,
            err: self.mem.read(layout::SAVE_ERR)?,
            complement: self.mem.read(layout::SAVE_COMPLEMENT)?,
            x: self.mem.read(layout::SAVE_X)?,
        };
        if let Some(proc) = self.procs.get_mut(slot) {
            log::trace!(
                "kernel: saved {} A={} X={} PC={} err={}",
                proc.pid, regs.a, regs.x, regs.pc, regs.err
            );
            proc.regs = regs;
        }
        Ok(())
    }

    /// Clock interrupt: acknowledge, rearm, charge the quantum, and age
    /// the pages of the running process for the LRU approximation.
    fn handle_clock(&mut self) -> Result<(), KernelError> {
        let base = bus::clock_base(self.cfg.terminals);
        self.bus.write(base + bus::CLOCK_IRQ, 0)?;
        self.bus.write(base + bus::CLOCK_TIMER, self.cfg.tick_interval)?;

        let Some(slot) = self.current else { return Ok(()) };
        let Some(proc) = self.procs.get_mut(slot) else { return Ok(()) };
        if proc.state != ProcessState::Running {
            return Ok(());
        }

        for vpage in 0..proc.pages {
            let accessed = proc.page_table.accessed(vpage);
            if let Some(aging) = proc.page_aging.get_mut(vpage) {
                *aging >>= 1;
                if accessed {
                    *aging |= 1 << 31;
                }
            }
            if accessed {
                proc.page_table.clear_accessed(vpage);
            }
            if let Some(frame) = proc.page_table.translate(vpage) {
                let dirty = proc.page_table.dirty(vpage);
                self.frames.age(frame, accessed, dirty);
            }
        }

        proc.quantum_left -= 1;
        if proc.quantum_left <= 0 {
            // preemption happens at the scheduling point below
            log::debug!("kernel: {} out of quantum", proc.pid);
        }
        Ok(())
    }

    /// Revisit every blocked process, in creation order, and wake the ones
    /// whose unblock predicate now holds; then account system idleness.
    fn drain_pending(&mut self) -> Result<(), KernelError> {
        let now = self.now()?;
        for slot in self.procs.ordered_slots() {
            let Some(proc) = self.procs.get(slot) else { continue };
            if proc.state != ProcessState::Blocked {
                continue;
            }
            let Some(cause) = proc.block else {
                log::warn!("kernel: {} blocked without cause", proc.pid);
                continue;
            };
            match cause {
                BlockCause::DeviceRead { device } => {
                    if self.bus.read(device + 1)? != 0 {
                        let datum = self.bus.read(device)?;
                        if let Some(proc) = self.procs.get_mut(slot) {
                            proc.regs.a = datum;
                        }
                        self.procs
                            .set_state(slot, ProcessState::Ready, now, &mut self.metrics);
                    }
                }
                BlockCause::DeviceWrite { device, byte } => {
                    if self.bus.read(device + 1)? != 0 {
                        self.bus.write(device, byte)?;
                        if let Some(proc) = self.procs.get_mut(slot) {
                            proc.regs.a = 0;
                        }
                        self.procs
                            .set_state(slot, ProcessState::Ready, now, &mut self.metrics);
                    }
                }
                BlockCause::ChildExit => {
                    let waiting_on_live = proc
                        .awaiting
                        .iter()
                        .any(|&pid| self.procs.is_alive(pid));
                    if !waiting_on_live {
                        if let Some(proc) = self.procs.get_mut(slot) {
                            proc.regs.a = 0;
                            proc.awaiting.clear();
                        }
                        self.procs
                            .set_state(slot, ProcessState::Ready, now, &mut self.metrics);
                    }
                }
                BlockCause::SwapIo { until } => {
                    if now >= until {
                        self.procs
                            .set_state(slot, ProcessState::Ready, now, &mut self.metrics);
                    }
                }
            }
        }

        let idle = !self
            .procs
            .iter()
            .any(|p| matches!(p.state, ProcessState::Ready | ProcessState::Running));
        self.metrics.on_idle_check(idle, now);
        Ok(())
    }

    fn schedule(&mut self) -> Result<(), KernelError> {
        let now = self.now()?;
        self.current = self
            .sched
            .pick(&mut self.procs, self.current, now, &mut self.metrics);
        Ok(())
    }

    /// Install the chosen process on the machine: page table into the MMU,
    /// registers into the restore area. Halt when idle or broken.
    fn dispatch(&mut self) -> i32 {
        if self.internal_error {
            return HALT;
        }
        let Some(slot) = self.current else {
            log::trace!("kernel: nothing to run, halting CPU");
            return HALT;
        };
        let Some(proc) = self.procs.get(slot) else {
            self.internal_error = true;
            return HALT;
        };
        self.mmu.install(Some(slot));
        let regs = proc.regs;
        let restored = self
            .mem
            .write(layout::SAVE_PC, regs.pc)
            .and_then(|_| self.mem.write(layout::SAVE_A, regs.a))
            .and_then(|_| self.mem.write(layout::SAVE_ERR, regs.err))
            .and_then(|_| self.mem.write(layout::SAVE_COMPLEMENT, regs.complement))
            .and_then(|_| self.mem.write(layout::SAVE_X, regs.x));
        if let Err(err) = restored {
            log::error!("kernel: cannot restore registers: {err}");
            self.internal_error = true;
            return HALT;
        }
        RESUME
    }

    /// One word of user memory through the installed page table, exactly
    /// as the CPU reads it. Page-absent is the caller's to turn into a
    /// CPU-error interrupt.
    pub fn user_read(&mut self, vaddr: usize) -> Result<i32, MmuError> {
        let slot = self.mmu.active().ok_or(MmuError::PageAbsent { vaddr })?;
        let Self { procs, mem, cfg, .. } = self;
        let proc = procs
            .get_mut(slot)
            .ok_or(MmuError::PageAbsent { vaddr })?;
        mmu::read(&mut proc.page_table, mem, cfg.page_size, vaddr, AccessMode::User)
    }

    /// One word of user memory written through the installed page table.
    pub fn user_write(&mut self, vaddr: usize, value: i32) -> Result<(), MmuError> {
        let slot = self.mmu.active().ok_or(MmuError::PageAbsent { vaddr })?;
        let Self { procs, mem, cfg, .. } = self;
        let proc = procs
            .get_mut(slot)
            .ok_or(MmuError::PageAbsent { vaddr })?;
        mmu::write(&mut proc.page_table, mem, cfg.page_size, vaddr, value, AccessMode::User)
    }

    // ---- observers (wrapper and tests) ----------------------------------

    pub fn config(&self) -> &KernelConfig {
        &self.cfg
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn processes(&self) -> &ProcessTable {
        &self.procs
    }

    pub fn frame_table(&self) -> &FrameTable {
        &self.frames
    }

    pub fn swap(&self) -> &SwapStore {
        &self.swap
    }

    pub fn current_pid(&self) -> Option<Pid> {
        self.current
            .and_then(|slot| self.procs.get(slot))
            .map(|p| p.pid)
    }

    pub fn installed_slot(&self) -> Option<usize> {
        self.mmu.active()
    }

    pub fn memory(&self) -> &Memory {
        &self.mem
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.mem
    }

    pub fn internal_error(&self) -> bool {
        self.internal_error
    }

    /// Nothing will ever run again: every created process is dead.
    pub fn finished(&self) -> bool {
        self.metrics.created() > 0 && self.procs.all_dead()
    }

    /// End-of-run metrics report.
    pub fn report(&self) -> String {
        let now = self.now().unwrap_or(0);
        self.metrics.report(now)
    }
}
