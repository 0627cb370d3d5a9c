// kernel/tests/common/mod.rs
//
// Test bench that plays the machine side of the firmware contract: it
// builds memory, terminals, clock and images, and acts as the CPU: it
// writes the register save area before raising an interrupt and advances
// the clock device, exactly the way the simulator would between two
// kernel entries.

use std::cell::RefCell;
use std::rc::Rc;

use kernel::hw::bus::{self, DeviceBus, DeviceHandle};
use kernel::hw::clock::Clock;
use kernel::hw::layout;
use kernel::hw::loader::{ImageSet, ProgramImage};
use kernel::hw::mem::Memory;
use kernel::hw::terminal::Terminal;
use kernel::hw::{CpuErr, Irq};
use kernel::os::Syscall;
use kernel::process::{BlockCause, Pid, ProcessState};
use kernel::{KernelConfig, Os};

pub struct Bench {
    pub os: Os,
    pub terminals: Vec<Rc<RefCell<Terminal>>>,
    pub clock: Rc<RefCell<Clock>>,
    tick_interval: i32,
}

/// Turn a program name into the words a user image would hold it as.
pub fn name_words(name: &str) -> Vec<i32> {
    name.bytes().map(i32::from).chain([0]).collect()
}

/// An image of `len` filler words with `name` spliced in at `at`, the
/// shape of a user program that keeps a program name in its data.
pub fn image_with_name(len: usize, at: usize, name: &str) -> Vec<i32> {
    let mut words = vec![7; len];
    for (i, w) in name_words(name).into_iter().enumerate() {
        words[at + i] = w;
    }
    words
}

impl Bench {
    /// Machine with `mem_words` of memory, the configured terminals, a
    /// clock, a trap-handler image, and the given user images.
    pub fn new(cfg: KernelConfig, mem_words: usize, images: &[(&str, Vec<i32>)]) -> Self {
        let mem = Memory::new(mem_words);

        let mut devbus = DeviceBus::new();
        let mut terminals = Vec::new();
        for t in 0..cfg.terminals {
            let term = Rc::new(RefCell::new(Terminal::new()));
            devbus.attach(
                bus::terminal_base(t),
                Rc::clone(&term) as DeviceHandle,
                bus::TERM_SUBDEVS,
            );
            terminals.push(term);
        }
        let clock = Rc::new(RefCell::new(Clock::new()));
        devbus.attach(
            bus::clock_base(cfg.terminals),
            Rc::clone(&clock) as DeviceHandle,
            4,
        );

        let mut set = ImageSet::new();
        set.insert(
            &cfg.trap_program,
            ProgramImage::new(layout::HANDLER_BASE, vec![0; 4]),
        );
        for (name, words) in images {
            set.insert(name, ProgramImage::new(0, words.clone()));
        }

        let tick_interval = cfg.tick_interval;
        let os = Os::new(cfg, mem, devbus, Box::new(set));
        Self { os, terminals, clock, tick_interval }
    }

    pub fn boot(&mut self) -> i32 {
        let decision = self.os.interrupt(Irq::Reset.code());
        self.check_invariants();
        decision
    }

    /// Let `n` instructions pass on the clock without entering the kernel.
    pub fn advance(&mut self, n: i32) {
        self.clock.borrow_mut().advance(n);
    }

    /// One full clock interval followed by the clock interrupt.
    pub fn tick(&mut self) -> i32 {
        self.advance(self.tick_interval);
        let decision = self.os.interrupt(Irq::Clock.code());
        self.check_invariants();
        decision
    }

    /// The running process traps with a system call: id in A, argument in
    /// X, like the CPU would leave them in the save area.
    pub fn syscall(&mut self, call: Syscall, x: i32) -> i32 {
        self.syscall_code(call as i32, x)
    }

    /// Same, with a raw (possibly bogus) call number.
    pub fn syscall_code(&mut self, call: i32, x: i32) -> i32 {
        let mem = self.os.memory_mut();
        mem.write(layout::SAVE_A, call).unwrap();
        mem.write(layout::SAVE_X, x).unwrap();
        mem.write(layout::SAVE_ERR, CpuErr::Ok.code()).unwrap();
        mem.write(layout::SAVE_COMPLEMENT, 0).unwrap();
        let decision = self.os.interrupt(Irq::Syscall.code());
        self.check_invariants();
        decision
    }

    /// The running process faults: the CPU reports `err` with the faulting
    /// address in the complement register.
    pub fn cpu_error(&mut self, err: CpuErr, complement: i32) -> i32 {
        let mem = self.os.memory_mut();
        mem.write(layout::SAVE_ERR, err.code()).unwrap();
        mem.write(layout::SAVE_COMPLEMENT, complement).unwrap();
        let decision = self.os.interrupt(Irq::CpuError.code());
        self.check_invariants();
        decision
    }

    pub fn page_fault(&mut self, vaddr: i32) -> i32 {
        self.cpu_error(CpuErr::PageAbsent, vaddr)
    }

    pub fn state(&self, pid: i32) -> Option<ProcessState> {
        self.os
            .processes()
            .iter()
            .find(|p| p.pid == Pid(pid))
            .map(|p| p.state)
    }

    pub fn reg_a(&self, pid: i32) -> Option<i32> {
        self.os
            .processes()
            .iter()
            .find(|p| p.pid == Pid(pid))
            .map(|p| p.regs.a)
    }

    pub fn faults(&self, pid: i32) -> Option<u32> {
        self.os
            .processes()
            .iter()
            .find(|p| p.pid == Pid(pid))
            .map(|p| p.faults)
    }

    pub fn priority(&self, pid: i32) -> Option<f32> {
        self.os
            .processes()
            .iter()
            .find(|p| p.pid == Pid(pid))
            .map(|p| p.priority)
    }

    pub fn current(&self) -> Option<i32> {
        self.os.current_pid().map(|p| p.0)
    }

    /// Checks that must hold after every interrupt, whatever happened.
    pub fn check_invariants(&self) {
        let procs = self.os.processes();
        let now = self.os.now().unwrap();

        // at most one process is RUNNING
        let running = procs
            .iter()
            .filter(|p| p.state == ProcessState::Running)
            .count();
        assert!(running <= 1, "{running} processes running at once");

        // every blocked process has one well-formed block cause
        for proc in procs.iter() {
            if proc.state == ProcessState::Blocked {
                match proc.block {
                    Some(BlockCause::DeviceRead { device })
                    | Some(BlockCause::DeviceWrite { device, .. }) => {
                        let limit = bus::clock_base(self.os.config().terminals);
                        assert!(device < limit, "{}: device {device} out of range", proc.pid);
                    }
                    Some(BlockCause::ChildExit) => {
                        assert!(!proc.awaiting.is_empty(), "{}: waiting on nobody", proc.pid);
                    }
                    Some(BlockCause::SwapIo { until }) => {
                        assert!(until > 0, "{}: swap wake instant {until}", proc.pid);
                    }
                    None => panic!("{}: blocked without a cause", proc.pid),
                }
            } else {
                assert!(proc.block.is_none(), "{}: stale block cause", proc.pid);
            }
        }

        // frame table and page tables agree (bijection)
        for (frame, entry) in self.os.frame_table().occupied() {
            let owner = procs
                .iter()
                .find(|p| p.pid == entry.owner && p.is_alive())
                .unwrap_or_else(|| panic!("frame {frame} owned by dead {}", entry.owner));
            assert_eq!(
                owner.page_table.translate(entry.vpage),
                Some(frame),
                "frame {frame} not mapped back by {}",
                entry.owner
            );
        }
        for proc in procs.iter().filter(|p| p.is_alive()) {
            for (vpage, frame) in proc.page_table.mapped() {
                let owner = self.os.frame_table().owner(frame);
                assert_eq!(
                    owner,
                    Some((proc.pid, vpage)),
                    "{}: page {vpage} maps unowned frame {frame}",
                    proc.pid
                );
            }
        }

        // swap extents are pairwise disjoint
        let extents = self.os.swap().extents();
        for (i, a) in extents.iter().enumerate() {
            for b in &extents[i + 1..] {
                let apart = a.first_page + a.pages <= b.first_page
                    || b.first_page + b.pages <= a.first_page;
                assert!(apart, "extents overlap: {a:?} {b:?}");
            }
        }

        // per-state time is conserved for every live process
        for proc in procs.iter().filter(|p| p.is_alive()) {
            let stats = self.os.metrics().proc(proc.pid).unwrap();
            assert_eq!(
                stats.accounted_time(now),
                now - stats.created_at(),
                "{}: accounted time drifted",
                proc.pid
            );
        }
    }
}
