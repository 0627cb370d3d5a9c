// src/main.rs
//
// Wrapper binary: builds the simulated machine, hands it to the kernel,
// delivers the reset interrupt and then drives the clock until the system
// winds down. The CPU that would execute user instructions belongs to the
// course simulator and is not part of this repository, so the run shows
// the boot, scheduling and idle accounting paths; the integration tests
// exercise everything else by playing the CPU themselves.

use std::cell::RefCell;
use std::process::ExitCode;
use std::rc::Rc;

use kernel::hw::bus::{self, DeviceBus, DeviceHandle};
use kernel::hw::clock::Clock;
use kernel::hw::layout;
use kernel::hw::loader::{ImageSet, ProgramImage};
use kernel::hw::mem::Memory;
use kernel::hw::terminal::Terminal;
use kernel::hw::Irq;
use kernel::process::scheduler::SchedPolicy;
use kernel::{KernelConfig, Os};

const MEM_WORDS: usize = 10_000;
const MAX_TICKS: usize = 1_000;

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut cfg = KernelConfig::default();
    match args.as_slice() {
        [] => {}
        [arg] => match arg.parse::<i32>().ok().and_then(SchedPolicy::from_arg) {
            Some(policy) => cfg.scheduler = policy,
            None => {
                eprintln!("invalid scheduler '{arg}': use 1 (round robin) or 2 (priority aging)");
                return ExitCode::FAILURE;
            }
        },
        _ => {
            eprintln!("usage: sosim [scheduler]");
            return ExitCode::FAILURE;
        }
    }
    log::info!("scheduler: {:?}", cfg.scheduler);

    // the machine: memory, four terminals, a clock, and the images the
    // firmware and init expect to find
    let mem = Memory::new(MEM_WORDS);
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
    devbus.attach(bus::clock_base(cfg.terminals), Rc::clone(&clock) as DeviceHandle, 4);

    let mut images = ImageSet::new();
    images.insert(
        &cfg.trap_program,
        ProgramImage::new(layout::HANDLER_BASE, vec![0; 8]),
    );
    // placeholder image; the course toolchain supplies the real init.maq
    images.insert(&cfg.init_program, ProgramImage::new(0, vec![0; 12]));

    let tick = cfg.tick_interval;
    let mut os = Os::new(cfg, mem, devbus, Box::new(images));

    os.interrupt(Irq::Reset.code());
    for _ in 0..MAX_TICKS {
        if os.internal_error() || os.finished() {
            break;
        }
        clock.borrow_mut().advance(tick);
        if clock.borrow().irq_pending() {
            os.interrupt(Irq::Clock.code());
        }
    }

    for (t, term) in terminals.iter().enumerate() {
        let out: String = term
            .borrow()
            .output()
            .iter()
            .map(|&w| u8::try_from(w).map(char::from).unwrap_or('?'))
            .collect();
        if !out.is_empty() {
            println!("terminal {t}: {out}");
        }
    }
    print!("{}", os.report());

    if os.internal_error() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
