// kernel/tests/boundaries.rs
//
// Edge-of-contract behavior: resource exhaustion, exact quantum expiry,
// address-space limits, and the data-integrity laws of paging and
// terminal I/O.

mod common;

use common::{image_with_name, Bench};
use kernel::os::Syscall;
use kernel::process::{Pid, ProcessState};
use kernel::{KernelConfig, HALT, RESUME};

fn cfg() -> KernelConfig {
    KernelConfig {
        quantum: 5,
        swap_pages: 64,
        ..KernelConfig::default()
    }
}

#[test]
fn spawn_with_full_table_consumes_nothing() {
    let mut config = cfg();
    config.max_processes = 1;
    let init = image_with_name(20, 10, "child.maq");
    let mut bench = Bench::new(
        config,
        600,
        &[("init.maq", init), ("child.maq", vec![9; 8])],
    );
    bench.boot();

    let extents_before = bench.os.swap().extents().len();
    bench.syscall(Syscall::Spawn, 10);
    assert_eq!(bench.reg_a(1), Some(-1));
    assert_eq!(bench.os.swap().extents().len(), extents_before);
    assert_eq!(bench.os.metrics().created(), 1);
}

#[test]
fn spawn_unknown_program_fails_without_a_corpse() {
    let init = image_with_name(20, 10, "ghost.maq");
    let mut bench = Bench::new(cfg(), 600, &[("init.maq", init)]);
    bench.boot();

    bench.syscall(Syscall::Spawn, 10);
    assert_eq!(bench.reg_a(1), Some(-1));
    assert_eq!(bench.state(1), Some(ProcessState::Running));
    assert_eq!(bench.os.metrics().created(), 1);
    assert_eq!(bench.os.swap().extents().len(), 1);
}

#[test]
fn killing_a_dead_pid_changes_nothing() {
    let init = image_with_name(20, 10, "child.maq");
    let mut bench = Bench::new(
        cfg(),
        600,
        &[("init.maq", init), ("child.maq", vec![9; 8])],
    );
    bench.boot();
    bench.syscall(Syscall::Spawn, 10);
    assert_eq!(bench.reg_a(1), Some(2));

    bench.syscall(Syscall::Kill, 2);
    assert_eq!(bench.reg_a(1), Some(0));
    assert_eq!(bench.state(2), Some(ProcessState::Dead));

    let extents = bench.os.swap().extents().len();
    bench.syscall(Syscall::Kill, 2);
    assert_eq!(bench.reg_a(1), Some(-1));
    assert_eq!(bench.state(1), Some(ProcessState::Running));
    assert_eq!(bench.os.swap().extents().len(), extents);

    // waiting on the corpse fails the same way
    bench.syscall(Syscall::Wait, 2);
    assert_eq!(bench.reg_a(1), Some(-1));
    assert_eq!(bench.state(1), Some(ProcessState::Running));
}

#[test]
fn access_one_page_past_the_end_is_fatal() {
    // init has pages 0 and 1; page 2 exists nowhere
    let mut bench = Bench::new(cfg(), 400, &[("init.maq", vec![5; 15])]);
    bench.boot();

    // last valid page is demand-paged, not fatal
    assert_eq!(bench.page_fault(19), HALT); // blocked on swap, nothing else
    assert_eq!(bench.state(1), Some(ProcessState::Blocked));
    bench.tick();
    assert_eq!(bench.state(1), Some(ProcessState::Running));

    // one word past the last page is a kill
    bench.page_fault(20);
    assert_eq!(bench.state(1), Some(ProcessState::Dead));
    assert!(bench.os.finished());
}

#[test]
fn quantum_expires_on_the_exact_tick() {
    let init = image_with_name(20, 10, "worker.maq");
    let mut bench = Bench::new(
        cfg(), // quantum 5
        600,
        &[("init.maq", init), ("worker.maq", vec![3; 8])],
    );
    bench.boot();
    bench.syscall(Syscall::Spawn, 10);
    assert_eq!(bench.current(), Some(1));

    // a fresh quantum from the scheduling point after spawn
    for tick in 1..=4 {
        bench.tick();
        assert_eq!(bench.current(), Some(1), "preempted early at tick {tick}");
    }
    bench.tick();
    assert_eq!(bench.current(), Some(2), "not preempted at the 5th tick");
    assert_eq!(bench.os.metrics().preemptions(), 1);
    assert_eq!(
        bench.os.metrics().proc(Pid(1)).unwrap().preemptions(),
        1,
        "the preemption belongs to the displaced process"
    );
}

#[test]
fn dirty_page_survives_eviction_and_return() {
    // one user frame forces every fault to evict
    let mut bench = Bench::new(cfg(), 110, &[("init.maq", vec![5; 15])]);
    bench.boot();

    // the process writes into page 0 (the CPU would, through the MMU)
    bench.os.user_write(5, 1234).unwrap();
    bench.advance(200);

    // fault to page 1: dirty page 0 is written back, then page 1 read in
    assert_eq!(bench.page_fault(12), HALT);
    let until = match bench
        .os
        .processes()
        .iter()
        .find(|p| p.pid == Pid(1))
        .unwrap()
        .block
    {
        Some(kernel::process::BlockCause::SwapIo { until }) => until,
        other => panic!("expected swap block, got {other:?}"),
    };
    // write-back plus read: two transfers after t=200
    assert_eq!(until, 220);
    bench.tick();
    assert_eq!(bench.state(1), Some(ProcessState::Running));

    // fault back to page 0: the bytes written before eviction came back
    bench.page_fault(5);
    bench.tick();
    assert_eq!(bench.state(1), Some(ProcessState::Running));
    assert_eq!(bench.os.user_read(5).unwrap(), 1234);
}

#[test]
fn terminal_data_arrives_in_order_across_blocking() {
    let mut bench = Bench::new(cfg(), 400, &[("init.maq", vec![5; 8])]);
    bench.boot();

    // first datum is already there: no block
    bench.terminals[0].borrow_mut().type_input('a' as i32);
    bench.syscall(Syscall::Read, 0);
    assert_eq!(bench.reg_a(1), Some('a' as i32));
    assert_eq!(bench.state(1), Some(ProcessState::Running));

    // the next two arrive while blocked, one at a time
    for expected in ['b', 'c'] {
        bench.syscall(Syscall::Read, 0);
        assert_eq!(bench.state(1), Some(ProcessState::Blocked));
        bench.terminals[0].borrow_mut().type_input(expected as i32);
        bench.tick();
        assert_eq!(bench.reg_a(1), Some(expected as i32));
        assert_eq!(bench.state(1), Some(ProcessState::Running));
    }
}

#[test]
fn blocked_write_completes_when_the_screen_frees_up() {
    let mut bench = Bench::new(cfg(), 400, &[("init.maq", vec![5; 8])]);
    bench.boot();

    bench.terminals[0].borrow_mut().set_screen_ready(false);
    assert_eq!(bench.syscall(Syscall::Write, 'z' as i32), HALT);
    assert_eq!(bench.state(1), Some(ProcessState::Blocked));
    assert!(bench.terminals[0].borrow().output().is_empty());

    bench.terminals[0].borrow_mut().set_screen_ready(true);
    assert_eq!(bench.tick(), RESUME);
    assert_eq!(bench.reg_a(1), Some(0));
    assert_eq!(bench.terminals[0].borrow().output(), &['z' as i32]);
}

#[test]
fn unknown_syscall_kills_the_caller() {
    let mut bench = Bench::new(cfg(), 400, &[("init.maq", vec![5; 8])]);
    bench.boot();

    assert_eq!(bench.syscall_code(99, 0), HALT);
    assert_eq!(bench.state(1), Some(ProcessState::Dead));
}

#[test]
fn unknown_interrupt_cause_halts_the_machine() {
    let mut bench = Bench::new(cfg(), 400, &[("init.maq", vec![5; 8])]);
    bench.boot();

    assert_eq!(bench.os.interrupt(42), HALT);
    assert!(bench.os.internal_error());
    // the latch is permanent
    assert_eq!(bench.os.interrupt(kernel::hw::Irq::Clock.code()), HALT);
}
