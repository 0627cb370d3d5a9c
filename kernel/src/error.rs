// kernel/src/error.rs

use thiserror::Error;

use crate::hw::bus::BusError;
use crate::hw::loader::LoaderError;
use crate::hw::mem::MemoryError;
use crate::mm::swap::SwapError;

/// Kernel-fatal failures.
///
/// Everything here means the kernel itself (or a kernel-owned address or
/// device) misbehaved. There is no process-level recovery: the dispatcher
/// sets the internal-error flag and the next dispatch halts the machine.
/// User-caused failures are never represented as errors; they surface as a
/// -1 return in register A or as the offending process going dead.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Swap(#[from] SwapError),

    #[error("program load failed: {0}")]
    Loader(#[from] LoaderError),

    #[error("unknown interrupt cause {0}")]
    UnknownIrq(i32),

    #[error("system call raised with no current process")]
    NoCurrentProcess,

    #[error("trap handler image must load at {expected}, image says {got}")]
    TrapImagePlacement { expected: usize, got: usize },

    #[error("could not bootstrap init: {0}")]
    InitLoad(&'static str),

    #[error("no frame available and no victim to evict")]
    NoVictim,

    #[error("frame {frame} has no recorded owner")]
    OrphanFrame { frame: usize },

    #[error("page {vpage} of pid {pid} has no swap slot")]
    NoSwapSlot { pid: i32, vpage: usize },
}
