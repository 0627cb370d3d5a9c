// kernel/src/hw/bus.rs
//
// I/O controller: indexed access to registered devices. A device exposes a
// small run of consecutive subdevice registers (a terminal has four, the
// clock has four); attaching a device maps those onto a contiguous range of
// global bus indices.
//
// Devices are shared single-threaded handles so the machine side (the CPU
// harness, the wrapper) can keep driving a device the kernel also reads.

use std::cell::RefCell;
use std::rc::Rc;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("no device registered at bus index {0}")]
    UnknownDevice(usize),

    #[error("device register {device} does not support this access")]
    Unsupported { device: usize },

    #[error("device register {device} read while not ready")]
    NotReady { device: usize },
}

/// One registered device. `sub` is the register index local to the device.
pub trait Device {
    fn read(&mut self, sub: usize) -> Result<i32, BusError>;
    fn write(&mut self, sub: usize, value: i32) -> Result<(), BusError>;
}

pub type DeviceHandle = Rc<RefCell<dyn Device>>;

struct Mapping {
    dev: DeviceHandle,
    sub: usize,
}

#[derive(Default)]
pub struct DeviceBus {
    slots: Vec<Option<Mapping>>,
}

impl DeviceBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `subdevs` consecutive registers of `dev` starting at bus index
    /// `base`. Later attachments overwrite earlier ones.
    pub fn attach(&mut self, base: usize, dev: DeviceHandle, subdevs: usize) {
        if self.slots.len() < base + subdevs {
            self.slots.resize_with(base + subdevs, || None);
        }
        for sub in 0..subdevs {
            self.slots[base + sub] = Some(Mapping { dev: Rc::clone(&dev), sub });
        }
    }

    pub fn read(&self, index: usize) -> Result<i32, BusError> {
        let mapping = self
            .slots
            .get(index)
            .and_then(Option::as_ref)
            .ok_or(BusError::UnknownDevice(index))?;
        mapping.dev.borrow_mut().read(mapping.sub).map_err(|e| at_index(e, index))
    }

    pub fn write(&self, index: usize, value: i32) -> Result<(), BusError> {
        let mapping = self
            .slots
            .get(index)
            .and_then(Option::as_ref)
            .ok_or(BusError::UnknownDevice(index))?;
        mapping
            .dev
            .borrow_mut()
            .write(mapping.sub, value)
            .map_err(|e| at_index(e, index))
    }
}

/// Rewrite a device-local register number into the global bus index, so
/// errors name the address the kernel actually used.
fn at_index(err: BusError, index: usize) -> BusError {
    match err {
        BusError::Unsupported { .. } => BusError::Unsupported { device: index },
        BusError::NotReady { .. } => BusError::NotReady { device: index },
        other => other,
    }
}

// ---- standard device map -------------------------------------------------

/// Registers per terminal on the bus.
pub const TERM_SUBDEVS: usize = 4;

pub const TERM_KEYBOARD: usize = 0;
pub const TERM_KEYBOARD_STATUS: usize = 1;
pub const TERM_SCREEN: usize = 2;
pub const TERM_SCREEN_STATUS: usize = 3;

/// Bus index of the first register of terminal `t`.
pub fn terminal_base(t: usize) -> usize {
    t * TERM_SUBDEVS
}

/// Bus index of the first clock register, after `terminals` terminals.
pub fn clock_base(terminals: usize) -> usize {
    terminals * TERM_SUBDEVS
}

pub const CLOCK_INSTRUCTIONS: usize = 0;
pub const CLOCK_REAL: usize = 1;
pub const CLOCK_TIMER: usize = 2;
pub const CLOCK_IRQ: usize = 3;
