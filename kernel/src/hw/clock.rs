// kernel/src/hw/clock.rs

use super::bus::{BusError, Device, CLOCK_INSTRUCTIONS, CLOCK_IRQ, CLOCK_REAL, CLOCK_TIMER};

/// Hardware clock.
///
/// Register 0 is the executed-instruction counter (the simulated time base
/// for everything in the kernel), register 1 an alias kept for the
/// wall-clock register of the original device map, register 2 the
/// programmable countdown timer and register 3 the interrupt flag the
/// kernel acknowledges by writing zero.
///
/// The CPU side advances the counter; in tests and in the wrapper that is
/// whoever plays the CPU.
pub struct Clock {
    instructions: i64,
    timer: i32,
    irq_pending: bool,
}

impl Clock {
    pub fn new() -> Self {
        Self { instructions: 0, timer: 0, irq_pending: false }
    }

    /// Account `n` executed instructions; latches the interrupt flag when
    /// the programmed timer runs out.
    pub fn advance(&mut self, n: i32) {
        self.instructions += i64::from(n);
        if self.timer > 0 {
            self.timer -= n;
            if self.timer <= 0 {
                self.timer = 0;
                self.irq_pending = true;
            }
        }
    }

    pub fn now(&self) -> i64 {
        self.instructions
    }

    pub fn irq_pending(&self) -> bool {
        self.irq_pending
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for Clock {
    fn read(&mut self, sub: usize) -> Result<i32, BusError> {
        match sub {
            CLOCK_INSTRUCTIONS | CLOCK_REAL => Ok(self.instructions as i32),
            CLOCK_TIMER => Ok(self.timer),
            CLOCK_IRQ => Ok(self.irq_pending as i32),
            _ => Err(BusError::Unsupported { device: sub }),
        }
    }

    fn write(&mut self, sub: usize, value: i32) -> Result<(), BusError> {
        match sub {
            CLOCK_TIMER => {
                self.timer = value;
                Ok(())
            }
            CLOCK_IRQ => {
                self.irq_pending = value != 0;
                Ok(())
            }
            _ => Err(BusError::Unsupported { device: sub }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_latches_interrupt() {
        let mut clock = Clock::new();
        clock.write(CLOCK_TIMER, 50).unwrap();
        clock.advance(49);
        assert!(!clock.irq_pending());
        clock.advance(1);
        assert!(clock.irq_pending());
        assert_eq!(clock.now(), 50);

        // ack
        clock.write(CLOCK_IRQ, 0).unwrap();
        assert!(!clock.irq_pending());
    }
}
