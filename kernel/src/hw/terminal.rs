// kernel/src/hw/terminal.rs

use std::collections::VecDeque;

use super::bus::{
    BusError, Device, TERM_KEYBOARD, TERM_KEYBOARD_STATUS, TERM_SCREEN, TERM_SCREEN_STATUS,
};

/// One console terminal: a keyboard (data + status) and a screen
/// (data + status).
///
/// The keyboard is ready whenever its queue is non-empty; whoever plays the
/// console types with `type_input`. The screen readiness flag is under
/// console control too (a real screen goes busy while drawing), and every
/// datum written is kept in an observable transcript.
pub struct Terminal {
    input: VecDeque<i32>,
    output: Vec<i32>,
    screen_ready: bool,
}

impl Terminal {
    pub fn new() -> Self {
        Self { input: VecDeque::new(), output: Vec::new(), screen_ready: true }
    }

    /// Queue one datum on the keyboard.
    pub fn type_input(&mut self, datum: i32) {
        self.input.push_back(datum);
    }

    pub fn set_screen_ready(&mut self, ready: bool) {
        self.screen_ready = ready;
    }

    /// Everything written to the screen so far, in order.
    pub fn output(&self) -> &[i32] {
        &self.output
    }
}

impl Default for Terminal {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for Terminal {
    fn read(&mut self, sub: usize) -> Result<i32, BusError> {
        match sub {
            TERM_KEYBOARD => self
                .input
                .pop_front()
                .ok_or(BusError::NotReady { device: sub }),
            TERM_KEYBOARD_STATUS => Ok(!self.input.is_empty() as i32),
            TERM_SCREEN_STATUS => Ok(self.screen_ready as i32),
            _ => Err(BusError::Unsupported { device: sub }),
        }
    }

    fn write(&mut self, sub: usize, value: i32) -> Result<(), BusError> {
        match sub {
            TERM_SCREEN => {
                if !self.screen_ready {
                    return Err(BusError::NotReady { device: sub });
                }
                self.output.push(value);
                Ok(())
            }
            _ => Err(BusError::Unsupported { device: sub }),
        }
    }
}
