//! embedded-hal pin backend.
//!
//! Binds concrete HAL pins (any [`embedded_hal::digital`] implementor) and
//! ADC sampling closures to pin numbers at startup. Type erasure keeps the
//! registry monomorphic while the board support layer supplies whatever pin
//! types its HAL exposes.

use embedded_hal::digital::{InputPin, StatefulOutputPin};
use log::warn;

use super::{PinBackend, PinKind};

// ---------------------------------------------------------------------------
// Erased line drivers
// ---------------------------------------------------------------------------

trait DigitalLine {
    fn write(&mut self, high: bool);
    fn read(&mut self) -> bool;
}

struct Output<P: StatefulOutputPin>(P);

impl<P: StatefulOutputPin> DigitalLine for Output<P> {
    fn write(&mut self, high: bool) {
        let result = if high { self.0.set_high() } else { self.0.set_low() };
        if result.is_err() {
            warn!("io: HAL write failed");
        }
    }

    fn read(&mut self) -> bool {
        self.0.is_set_high().unwrap_or(false)
    }
}

struct Input<P: InputPin>(P);

impl<P: InputPin> DigitalLine for Input<P> {
    fn write(&mut self, _high: bool) {}

    fn read(&mut self) -> bool {
        self.0.is_high().unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Physical backend assembled from HAL pins and ADC samplers.
pub struct HalBackend {
    digital: Vec<(u16, Box<dyn DigitalLine>)>,
    analog: Vec<(u16, Box<dyn FnMut() -> u32>)>,
}

impl HalBackend {
    pub fn new() -> Self {
        Self {
            digital: Vec::new(),
            analog: Vec::new(),
        }
    }

    /// Bind an actuator line (readable back through its latched state).
    pub fn bind_output<P: StatefulOutputPin + 'static>(&mut self, pin: u16, line: P) {
        self.digital.push((pin, Box::new(Output(line))));
    }

    /// Bind a digital sense line.
    pub fn bind_input<P: InputPin + 'static>(&mut self, pin: u16, line: P) {
        self.digital.push((pin, Box::new(Input(line))));
    }

    /// Bind an analog channel; the closure performs one ADC conversion.
    pub fn bind_analog<F: FnMut() -> u32 + 'static>(&mut self, pin: u16, sample: F) {
        self.analog.push((pin, Box::new(sample)));
    }
}

impl Default for HalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl PinBackend for HalBackend {
    fn read(&mut self, pin: u16, kind: PinKind) -> u32 {
        match kind {
            PinKind::Digital => self
                .digital
                .iter_mut()
                .find(|(p, _)| *p == pin)
                .map_or(0, |(_, line)| u32::from(line.read())),
            PinKind::Analog => self
                .analog
                .iter_mut()
                .find(|(p, _)| *p == pin)
                .map_or(0, |(_, sample)| sample()),
        }
    }

    fn write(&mut self, pin: u16, kind: PinKind, value: u32) {
        if kind != PinKind::Digital {
            return;
        }
        match self.digital.iter_mut().find(|(p, _)| *p == pin) {
            Some((_, line)) => line.write(value != 0),
            None => warn!("io: write to unbound pin {pin}"),
        }
    }
}
