//! Digital output lines used to strap the target into and out of its bootloader.

use strum::Display;

/// Logical level of a control line. `High` is the idle/run state.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    #[strum(serialize = "HIGH")]
    High,
    #[strum(serialize = "LOW")]
    Low,
}

/// A single digital output.
///
/// Writes are fire-and-forget: a pin that cannot be driven shows up later as
/// an unresponsive chip, never as an error here.
pub trait OutputLine: Send {
    fn set_level(&mut self, level: Level);

    /// Name used in log output.
    fn name(&self) -> String {
        "line".to_string()
    }
}

impl<T: OutputLine + ?Sized> OutputLine for Box<T> {
    fn set_level(&mut self, level: Level) {
        (**self).set_level(level)
    }

    fn name(&self) -> String {
        (**self).name()
    }
}

/// Output that only logs what it would have driven. Used for dry runs on hosts
/// without GPIO access.
#[derive(Debug, Clone)]
pub struct NullLine {
    label: String,
}

impl NullLine {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl OutputLine for NullLine {
    fn set_level(&mut self, level: Level) {
        tracing::debug!("{} -> {} (dry run)", self.label, level);
    }

    fn name(&self) -> String {
        self.label.clone()
    }
}

/// Raspberry Pi GPIO output addressed by BCM pin number.
#[cfg(feature = "raspberry")]
pub struct RppalLine {
    pin: rppal::gpio::OutputPin,
}

#[cfg(feature = "raspberry")]
impl RppalLine {
    /// Claims `bcm_pin` as an output, initially HIGH.
    pub fn open(bcm_pin: u8) -> crate::Result<Self> {
        let mut pin = rppal::gpio::Gpio::new()?.get(bcm_pin)?.into_output_high();
        // The line has to stay HIGH after we exit, not float back to an input.
        pin.set_reset_on_drop(false);
        Ok(Self { pin })
    }
}

#[cfg(feature = "raspberry")]
impl OutputLine for RppalLine {
    fn set_level(&mut self, level: Level) {
        match level {
            Level::High => self.pin.set_high(),
            Level::Low => self.pin.set_low(),
        }
    }

    fn name(&self) -> String {
        format!("GPIO{}", self.pin.pin())
    }
}
