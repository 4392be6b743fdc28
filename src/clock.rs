//! Programming the general purpose clock that paces the ADCs

use tracing::{debug, error, info};

use crate::{
    registers::{RegisterWindow, CM_BUSY, CM_ENABLE, CM_GP0CTL, CM_GP0DIV, CM_PASSWORD},
    Error, Result,
};

/// How many times we poll the busy flag before giving up on the clock generator.
/// It normally clears within a handful of cycles of the selected source.
pub const CLOCK_BUSY_SPIN_LIMIT: usize = 1_000_000;

/// The integer part of the divider is a 12-bit field
const DIVI_MAX: u32 = 0xFFF;
/// Smallest integer divider the generator accepts without MASH noise shaping
const DIVI_MIN: u32 = 2;

/// Clock sources of the BCM2835 clock manager
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum ClockSource {
    Ground = 0,
    Oscillator = 1,
    PllA = 4,
    PllC = 5,
    PllD = 6,
    HdmiAux = 7,
}

impl ClockSource {
    /// Nominal frequency in Hz, where it is fixed
    pub fn frequency_hz(self) -> Option<u32> {
        match self {
            ClockSource::Ground => Some(0),
            ClockSource::Oscillator => Some(19_200_000),
            ClockSource::PllD => Some(500_000_000),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClockConfig {
    pub source: ClockSource,
    /// Integer part of the divider
    pub divi: u32,
    /// Fractional part of the divider (1/4096ths)
    pub divf: u32,
}

/// PLLD / 50 = 10 MHz on GPCLK0
pub const SCOPE_CLOCK: ClockConfig = ClockConfig {
    source: ClockSource::PllD,
    divi: 50,
    divf: 0,
};

impl ClockConfig {
    /// Output frequency in Hz, ignoring the fractional divider
    pub fn frequency_hz(&self) -> Option<u32> {
        self.source.frequency_hz().map(|f| f / self.divi)
    }

    fn div_word(&self) -> Result<u32> {
        if !(DIVI_MIN..=DIVI_MAX).contains(&self.divi) {
            return Err(Error::InvalidDivider(self.divi));
        }
        Ok(CM_PASSWORD | (self.divi << 12) | (self.divf & 0xFFF))
    }
}

/// Select the source, wait for the generator to settle, set the divider and enable it.
///
/// Must complete before any sampling; the spin on the busy flag has no yield.
pub fn configure<W: RegisterWindow>(clock: &W, config: &ClockConfig) -> Result<()> {
    let div = config.div_word()?;
    let src = config.source as u32;

    clock.write(CM_GP0CTL, CM_PASSWORD | src);
    let mut spins = 0usize;
    while clock.read(CM_GP0CTL) & CM_BUSY != 0 {
        spins += 1;
        if spins >= CLOCK_BUSY_SPIN_LIMIT {
            error!(spins, "Clock generator never reported idle");
            return Err(Error::ClockBusy { spins });
        }
    }
    debug!(spins, "Clock generator idle");

    clock.write(CM_GP0DIV, div);
    clock.write(CM_GP0CTL, CM_PASSWORD | CM_ENABLE | src);

    info!(
        source = ?config.source,
        divi = config.divi,
        divf = config.divf,
        frequency_hz = ?config.frequency_hz(),
        "Configured sample clock"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::SimulatedWindow;

    #[test]
    fn test_configure_scope_clock() {
        let clock = SimulatedWindow::new(vec![]).with_busy_polls(10);
        configure(&clock, &SCOPE_CLOCK).unwrap();
        assert_eq!(clock.peek(CM_GP0DIV), 0x5A00_0000 | (0x32 << 12));
        assert_eq!(clock.peek(CM_GP0CTL), 0x5A00_0016);
    }

    #[test]
    fn test_scope_clock_is_10mhz() {
        assert_eq!(SCOPE_CLOCK.frequency_hz(), Some(10_000_000));
        assert_eq!(
            ClockConfig {
                source: ClockSource::Oscillator,
                divi: 2,
                divf: 0
            }
            .frequency_hz(),
            Some(9_600_000)
        );
    }

    #[test]
    fn test_stuck_busy_flag() {
        let clock = SimulatedWindow::new(vec![]).with_busy_polls(usize::MAX);
        let err = configure(&clock, &SCOPE_CLOCK).unwrap_err();
        assert!(matches!(err, Error::ClockBusy { spins } if spins == CLOCK_BUSY_SPIN_LIMIT));
        // The divider is never touched if the generator doesn't settle
        assert_eq!(clock.peek(CM_GP0DIV), 0);
    }

    #[test]
    fn test_bad_divider() {
        let clock = SimulatedWindow::new(vec![]);
        let config = ClockConfig {
            divi: 0x1000,
            ..SCOPE_CLOCK
        };
        assert!(matches!(
            configure(&clock, &config),
            Err(Error::InvalidDivider(0x1000))
        ));
        assert_eq!(clock.peek(CM_GP0CTL), 0);
    }
}
