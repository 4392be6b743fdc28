//! GPIO pin assignments and the one-time function select setup

use tracing::debug;

use crate::registers::RegisterWindow;

/// Data pins of ADC A, least significant bit first
pub const CHANNEL_A_PINS: [u32; 6] = [7, 8, 9, 10, 11, 25];
/// Data pins of ADC B, least significant bit first
pub const CHANNEL_B_PINS: [u32; 6] = [17, 18, 22, 23, 24, 27];
/// GPCLK0 comes out on this pin when it is set to ALT0
pub const CLOCK_PIN: u32 = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Function {
    Input,
    Output,
    Alt(u8),
}

impl Function {
    /// The 3-bit GPFSEL encoding
    fn bits(self) -> u32 {
        match self {
            Function::Input => 0b000,
            Function::Output => 0b001,
            Function::Alt(a @ 0..=3) => a as u32 + 4,
            Function::Alt(4) => 0b011,
            Function::Alt(_) => 0b010,
        }
    }
}

/// Set the function of a single pin, leaving the other pins of its GPFSEL register alone
pub fn set_function<W: RegisterWindow>(gpio: &W, pin: u32, function: Function) {
    let reg = (pin / 10) as usize;
    let shift = (pin % 10) * 3;
    let fsel = gpio.read(reg) & !(0b111 << shift);
    gpio.write(reg, fsel | (function.bits() << shift));
}

/// Make every ADC data pin an input and route GPCLK0 to [`CLOCK_PIN`]
pub fn configure_scope_pins<W: RegisterWindow>(gpio: &W) {
    for pin in CHANNEL_A_PINS.iter().chain(CHANNEL_B_PINS.iter()) {
        set_function(gpio, *pin, Function::Input);
    }
    set_function(gpio, CLOCK_PIN, Function::Alt(0));
    debug!("ADC data pins set to input, GPCLK0 routed to GPIO{}", CLOCK_PIN);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::SimulatedWindow;

    #[test]
    fn test_scope_pins() {
        let gpio = SimulatedWindow::new(vec![]);
        // Pretend pin 7 was an output and pin 8 some alt function
        gpio.write(0, (0b001 << 21) | (0b010 << 24) | 0b001);
        configure_scope_pins(&gpio);
        // Pin 0 untouched, pins 7 and 8 cleared, pin 4 ALT0
        assert_eq!(gpio.peek(0), 0b001 | (0b100 << 12));
        // Pins 10, 11, 17, 18 in GPFSEL1 all input
        assert_eq!(gpio.peek(1), 0);
        assert_eq!(gpio.peek(2), 0);
    }

    #[test]
    fn test_alt_encoding() {
        assert_eq!(Function::Alt(0).bits(), 0b100);
        assert_eq!(Function::Alt(3).bits(), 0b111);
        assert_eq!(Function::Alt(4).bits(), 0b011);
        assert_eq!(Function::Alt(5).bits(), 0b010);
    }
}
