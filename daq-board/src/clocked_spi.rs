//! The RP2040 SPI block behind the `Reconfigure` seam.

use core::convert::Infallible;

use daq::bus::{BusConfig, Reconfigure};
use embedded_hal::blocking::spi::{Transfer, Write};
use fugit::HertzU32;
use rp2040_hal::spi::{Enabled, Spi, SpiDevice, ValidSpiPinout};

/// An enabled SPI peripheral that retunes its clock between devices.
///
/// The HAL only lets the frame format be set while the block is disabled, so
/// the mode given at `init` is the only one this bus can run. Every chip on
/// both buses talks mode 0.
pub struct ClockedSpi<D: SpiDevice, P: ValidSpiPinout<D>> {
    spi: Spi<Enabled, D, P, 8>,
    peripheral_clock: HertzU32,
    initial: BusConfig,
}

impl<D: SpiDevice, P: ValidSpiPinout<D>> ClockedSpi<D, P> {
    /// `initial` is what `spi` was initialised with.
    pub fn new(spi: Spi<Enabled, D, P, 8>, peripheral_clock: HertzU32, initial: BusConfig) -> Self {
        Self {
            spi,
            peripheral_clock,
            initial,
        }
    }
}

impl<D: SpiDevice, P: ValidSpiPinout<D>> Reconfigure for ClockedSpi<D, P> {
    fn reconfigure(&mut self, config: &BusConfig) {
        if config.mode != self.initial.mode {
            defmt::panic!(
                "SPI mode change requested at {} Hz; the bus was brought up in another mode",
                config.frequency.to_Hz()
            );
        }
        let actual = self.spi.set_baudrate(self.peripheral_clock, config.frequency);
        defmt::trace!("spi clock {} Hz (asked {} Hz)", actual.to_Hz(), config.frequency.to_Hz());
    }
}

impl<D: SpiDevice, P: ValidSpiPinout<D>> Transfer<u8> for ClockedSpi<D, P> {
    type Error = Infallible;

    fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], Infallible> {
        self.spi.transfer(words)
    }
}

impl<D: SpiDevice, P: ValidSpiPinout<D>> Write<u8> for ClockedSpi<D, P> {
    type Error = Infallible;

    fn write(&mut self, words: &[u8]) -> Result<(), Infallible> {
        self.spi.write(words)
    }
}
