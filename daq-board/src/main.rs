// There is no `main` in the usual sense, `cortex-m-rt` jumps to the `#[entry]` function after reset.
#![no_main]
// We're not running this in an operating system, so we only have access to the `core` library, not `std` (of which `core` is a subset).
#![no_std]

use defmt_rtt as _; // global logger
use panic_probe as _;

use daq::{
    adc128s022::Adc128s022,
    bus::{SharedBus, SpiDevice},
    cd74hc4067::Cd74hc4067,
    clock::{Instant, Monotonic},
    config,
    mcp2515::Mcp2515,
    sampler::Sampler,
    scheduler::{Scheduler, StopPin},
    storage::CsvLog,
};
use embedded_sdmmc::SdCard;
use rp2040_hal::{
    self as hal,
    clocks::init_clocks_and_plls,
    gpio::{FunctionSpi, Pins},
    pac,
    spi::Spi,
    Clock, Sio, Timer, Watchdog,
};
use shared_bus::NullMutex;

mod clocked_spi;
mod sd;

use clocked_spi::ClockedSpi;
use sd::SdVolume;

/// Second-stage bootloader for the W25Q080 flash on the board.
#[link_section = ".boot2"]
#[used]
pub static BOOT2_FIRMWARE: [u8; 256] = rp2040_boot2::BOOT_LOADER_W25Q080;

/// The board has a 12 MHz crystal.
const XTAL_FREQ_HZ: u32 = 12_000_000;

/// The RP2040's 64-bit microsecond timer.
struct TimerClock(Timer);

impl Monotonic for TimerClock {
    fn now(&mut self) -> Instant {
        self.0.get_counter()
    }
}

#[hal::entry]
fn main() -> ! {
    let Some(mut pac) = pac::Peripherals::take() else {
        defmt::panic!("peripherals already taken");
    };

    let mut watchdog = Watchdog::new(pac.WATCHDOG);
    let Ok(clocks) = init_clocks_and_plls(
        XTAL_FREQ_HZ,
        pac.XOSC,
        pac.CLOCKS,
        pac.PLL_SYS,
        pac.PLL_USB,
        &mut pac.RESETS,
        &mut watchdog,
    ) else {
        defmt::panic!("clock init failed");
    };
    let peripheral_clock = clocks.peripheral_clock.freq();

    let sio = Sio::new(pac.SIO);
    let pins = Pins::new(pac.IO_BANK0, pac.PADS_BANK0, sio.gpio_bank0, &mut pac.RESETS);

    // `Timer` is `Copy`; every driver gets its own handle for delays.
    let timer = Timer::new(pac.TIMER, &mut pac.RESETS, &clocks);

    // Bus 0 (SCK GP2, MOSI GP3, MISO GP4): the ADC and the SD card.
    let spi0 = Spi::<_, _, _, 8>::new(
        pac.SPI0,
        (
            pins.gpio3.into_function::<FunctionSpi>(),
            pins.gpio4.into_function::<FunctionSpi>(),
            pins.gpio2.into_function::<FunctionSpi>(),
        ),
    )
    .init(
        &mut pac.RESETS,
        peripheral_clock,
        config::ADC_BUS.frequency,
        &config::ADC_BUS.mode,
    );
    let bus0: SharedBus<NullMutex<_>> = SharedBus::new(ClockedSpi::new(
        spi0,
        peripheral_clock,
        config::ADC_BUS,
    ));

    // Bus 1 (SCK GP10, MOSI GP11, MISO GP8): the CAN controller alone.
    let spi1 = Spi::<_, _, _, 8>::new(
        pac.SPI1,
        (
            pins.gpio11.into_function::<FunctionSpi>(),
            pins.gpio8.into_function::<FunctionSpi>(),
            pins.gpio10.into_function::<FunctionSpi>(),
        ),
    )
    .init(
        &mut pac.RESETS,
        peripheral_clock,
        config::CAN_BUS.frequency,
        &config::CAN_BUS.mode,
    );
    let bus1: SharedBus<NullMutex<_>> = SharedBus::new(ClockedSpi::new(
        spi1,
        peripheral_clock,
        config::CAN_BUS,
    ));

    let adc = Adc128s022::new(
        SpiDevice::new(&bus0, pins.gpio5.into_push_pull_output(), config::ADC_DEVICE),
        timer,
    );
    let mux = Cd74hc4067::new(
        [
            pins.gpio16.into_push_pull_output().into_dyn_pin(),
            pins.gpio17.into_push_pull_output().into_dyn_pin(),
            pins.gpio18.into_push_pull_output().into_dyn_pin(),
            pins.gpio19.into_push_pull_output().into_dyn_pin(),
        ],
        pins.gpio14.into_push_pull_output(),
    );
    let sampler = Sampler::new(adc, mux, timer, config::MUX_SETTLE_US);

    // The card drives its own chip select (GP1) through a proxy on bus 0.
    let card = SdCard::new(bus0.proxy(config::SD_BUS), pins.gpio1.into_push_pull_output(), timer);
    let log = CsvLog::new(SdVolume::new(card));

    // The MCP2515 module carries its own 8 MHz crystal.
    let mut can = Mcp2515::new(
        SpiDevice::new(&bus1, pins.gpio9.into_push_pull_output(), config::CAN_DEVICE),
        timer,
        config::CAN_TIMING,
    );
    if can.init().is_err() {
        defmt::panic!("MCP2515 bring-up failed");
    }

    let mut stop = StopPin::new(pins.gpio15.into_pull_up_input());
    let mut scheduler = Scheduler::new(
        sampler,
        log,
        can,
        TimerClock(timer),
        timer,
        config::CADENCE,
    );

    match scheduler.run(&mut stop) {
        Ok(summary) => defmt::info!("stopped: {}", summary),
        Err(_) => defmt::error!("CAN link failed, halting"),
    }

    loop {
        cortex_m::asm::wfi();
    }
}
