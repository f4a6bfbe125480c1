//! MIDI2USB is [Embassy](https://embassy.dev)-based firmware for a USB MIDI interface: it connects a classic 5-pin
//! serial MIDI port to a USB host, which sees a class-compliant MIDI device with one input and one output. The
//! firmware runs on the [Nucleo-F767ZI development
//! board](https://www.st.com/en/evaluation-tools/nucleo-f767zi.html).
//!
//! Serial bytes are parsed into USB-MIDI event packets as they arrive and sent to the host on the bulk IN
//! endpoint; packets from the host are unpacked back into a serial byte stream. The USB device stack and both
//! parsers live in `midi2usb_lib`; this crate wires them to the OTG-FS core, USART2 and the board LEDs.
//!
//! For details about the hardware or how to use the device, see the `README`.

#![no_std]
#![no_main]

mod otg;

use crate::otg::OtgFs;
#[cfg(feature = "defmt")]
use defmt::*;
use embassy_executor::Spawner;
use embassy_futures::yield_now;
use embassy_stm32::{
    Config, bind_interrupts,
    gpio::{Level, Output, Speed},
    peripherals,
    time::Hertz,
    usart::{self, BufferedUart, BufferedUartRx},
};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, signal::Signal};
use embassy_time::Timer;
use embedded_io_async::{Read, Write};
use midi2usb_lib::{
    configuration::{INBOUND_CAPACITY, MidiConfig, UsbConfig},
    descriptors::MIDI2USB,
    handoff::Bridge,
    midi::{SerialToUsb, UsbToSerial},
};
use static_cell::StaticCell;
use tinyvec::ArrayVec;

#[cfg(feature = "defmt-rtt")]
use defmt_rtt as _;
#[cfg(not(feature = "panic-probe"))]
use panic_halt as _;
#[cfg(feature = "panic-probe")]
use panic_probe as _;

bind_interrupts!(
    #[doc(hidden)]
    struct Irqs {
        OTG_FS => otg::InterruptHandler;
        USART2 => usart::BufferedInterruptHandler<peripherals::USART2>;
    }
);

/// Serial MIDI runs at 31.25 kbaud, 8-N-1.
const MIDI_BAUD_RATE: u32 = 31_250;

/// Everything shared between the USB interrupt and the tasks below.
static BRIDGE: Bridge<OtgFs> = Bridge::new(OtgFs::new(), UsbConfig::new(), &MIDI2USB);

type Activity = Signal<CriticalSectionRawMutex, ()>;

/// A byte arrived on the serial port.
static SERIAL_ACTIVITY: Activity = Signal::new();
/// A packet arrived from the host.
static USB_ACTIVITY: Activity = Signal::new();
/// A serial message was dropped because the host is not collecting them.
static DROPPED: Activity = Signal::new();

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    #[cfg(feature = "defmt")]
    info!("Initializing MIDI2USB");

    let mut config = Config::default();
    {
        use embassy_stm32::rcc::*;
        // hse: high-speed external clock
        config.rcc.hse = Some(Hse {
            freq: Hertz(8_000_000),
            mode: HseMode::Bypass,
        });

        config.rcc.pll_src = PllSource::HSE;
        config.rcc.pll = Some(Pll {
            prediv: PllPreDiv::DIV4,
            mul: PllMul::MUL216,
            divp: Some(PllPDiv::DIV2), // 8mhz / 4 * 216 / 2 = 216Mhz
            // USB OTG FS needs its 48MHz from the main PLL's Q output (RM0410, section 5.2)
            divq: Some(PllQDiv::DIV9), // 8mhz / 4 * 216 / 9 = 48Mhz
            divr: None,
        });
        config.rcc.ahb_pre = AHBPrescaler::DIV1;
        config.rcc.apb1_pre = APBPrescaler::DIV4;
        config.rcc.apb2_pre = APBPrescaler::DIV2;
        config.rcc.sys = Sysclk::PLL1_P;
        config.rcc.mux.clk48sel = mux::Clk48sel::PLL1_Q;
    }
    let p = embassy_stm32::init(config);

    spawner
        .spawn(activity_led(Output::new(p.PB0, Level::Low, Speed::Low), &SERIAL_ACTIVITY))
        .expect("LED task pool should have room for the green LED");
    spawner
        .spawn(activity_led(Output::new(p.PB7, Level::Low, Speed::Low), &USB_ACTIVITY))
        .expect("LED task pool should have room for the blue LED");
    spawner
        .spawn(activity_led(Output::new(p.PB14, Level::Low, Speed::Low), &DROPPED))
        .expect("LED task pool should have room for the red LED");

    static TX_BUFFER: StaticCell<[u8; 64]> = StaticCell::new();
    static RX_BUFFER: StaticCell<[u8; 64]> = StaticCell::new();
    let mut uart_config = usart::Config::default();
    uart_config.baudrate = MIDI_BAUD_RATE;
    let uart = BufferedUart::new(
        p.USART2,
        p.PD6,
        p.PD5,
        TX_BUFFER.init([0; 64]),
        RX_BUFFER.init([0; 64]),
        Irqs,
        uart_config,
    )
    .expect("USART2 should accept the MIDI baud rate");
    let (mut tx, rx) = uart.split();

    spawner
        .spawn(serial_rx_task(rx))
        .expect("Serial receive task should only be spawned once");

    otg::init(p.USB_OTG_FS, p.PA11, p.PA12);

    // the foreground poll loop: hand queued messages to the host, and packets from the host to the serial port
    let mut parser = UsbToSerial::new();
    let mut serial: ArrayVec<[u8; INBOUND_CAPACITY]> = ArrayVec::new();
    loop {
        if let Err(_error) = BRIDGE.transmit() {
            #[cfg(feature = "defmt")]
            warn!("Bulk IN transfer refused: {}", _error);
        }

        // a packet never unpacks into more serial bytes than it holds
        let received = BRIDGE.drain(&mut parser, |byte| {
            if serial.try_push(byte).is_some() {
                #[cfg(feature = "defmt")]
                warn!("Serial transmit buffer full, dropped {=u8:#x}", byte);
                DROPPED.signal(());
            }
        });
        if received > 0 {
            USB_ACTIVITY.signal(());
        }
        if !serial.is_empty() {
            if let Err(_error) = tx.write_all(&serial).await {
                #[cfg(feature = "defmt")]
                warn!("Serial transmit failed: {}", _error);
            }
            serial.clear();
        }

        yield_now().await;
    }
}

/// Feeds received serial bytes to the bridge.
#[embassy_executor::task]
async fn serial_rx_task(mut rx: BufferedUartRx<'static>) -> ! {
    let mut parser = SerialToUsb::new(MidiConfig::new());
    let mut buf = [0; 16];
    loop {
        let count = match rx.read(&mut buf).await {
            Ok(count) => count,
            Err(_error) => {
                // framing and overrun errors lose bytes; the parser resynchronizes on the next status byte
                #[cfg(feature = "defmt")]
                warn!("Serial receive error: {}", _error);
                continue;
            }
        };

        SERIAL_ACTIVITY.signal(());
        for byte in &buf[..count] {
            if BRIDGE.on_serial_byte(&mut parser, *byte).is_err() {
                DROPPED.signal(());
            }
        }
    }
}

/// Flashes an LED whenever `activity` is signaled.
#[embassy_executor::task(pool_size = 3)]
async fn activity_led(mut led: Output<'static>, activity: &'static Activity) -> ! {
    const FLASH_MS: u64 = 20;

    loop {
        activity.wait().await;
        led.set_high();
        Timer::after_millis(FLASH_MS).await;
        led.set_low();
    }
}
