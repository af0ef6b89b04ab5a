//! Firmware for a hand-wired split ergonomic keyboard (ErgoDox-style, 76 keys) driven by a single
//! Raspberry Pi Pico, using the [embassy_rp] framework.

#![no_main]
#![no_std]

mod config;
mod keyboard;
mod keymap;
mod scan;
mod tap_hold;
mod usb;

/// Useful constants (such as keycodes) extracted from the otherwise-unrelated [rmk](https://github.com/HaoboGu/rmk/) project.
mod rmk;

use embassy_executor::Spawner;
use embassy_rp::{
    gpio::{Input, OutputOpenDrain, Level, Pull},
    pwm::Pwm,
};
use embassy_sync::channel::Channel;
use embassy_time::Timer;
use log::info;

use panic_reset as _;

macro_rules! row_pins {
    ($dev:ident; $($pin:ident),*) => {[ $(OutputOpenDrain::new($dev.$pin, Level::High)),* ]}
}
macro_rules! column_pins {
    ($dev:ident; $($pin:ident),*) => {[ $(Input::new($dev.$pin, Pull::Up)),* ]}
}

/// Channel for [scan] to send keyboard updates to [usb], and ultimately to the host.
pub(crate) static UPDATES_CHANNEL: Channel<RawMutex, Update, 1> = Channel::new();
type RawMutex = embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;
type Update = (usbd_hid::descriptor::KeyboardReport, u16);

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let p = embassy_rp::init(Default::default());

    let led_pin_onboard = Pwm::new_output_b(p.PWM_SLICE4, p.PIN_25, Default::default());
    let led_pin_front = Pwm::new_output_a(p.PWM_SLICE3, p.PIN_22, Default::default());

    // Rows 0-4 are the main rows, row 5 both thumb clusters.
    let row_pins: [OutputOpenDrain; keymap::ROWS] = row_pins!(p;
        PIN_0, PIN_1, PIN_2, PIN_3, PIN_4, PIN_5
    );
    // Left hand outer to inner, then right hand inner to outer.
    let mut column_pins: [Input; keymap::COLUMNS] = column_pins!(p;
        PIN_6, PIN_7, PIN_8, PIN_9, PIN_10, PIN_11, PIN_12,
        PIN_13, PIN_14, PIN_15, PIN_16, PIN_17, PIN_18, PIN_19
    );
    for pin in &mut column_pins {
        pin.set_schmitt(true);
    }

    let usb_driver = embassy_rp::usb::Driver::new(p.USB, usb::Irqs);
    let (usb_device, classes) = usb::get_device(usb_driver);
    spawner.spawn(usb::run(usb_device, classes)).expect("spawn usb");

    let matrix = scan::Matrix::new(
        keyboard::Keyboard::new(config::TapHoldConfig::DEFAULT),
        scan::Pins {
            scan_led: led_pin_onboard,
            status_led: led_pin_front,
            rows: row_pins,
            columns: column_pins,
        },
    );
    spawner.spawn(run_matrix(matrix)).expect("spawn matrix");
}

#[embassy_executor::task]
async fn run_matrix(mut matrix: scan::Matrix<'static>) {
    loop {
        let update = matrix.scan();
        if update.jump_to_bootloader {
            jump_to_bootloader().await;
        }
        UPDATES_CHANNEL.send((update.keyboard, update.media)).await;
    }
}

/// Reboot into the RP2040 ROM's USB mass storage bootloader, ready for new firmware.
async fn jump_to_bootloader() {
    info!("Rebooting to bootloader");
    // let the log line and the final key reports drain out over USB first
    UPDATES_CHANNEL.send((usbd_hid::descriptor::KeyboardReport::default(), 0)).await;
    Timer::after_millis(50).await;
    embassy_rp::rom_data::reset_to_usb_boot(0, 0);
}
