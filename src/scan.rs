//! Implements the key matrix: drives rows, reads columns, and hands whatever is found pressed to
//! [crate::keyboard] to be turned into reports for [crate::usb].

use crate::config::ROW_SETTLE_MICROS;
use crate::keyboard::{Keyboard, Update};
use crate::keymap::{LayerId, LayerState, ScanCode, COLUMNS, ROWS};
use embassy_rp::{
    gpio::{Input, OutputOpenDrain},
    pwm::{Pwm, SetDutyCycle},
};
use embassy_time::{
    block_for,
    Duration,
    Instant,
};
use heapless::Vec;
use log::warn;

/// How many positions one scan can report; more than this and the matrix is surely ghosting.
const PRESSED_LIMIT: usize = 32;

pub struct Matrix<'a> {
    keyboard: Keyboard,
    pins: Pins<'a>,
}

pub struct Pins<'a> {
    pub scan_led: Pwm<'a>,
    pub status_led: Pwm<'a>,
    pub rows: [OutputOpenDrain<'a>; ROWS],
    pub columns: [Input<'a>; COLUMNS],
}

trait ConvenientPwm {
    fn on(&mut self);
    fn off(&mut self);
    fn pwm_duty_u16(&mut self, duty: u16);
}
impl ConvenientPwm for Pwm<'_> {
    fn on(&mut self) { self.set_duty_cycle_fully_on().expect("pwm"); }
    fn off(&mut self) { self.set_duty_cycle_fully_off().expect("pwm"); }
    fn pwm_duty_u16(&mut self, duty: u16) { self.set_duty_cycle(duty).expect("pwm"); }
}

impl<'a> Matrix<'a> {
    pub fn new(keyboard: Keyboard, pins: Pins<'a>) -> Self {
        Matrix { keyboard, pins }
    }

    fn show_layer(&mut self, layers: LayerState) {
        let led = &mut self.pins.status_led;
        match layers.highest() {
            LayerId::Func => led.on(),
            LayerId::Base => led.off(),
        }
    }

    pub fn scan(&mut self) -> Update {
        let mut pressed: Vec<ScanCode, PRESSED_LIMIT> = Vec::new();
        self.pins.scan_led.pwm_duty_u16(400);
        for (row_idx, row) in self.pins.rows.iter_mut().enumerate() {
            row.set_low();
            block_for(Duration::from_micros(ROW_SETTLE_MICROS));
            for (column_idx, column) in self.pins.columns.iter_mut().enumerate() {
                if column.is_low() {
                    if pressed.push((row_idx as u8, column_idx as u8)).is_err() {
                        warn!("too many keys down at once, ignoring ({}, {})", row_idx, column_idx);
                    }
                    self.pins.scan_led.pwm_duty_u16(30000);
                }
            }
            row.set_high();
            block_for(Duration::from_micros(ROW_SETTLE_MICROS));
        }
        self.pins.scan_led.off();

        let update = self.keyboard.process(pressed, Instant::now().as_millis());
        self.show_layer(update.layers);
        update
    }
}
