//! Turns the set of pressed matrix positions seen by each scan into HID reports: debouncing,
//! layer selection, dual-role keys and the rest of the state related to typing. Uses definitions
//! from [crate::keymap], and directly produces the reports sent out by the USB task.

use crate::config::{Millis, TapHoldConfig, DEBOUNCE_COUNT, DUAL_ROLE_LIMIT, HELD_KEYS_LIMIT};
use crate::keymap::{self, Key, LayerState, ScanCode, Thing};
use crate::tap_hold::TapHold;
use heapless::{Deque, Vec};
use log::{debug, info, warn};
use usbd_hid::descriptor::KeyboardReport;

/// Everything one scan has to say to the host.
pub struct Update {
    pub keyboard: KeyboardReport,
    /// Consumer page usage to report, or 0 for none
    pub media: u16,
    pub layers: LayerState,
    /// Set on the scan where the bootloader key went down
    pub jump_to_bootloader: bool,
}

pub struct Keyboard {
    held_keys: HeldKeys,
    tap_hold: TapHold,
    layers: LayerState,
    /// Taps produced by dual-role keys, sent one per scan in release order
    pending_taps: Deque<Key, DUAL_ROLE_LIMIT>,
    /// Keys which were pressed and released while held back; reported for one scan once nothing is
    /// undecided any more
    queued: Vec<Thing, HELD_KEYS_LIMIT>,
}

impl Keyboard {
    pub fn new(config: TapHoldConfig) -> Self {
        Keyboard {
            held_keys: Default::default(),
            tap_hold: TapHold::new(config),
            layers: Default::default(),
            pending_taps: Deque::new(),
            queued: Vec::new(),
        }
    }

    /// Run one scan cycle, given every position found pressed by the matrix scan at time `now`.
    pub fn process(&mut self, pressed: impl IntoIterator<Item = ScanCode>, now: Millis) -> Update {
        let mut jump_to_bootloader = false;

        for released in self.held_keys.decrement_holds() {
            if released.held_back {
                if self.queued.push(released.mapping).is_err() {
                    warn!("too many queued keys, dropping {:?}", released.mapping);
                }
            } else {
                self.on_release(released.in_scancode, released.mapping, now);
            }
        }

        for code in pressed {
            let mapping = keymap::action_at(self.layers, code);
            if !self.held_keys.record_pressed(code, mapping) {
                continue;
            }
            self.on_press(code, mapping, now, &mut jump_to_bootloader);
            if matches!(mapping, Thing::RealKey(_) | Thing::MediaKey(_)) && self.tap_hold.any_undecided() {
                self.held_keys.hold_back(code);
            }
        }

        self.tap_hold.tick(now);

        // Each tap goes out on its own; anything held back follows on the scan after the last.
        let settled = self.pending_taps.is_empty() && !self.tap_hold.any_undecided();
        if settled {
            self.held_keys.reveal_all();
        }
        let update = Update {
            keyboard: self.build_report(settled),
            media: self.media_usage(settled),
            layers: self.layers,
            jump_to_bootloader,
        };
        if settled {
            self.queued.clear();
        }
        update
    }

    fn on_press(&mut self, code: ScanCode, thing: Thing, now: Millis, jump_to_bootloader: &mut bool) {
        match thing {
            Thing::DualRole { tap, hold } => {
                self.tap_hold.press(code, tap, hold, now);
            },
            Thing::MomentaryLayer(layer) => {
                self.tap_hold.other_key_pressed();
                self.layers.activate(layer);
                debug!("layer {:?} on", layer);
            },
            Thing::Bootloader => {
                self.tap_hold.other_key_pressed();
                info!("bootloader key pressed");
                *jump_to_bootloader = true;
            },
            Thing::RealKey(_) | Thing::MediaKey(_) | Thing::Transparent | Thing::Inactive => {
                self.tap_hold.other_key_pressed();
            },
        }
    }

    fn on_release(&mut self, code: ScanCode, thing: Thing, now: Millis) {
        match thing {
            Thing::DualRole { .. } => {
                if let Some(tap) = self.tap_hold.release(code, now) {
                    if self.pending_taps.push_back(tap).is_err() {
                        warn!("too many taps pending, dropping {:?}", tap);
                    }
                }
            },
            Thing::MomentaryLayer(layer) => {
                self.layers.deactivate(layer);
                debug!("layer {:?} off", layer);
            },
            _ => {},
        }
    }

    fn build_report(&mut self, settled: bool) -> KeyboardReport {
        let mut report = KeyboardReport::default();
        for hold in self.held_keys.iter_visible() {
            match hold.mapping {
                Thing::RealKey(key) => add_key(&mut report, key),
                Thing::DualRole { .. } => {
                    if let Some(key) = self.tap_hold.report_contribution(hold.in_scancode) {
                        add_key(&mut report, key);
                    }
                },
                _ => {},
            }
        }
        if let Some(tap) = self.pending_taps.pop_front() {
            add_key(&mut report, tap);
        }
        if settled {
            for thing in &self.queued {
                if let Thing::RealKey(key) = thing {
                    add_key(&mut report, *key);
                }
            }
        }
        report
    }

    /// The most recently pressed media key still held, or one queued up while held back.
    fn media_usage(&self, settled: bool) -> u16 {
        let queued: &[Thing] = if settled { &self.queued } else { &[] };
        self.held_keys.iter_visible()
            .map(|hold| &hold.mapping)
            .chain(queued)
            .filter_map(|thing| match thing {
                Thing::MediaKey(usage) => Some(*usage),
                _ => None,
            })
            .last()
            .unwrap_or(0)
    }
}

impl Default for Keyboard {
    fn default() -> Self {
        Self::new(TapHoldConfig::DEFAULT)
    }
}

/// Put a key into a 6-key-rollover report. Keys beyond the sixth are dropped, modifiers and all.
fn add_key(report: &mut KeyboardReport, (keycode, mods): Key) {
    if keycode != 0 && !report.keycodes.contains(&keycode) {
        let Some(slot) = report.keycodes.iter_mut().find(|slot| **slot == 0) else {
            warn!("report full, dropping keycode {}", keycode);
            return;
        };
        *slot = keycode;
    }
    report.modifier |= mods;
}

/// An array for tracking the currently-held keys.
/// Invariant: Always consists of active [KeyHold]s in order of when they were pressed, followed by
/// only inactive [KeyHold]s (those whose [KeyHold::debounce_count] has reached 0).
#[derive(Default)]
struct HeldKeys([KeyHold; HELD_KEYS_LIMIT]);

#[derive(Clone, Copy, Default)]
struct KeyHold {
    debounce_count: u8,
    in_scancode: ScanCode,
    /// What the key does, fixed by the layers active when it was pressed
    mapping: Thing,
    /// Left out of reports while a dual-role key is undecided
    held_back: bool,
}

impl HeldKeys {
    /// Returns `true` if this is a new press, rather than a key that was already held.
    fn record_pressed(&mut self, code: ScanCode, mapping: Thing) -> bool {
        for maybe_key in &mut self.0 {
            if maybe_key.debounce_count > 0 {
                if maybe_key.in_scancode == code {
                    maybe_key.debounce_count = DEBOUNCE_COUNT;
                    return false;
                }
            } else {
                *maybe_key = KeyHold {
                    in_scancode: code,
                    mapping,
                    debounce_count: DEBOUNCE_COUNT,
                    held_back: false,
                };
                return true;
            }
        }
        warn!("too many keys held, ignoring {:?}", code);
        false
    }

    fn hold_back(&mut self, code: ScanCode) {
        if let Some(key) = self.iter_mut_active().find(|key| key.in_scancode == code) {
            key.held_back = true;
        }
    }

    fn reveal_all(&mut self) {
        for key in self.iter_mut_active() {
            key.held_back = false;
        }
    }

    fn iter_mut_active(&mut self) -> impl Iterator<Item = &mut KeyHold> {
        self.0.iter_mut().take_while(|key_hold| key_hold.debounce_count > 0)
    }

    fn iter_visible(&self) -> impl Iterator<Item = &KeyHold> {
        self.0.iter().take_while(|key_hold|
            key_hold.debounce_count > 0
        ).filter(|key_hold| !key_hold.held_back)
    }

    /// Count down every held key, returning those which have now been released, in press order.
    fn decrement_holds(&mut self) -> Vec<KeyHold, HELD_KEYS_LIMIT> {
        let mut released = Vec::new();
        'each_position: for key_idx in 0..HELD_KEYS_LIMIT {
            'each_rotation: loop {
                let key = &mut self.0[key_idx];
                if key.debounce_count > 0 {
                    key.debounce_count -= 1;
                    if key.debounce_count == 0 {
                        // can't overflow: at most HELD_KEYS_LIMIT keys are held
                        let _ = released.push(*key);
                        self.0[key_idx..].rotate_left(1);
                            // move to end of array to preserve invariant.
                            // now next key has taken its place at current index, so look again:
                        continue 'each_rotation;
                    } else {
                        continue 'each_position;
                    }
                } else {
                    break 'each_position;
                }
            }
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keymap::LayerId;
    use crate::rmk::keycode::{ConsumerKey, KeyCode};

    const A: ScanCode = (2, 1);
    const Y: ScanCode = (1, 8);
    const S: ScanCode = (2, 2);
    const Q: ScanCode = (1, 1);
    const FUNC: ScanCode = (2, 0);
    const LSPO: ScanCode = (4, 4);
    const RSPC: ScanCode = (4, 9);
    const PLUS: ScanCode = (0, 7);
    const BOOT: ScanCode = (4, 0);

    const NOTHING: [ScanCode; 0] = [];

    const SHIFT: u8 = 0x02;

    fn code(kc: KeyCode) -> u8 {
        kc as u8
    }

    fn keys(update: &Update) -> [u8; 6] {
        update.keyboard.keycodes
    }

    /// Scans with nothing pressed until every key has been released, returning the last update.
    fn release_all(keyboard: &mut Keyboard, now: &mut Millis) -> Update {
        let mut update = keyboard.process(NOTHING, *now);
        for _ in 1..DEBOUNCE_COUNT {
            *now += 1;
            update = keyboard.process(NOTHING, *now);
        }
        update
    }

    #[test]
    fn plain_key_press_and_release() {
        let mut keyboard = Keyboard::default();
        let mut now = 0;
        let update = keyboard.process([A], now);
        assert_eq!(keys(&update), [code(KeyCode::A), 0, 0, 0, 0, 0]);
        assert_eq!(update.keyboard.modifier, 0);

        now += 1;
        let update = keyboard.process(NOTHING, now);
        assert_eq!(keys(&update)[0], code(KeyCode::A), "debounce keeps the key held");

        let update = release_all(&mut keyboard, &mut now);
        assert_eq!(keys(&update), [0; 6]);
    }

    #[test]
    fn key_is_held_as_long_as_it_is_seen() {
        let mut keyboard = Keyboard::default();
        for now in 0..20 {
            let update = keyboard.process([A], now);
            assert_eq!(keys(&update)[0], code(KeyCode::A));
        }
    }

    #[test]
    fn shifted_key() {
        let mut keyboard = Keyboard::default();
        let update = keyboard.process([PLUS], 0);
        assert_eq!(keys(&update)[0], code(KeyCode::Equal));
        assert_eq!(update.keyboard.modifier, SHIFT);
    }

    #[test]
    fn press_order_is_kept() {
        let mut keyboard = Keyboard::default();
        keyboard.process([S], 0);
        let update = keyboard.process([S, A], 1);
        assert_eq!(keys(&update), [code(KeyCode::S), code(KeyCode::A), 0, 0, 0, 0]);
    }

    #[test]
    fn momentary_layer() {
        let mut keyboard = Keyboard::default();
        let mut now = 0;
        let update = keyboard.process([FUNC], now);
        assert_eq!(update.layers.highest(), LayerId::Func);
        assert_eq!(keys(&update), [0; 6]);

        now += 1;
        let update = keyboard.process([FUNC, Q], now);
        assert_eq!(update.media, ConsumerKey::VolumeIncrement as u16);
        assert_eq!(keys(&update), [0; 6]);

        let update = release_all(&mut keyboard, &mut now);
        assert_eq!(update.media, 0);
        assert_eq!(update.layers.highest(), LayerId::Base);
        assert_eq!(update.layers, LayerState::default());
    }

    #[test]
    fn transparent_key_on_function_layer() {
        let mut keyboard = Keyboard::default();
        keyboard.process([FUNC], 0);
        let update = keyboard.process([FUNC, Y], 1);
        assert_eq!(keys(&update)[0], code(KeyCode::Y));
    }

    #[test]
    fn key_keeps_its_meaning_from_when_it_was_pressed() {
        let mut keyboard = Keyboard::default();
        keyboard.process([Q], 0);
        let update = keyboard.process([Q, FUNC], 1);
        assert_eq!(keys(&update)[0], code(KeyCode::Q));
        assert_eq!(update.media, 0);
    }

    #[test]
    fn bootloader_key_fires_once() {
        let mut keyboard = Keyboard::default();
        let update = keyboard.process([BOOT], 0);
        assert!(!update.jump_to_bootloader, "left control without the function layer");
        release_all(&mut keyboard, &mut 1);

        keyboard.process([FUNC], 10);
        let update = keyboard.process([FUNC, BOOT], 11);
        assert!(update.jump_to_bootloader);
        let update = keyboard.process([FUNC, BOOT], 12);
        assert!(!update.jump_to_bootloader);
    }

    #[test]
    fn six_key_rollover() {
        let mut keyboard = Keyboard::default();
        let pressed: [ScanCode; 7] = [(1, 1), (1, 2), (1, 3), (1, 4), (1, 5), (1, 8), (1, 9)];
        let update = keyboard.process(pressed, 0);
        assert_eq!(keys(&update), [
            code(KeyCode::Q), code(KeyCode::W), code(KeyCode::E),
            code(KeyCode::R), code(KeyCode::T), code(KeyCode::Y),
        ]);
    }

    #[test]
    fn same_keycode_twice_is_reported_once() {
        let mut keyboard = Keyboard::default();
        let update = keyboard.process([(3, 6), (3, 10)], 0);
        assert_eq!(keys(&update), [code(KeyCode::Comma), 0, 0, 0, 0, 0]);
    }

    #[test]
    fn space_cadet_tap() {
        let mut keyboard = Keyboard::default();
        let mut now = 0;
        let update = keyboard.process([LSPO], now);
        assert_eq!(keys(&update), [0; 6]);
        assert_eq!(update.keyboard.modifier, 0);

        now += 10;
        let update = release_all(&mut keyboard, &mut now);
        assert_eq!(keys(&update)[0], code(KeyCode::Kc9));
        assert_eq!(update.keyboard.modifier, SHIFT);

        now += 1;
        let update = keyboard.process(NOTHING, now);
        assert_eq!(keys(&update), [0; 6]);
        assert_eq!(update.keyboard.modifier, 0);
    }

    #[test]
    fn space_cadet_hold_after_tapping_term() {
        let mut keyboard = Keyboard::default();
        keyboard.process([LSPO], 0);
        let update = keyboard.process([LSPO], 199);
        assert_eq!(update.keyboard.modifier, 0);
        let update = keyboard.process([LSPO], 200);
        assert_eq!(update.keyboard.modifier, SHIFT);
        assert_eq!(keys(&update), [0; 6]);

        let update = release_all(&mut keyboard, &mut 300);
        assert_eq!(update.keyboard.modifier, 0);
        assert_eq!(keys(&update), [0; 6], "a hold never types the tap key");
    }

    #[test]
    fn space_cadet_hold_on_other_key_press() {
        let mut keyboard = Keyboard::default();
        keyboard.process([LSPO], 0);
        let update = keyboard.process([LSPO, A], 10);
        assert_eq!(update.keyboard.modifier, SHIFT);
        assert_eq!(keys(&update), [code(KeyCode::A), 0, 0, 0, 0, 0]);

        let update = release_all(&mut keyboard, &mut 20);
        assert_eq!(update.keyboard.modifier, 0);
        assert_eq!(keys(&update), [0; 6]);
    }

    #[test]
    fn without_hold_on_other_key_press_a_quick_roll_taps() {
        let mut keyboard = Keyboard::new(TapHoldConfig { hold_on_other_key_press: false, ..TapHoldConfig::DEFAULT });
        let mut now = 0;
        keyboard.process([LSPO], now);
        now += 10;
        let update = keyboard.process([LSPO, A], now);
        assert_eq!(keys(&update), [0; 6], "A waits for the dual-role key to be decided");
        assert_eq!(update.keyboard.modifier, 0);

        now += 1;
        let update = release_all(&mut keyboard, &mut now);
        assert_eq!(keys(&update), [code(KeyCode::Kc9), 0, 0, 0, 0, 0]);
        assert_eq!(update.keyboard.modifier, SHIFT);

        now += 1;
        let update = keyboard.process(NOTHING, now);
        assert_eq!(keys(&update), [code(KeyCode::A), 0, 0, 0, 0, 0]);
        assert_eq!(update.keyboard.modifier, 0);

        now += 1;
        let update = keyboard.process(NOTHING, now);
        assert_eq!(keys(&update), [0; 6]);
    }

    #[test]
    fn without_hold_on_other_key_press_held_back_keys_follow_a_tap() {
        let mut keyboard = Keyboard::new(TapHoldConfig { hold_on_other_key_press: false, ..TapHoldConfig::DEFAULT });
        keyboard.process([LSPO], 0);
        keyboard.process([LSPO, A], 10);
        // dual-role key goes up, A is still down
        let mut now = 11;
        let mut update = keyboard.process([A], now);
        while update.keyboard.modifier == 0 {
            now += 1;
            update = keyboard.process([A], now);
        }
        assert_eq!(keys(&update), [code(KeyCode::Kc9), 0, 0, 0, 0, 0]);

        now += 1;
        let update = keyboard.process([A], now);
        assert_eq!(keys(&update), [code(KeyCode::A), 0, 0, 0, 0, 0]);
        assert_eq!(update.keyboard.modifier, 0);
    }

    #[test]
    fn without_hold_on_other_key_press_timeout_holds() {
        let mut keyboard = Keyboard::new(TapHoldConfig { hold_on_other_key_press: false, ..TapHoldConfig::DEFAULT });
        keyboard.process([LSPO], 0);
        let update = keyboard.process([LSPO, A], 10);
        assert_eq!(keys(&update), [0; 6]);
        let update = keyboard.process([LSPO, A], 200);
        assert_eq!(update.keyboard.modifier, SHIFT);
        assert_eq!(keys(&update), [code(KeyCode::A), 0, 0, 0, 0, 0]);
    }

    #[test]
    fn tap_then_hold_with_force_hold() {
        let mut keyboard = Keyboard::default();
        let mut now = 0;
        keyboard.process([LSPO], now);
        now += 10;
        release_all(&mut keyboard, &mut now);
        now += 1;
        let update = keyboard.process([LSPO], now);
        assert_eq!(keys(&update), [0; 6], "second press is undecided again");
        assert_eq!(update.keyboard.modifier, 0);
        let update = keyboard.process([LSPO], now + 200);
        assert_eq!(update.keyboard.modifier, SHIFT);
        assert_eq!(keys(&update), [0; 6]);
    }

    #[test]
    fn tap_then_hold_without_force_hold_repeats() {
        let mut keyboard = Keyboard::new(TapHoldConfig { tapping_force_hold: false, ..TapHoldConfig::DEFAULT });
        let mut now = 0;
        keyboard.process([LSPO], now);
        now += 10;
        release_all(&mut keyboard, &mut now);
        now += 1;
        keyboard.process(NOTHING, now);
        now += 1;
        let update = keyboard.process([LSPO], now);
        assert_eq!(keys(&update)[0], code(KeyCode::Kc9));
        assert_eq!(update.keyboard.modifier, SHIFT);
        let update = keyboard.process([LSPO], now + 500);
        assert_eq!(keys(&update)[0], code(KeyCode::Kc9));
    }

    #[test]
    fn held_keys_invariant_survives_out_of_order_releases() {
        let mut held_keys = HeldKeys::default();
        assert!(held_keys.record_pressed(A, Thing::Inactive));
        assert!(held_keys.record_pressed(S, Thing::Inactive));
        assert!(held_keys.record_pressed(Q, Thing::Inactive));
        assert!(!held_keys.record_pressed(S, Thing::Inactive));

        // keep only S pressed
        for _ in 0..DEBOUNCE_COUNT - 1 {
            assert!(held_keys.decrement_holds().is_empty());
            held_keys.record_pressed(S, Thing::Inactive);
        }
        let released = held_keys.decrement_holds();
        let released: std::vec::Vec<ScanCode> = released.iter().map(|k| k.in_scancode).collect();
        assert_eq!(released, [A, Q]);
        let remaining: std::vec::Vec<ScanCode> = held_keys.iter_visible().map(|k| k.in_scancode).collect();
        assert_eq!(remaining, [S]);
    }

    #[test]
    fn too_many_held_keys_are_ignored() {
        let mut held_keys = HeldKeys::default();
        for column in 0..HELD_KEYS_LIMIT as u8 {
            assert!(held_keys.record_pressed((0, column), Thing::Inactive));
        }
        assert!(!held_keys.record_pressed((5, 0), Thing::Inactive));
        assert_eq!(held_keys.iter_visible().count(), HELD_KEYS_LIMIT);
    }

    #[test]
    fn shifted_key_beyond_six_does_not_shift_the_others() {
        let mut keyboard = Keyboard::default();
        let letters: [ScanCode; 6] = [(1, 1), (1, 2), (1, 3), (1, 4), (1, 5), (1, 8)];
        keyboard.process(letters, 0);
        let update = keyboard.process(letters.into_iter().chain([PLUS]), 1);
        assert_eq!(keys(&update), [
            code(KeyCode::Q), code(KeyCode::W), code(KeyCode::E),
            code(KeyCode::R), code(KeyCode::T), code(KeyCode::Y),
        ]);
        assert_eq!(update.keyboard.modifier, 0);
    }

    #[test]
    fn modifier_key_still_applies_to_a_full_report() {
        let mut keyboard = Keyboard::default();
        let letters: [ScanCode; 6] = [(1, 1), (1, 2), (1, 3), (1, 4), (1, 5), (1, 8)];
        keyboard.process(letters, 0);
        // left control
        let update = keyboard.process(letters.into_iter().chain([BOOT]), 1);
        assert_eq!(update.keyboard.modifier, 0x01);
    }

    #[test]
    fn two_taps_released_together_are_both_sent_in_order() {
        let mut keyboard = Keyboard::new(TapHoldConfig { hold_on_other_key_press: false, ..TapHoldConfig::DEFAULT });
        let mut now = 0;
        keyboard.process([LSPO, RSPC], now);
        now += 10;
        let update = release_all(&mut keyboard, &mut now);
        assert_eq!(keys(&update), [code(KeyCode::Kc9), 0, 0, 0, 0, 0]);
        assert_eq!(update.keyboard.modifier, SHIFT);

        now += 1;
        let update = keyboard.process(NOTHING, now);
        assert_eq!(keys(&update), [code(KeyCode::Kc0), 0, 0, 0, 0, 0]);
        assert_eq!(update.keyboard.modifier, 0x20);

        now += 1;
        let update = keyboard.process(NOTHING, now);
        assert_eq!(keys(&update), [0; 6]);
        assert_eq!(update.keyboard.modifier, 0);
    }
}
