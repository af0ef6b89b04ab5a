//! Defines key functions (here called [Thing]s) and the two layers of mapping from physical keys
//! to these [Thing]s.
//!
//! Intimately related to [crate::keyboard], which uses these definitions to interpret physical key
//! presses found by the matrix scan.

use crate::rmk::keycode::ConsumerKey;
use crate::rmk::keycode::KeyCode;
use crate::rmk::keycode::KeyCode::*;

pub type HidKeyCode = u8;
pub type Modifiers = u8;
pub type Key = (HidKeyCode, Modifiers);

/// Used to uniquely identify each physical key which can be pressed: `(row, column)`.
pub type ScanCode = (u8, u8);

/// A Thing which a keypress should Do
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Thing {
    RealKey(Key),
    /// A consumer page usage, such as volume up
    MediaKey(u16),
    /// Activates a layer for as long as the key is held
    MomentaryLayer(LayerId),
    /// Types `tap` when tapped, holds the `hold` modifiers when held
    DualRole { tap: Key, hold: Modifiers },
    /// Reboots into the RP2040 USB bootloader
    Bootloader,
    /// Does whatever the next active layer down does
    Transparent,
    #[default]
    Inactive,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LayerId {
    Base = 0,
    Func = 1,
}

pub const LAYER_COUNT: usize = 2;

/// How many physical rows there are
pub const ROWS: usize = 6;
/// How many physical columns there are; the left hand has 0..7 and the right 7..14
pub const COLUMNS: usize = 14;

/// Array of [Thing]s that a row of keys do
pub type Row = [Thing; COLUMNS];
/// 2D Array of [Thing]s that the whole set of keys do
pub type Layer = [Row; ROWS];

/// Which layers are switched on. [LayerId::Base] is always on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LayerState(u8);

impl LayerState {
    pub const fn is_active(self, layer: LayerId) -> bool {
        matches!(layer, LayerId::Base) || self.0 & (1 << layer as u8) != 0
    }

    pub fn activate(&mut self, layer: LayerId) {
        self.0 |= 1 << layer as u8;
    }

    pub fn deactivate(&mut self, layer: LayerId) {
        self.0 &= !(1 << layer as u8);
    }

    /// The topmost active layer
    pub fn highest(self) -> LayerId {
        if self.is_active(LayerId::Func) { LayerId::Func } else { LayerId::Base }
    }
}

/// Maps a modifier [KeyCode] to the equivalent flag bit for the USB HID modifier byte, or returns
/// 0 for any non-modifier [KeyCode].
pub const fn modifier_key_bit_repr(code: KeyCode) -> u8 {
    match code {
        LCtrl => 0x01,
        LShift => 0x02,
        LAlt => 0x04,
        LGui => 0x08,
        RCtrl => 0x10,
        RShift => 0x20,
        RAlt => 0x40,
        RGui => 0x80,
        _ => 0,
    }
}

/// Translate a [KeyCode] into a valid [Key]
const fn key(k: KeyCode) -> Key {
    if k.is_modifier() {
        return (0, modifier_key_bit_repr(k));
    }

    let k = k as u16;
    assert!(k > 0 && k <= 255);
    (k as u8, 0)
}

/// Translate a [KeyCode] into a valid [Thing]
const fn k(kc: KeyCode) -> Thing {
    Thing::RealKey(key(kc))
}

/// Translate a [KeyCode] into a valid [Thing], that also holds left-shift while typing that keycode
const fn shift(kc: KeyCode) -> Thing {
    let (code, mods) = key(kc);
    Thing::RealKey((code, mods | modifier_key_bit_repr(LShift)))
}

const fn media(ck: ConsumerKey) -> Thing {
    Thing::MediaKey(ck as u16)
}

const fn mo(layer: LayerId) -> Thing {
    Thing::MomentaryLayer(layer)
}

/// "Space cadet" shift: holding it is `shift_key`, tapping it types `tapped` shifted by the same
/// modifier (so `(` or `)` for 9 and 0).
const fn space_cadet(shift_key: KeyCode, tapped: KeyCode) -> Thing {
    let hold = modifier_key_bit_repr(shift_key);
    assert!(hold != 0);
    let (code, mods) = key(tapped);
    Thing::DualRole { tap: (code, mods | hold), hold }
}

const XXX: Thing = Thing::Inactive;
const ___: Thing = Thing::Transparent;
const BOOT: Thing = Thing::Bootloader;
const LSPO: Thing = space_cadet(LShift, Kc9);
const RSPC: Thing = space_cadet(RShift, Kc0);
const PLUS: Thing = shift(Equal);

/// Number of physical keys on the board
pub const PRETTY_KEYS: usize = 76;

/// Matrix position of each key, in the order keys are written in a "pretty" layout: left and right
/// halves side by side, row by row, followed by the thumb clusters top to bottom.
const PRETTY_POSITIONS: [ScanCode; PRETTY_KEYS] = [
    (0, 0), (0, 1), (0, 2), (0, 3), (0, 4), (0, 5), (0, 6),     (0, 7), (0, 8), (0, 9), (0, 10), (0, 11), (0, 12), (0, 13),
    (1, 0), (1, 1), (1, 2), (1, 3), (1, 4), (1, 5), (1, 6),     (1, 7), (1, 8), (1, 9), (1, 10), (1, 11), (1, 12), (1, 13),
    (2, 0), (2, 1), (2, 2), (2, 3), (2, 4), (2, 5),                     (2, 8), (2, 9), (2, 10), (2, 11), (2, 12), (2, 13),
    (3, 0), (3, 1), (3, 2), (3, 3), (3, 4), (3, 5), (3, 6),     (3, 7), (3, 8), (3, 9), (3, 10), (3, 11), (3, 12), (3, 13),
    (4, 0), (4, 1), (4, 2), (4, 3), (4, 4),                                     (4, 9), (4, 10), (4, 11), (4, 12), (4, 13),
                                            (5, 5), (5, 6),     (5, 7), (5, 8),
                                                    (5, 4),     (5, 9),
                                    (5, 3), (5, 2), (5, 1),     (5, 12), (5, 11), (5, 10),
];

/// Lay out keys written in "pretty" order (see [PRETTY_POSITIONS]) into a matrix [Layer].
/// Matrix positions with no physical key behind them are [Thing::Inactive].
pub const fn ergodox_pretty(keys: [Thing; PRETTY_KEYS]) -> Layer {
    let mut layer = [[Thing::Inactive; COLUMNS]; ROWS];
    let mut i = 0;
    while i < PRETTY_KEYS {
        let (row, column) = PRETTY_POSITIONS[i];
        layer[row as usize][column as usize] = keys[i];
        i += 1;
    }
    layer
}

/* Basic layer
 *
 * ,--------------------------------------------------.           ,--------------------------------------------------.
 * |   `    |   1  |   2  |   3  |   4  |   5  |  -   |           |  +   |   6  |   7  |   8  |   9  |   0  |        |
 * |--------+------+------+------+------+-------------|           |------+------+------+------+------+------+--------|
 * | Tab    |   Q  |   W  |   E  |   R  |   T  |  [   |           |   ]  |   Y  |   U  |   I  |   O  |   P  |   \    |
 * |--------+------+------+------+------+------|      |           |      |------+------+------+------+------+--------|
 * | MO(1)  |   A  |   S  |   D  |   F  |   G  |------|           |------|   H  |   J  |   K  |   L  |   ;  |   '    |
 * |--------+------+------+------+------+------|  ,   |           |  .   |------+------+------+------+------+--------|
 * |        |   Z  |   X  |   C  |   V  |   B  |      |           |      |   N  |   M  |   ,  |   .  |      |   /    |
 * `--------+------+------+------+------+-------------'           `-------------+------+------+------+------+--------'
 *   | Ctrl |  Alt |      | LGui | LSft(|                                       |RSft)| Ctrl |      |  Alt | Ctrl |
 *   `----------------------------------'                                       `----------------------------------'
 *                                        ,-------------.       ,--------------.
 *                                        | BSpc | Del  |       | Del  |  BSpc |
 *                                 ,------|------|------|       |------+--------+------.
 *                                 |      |      |      |       |      |        |      |
 *                                 | Space|Enter |------|       |------| Enter  |Space |
 *                                 |      |      | Alt  |       | Ctrl |        |      |
 *                                 `--------------------'       `----------------------'
 */
pub const LAYER_BASE: Layer = ergodox_pretty([
    // left hand                                                       // right hand
    k(Grave),  k(Kc1),  k(Kc2), k(Kc3),  k(Kc4), k(Kc5), k(Minus),         PLUS,            k(Kc6),  k(Kc7),   k(Kc8),   k(Kc9),       k(Kc0),   XXX,
    k(Tab),    k(Q),    k(W),   k(E),    k(R),   k(T),   k(LeftBracket),   k(RightBracket), k(Y),    k(U),     k(I),     k(O),         k(P),     k(Backslash),
    mo(LayerId::Func), k(A), k(S), k(D), k(F),   k(G),                                      k(H),    k(J),     k(K),     k(L),         k(Semicolon), k(Quote),
    XXX,       k(Z),    k(X),   k(C),    k(V),   k(B),   k(Comma),         k(Dot),          k(N),    k(M),     k(Comma), k(Dot),       XXX,      k(Slash),
    k(LCtrl),  k(LAlt), XXX,    k(LGui), LSPO,                                                       RSPC,     k(RCtrl), XXX,          k(RAlt),  k(RCtrl),

                                              k(Backspace), k(Delete),     k(Delete), k(Backspace),
                                                            XXX,           XXX,
                                   k(Space),  k(Enter),     k(LAlt),       k(RCtrl),  k(Enter),     k(Space),
]);

/* Function layer
 *
 * ,---------------------------------------------------.           ,--------------------------------------------------.
 * | Escape  |  F1  |  F2  |  F3  |  F4  |  F5  |      |           |      |  F6  |  F7  |  F8  |  F9  |  F10 |   F11  |
 * |---------+------+------+------+------+------+------|           |------+------+------+------+------+------+--------|
 * |         | Vol+ | Mute | NTrk | Brt+ |      |      |           |      |      |      |      |      |PrtSc |   F12  |
 * |---------+------+------+------+------+------|      |           |      |------+------+------+------+------+--------|
 * |  TRANS  | Vol- | Play | PTrk | Brt- |      |------|           |------| Left | Down |  Up  | Right|      |        |
 * |---------+------+------+------+------+------|      |           |      |------+------+------+------+------+--------|
 * |         |      |      |      |      |      |      |           |      |      | PgDwn| PgUp |      |      |        |
 * `---------+------+------+------+------+-------------'           `-------------+------+------+------+------+--------'
 *   | Boot  |      |      |      |      |                                       |      |      |      |      |      |
 *   `-----------------------------------'                                       `----------------------------------'
 *                                        ,-------------.       ,-------------.
 *                                        |      |      |       |      |      |
 *                                 ,------|------|------|       |------+------+------.
 *                                 |      |      |      |       |      |      |      |
 *                                 | BkSp | Del  |------|       |------| Del  | BkSp |
 *                                 |      |      |      |       |      |      |      |
 *                                 `--------------------'       `--------------------'
 */
pub const LAYER_FUNC: Layer = ergodox_pretty([
    // left hand                                                                                    // right hand
    k(Escape), k(F1),                             k(F2),                           k(F3),                          k(F4),                              k(F5), ___,     ___, k(F6),   k(F7),    k(F8),     k(F9),     k(F10),         k(F11),
    ___,       media(ConsumerKey::VolumeIncrement), media(ConsumerKey::Mute),      media(ConsumerKey::NextTrack),  media(ConsumerKey::BrightnessUp),   ___,   ___,     ___, ___,     ___,      ___,       ___,       k(PrintScreen), k(F12),
    ___,       media(ConsumerKey::VolumeDecrement), media(ConsumerKey::PlayPause), media(ConsumerKey::PrevTrack),  media(ConsumerKey::BrightnessDown), ___,                 k(Left), k(Down),  k(Up),     k(Right),  ___,            ___,
    ___,       ___,                               ___,                             ___,                            ___,                                ___,   ___,     ___, ___,     k(PageDown), k(PageUp), ___,    ___,            ___,
    BOOT,      ___,                               ___,                             ___,                            ___,                                                           ___,      ___,       ___,       ___,            ___,
                                                ___,          ___,         ___, ___,
                                                              ___,         ___,
                                   k(Backspace), k(Delete),   ___,         ___, k(Delete), k(Backspace),
]);

/// All layers, indexed by [LayerId]
pub const LAYERS: [Layer; LAYER_COUNT] = [LAYER_BASE, LAYER_FUNC];

/// What the key at `position` does given the `active` layers: the highest active layer which
/// isn't [Thing::Transparent] there decides.
pub fn action_at(active: LayerState, (row, column): ScanCode) -> Thing {
    let (row, column) = (row as usize, column as usize);
    if row >= ROWS || column >= COLUMNS {
        return Thing::Inactive;
    }
    for layer in [LayerId::Func, LayerId::Base] {
        if !active.is_active(layer) {
            continue;
        }
        match LAYERS[layer as usize][row][column] {
            Thing::Transparent => continue,
            thing => return thing,
        }
    }
    Thing::Inactive
}
