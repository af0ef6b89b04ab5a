//! Compile-time tuning of key timing. Everything here is a `const`; there is nothing to load at
//! runtime.

/// Milliseconds since boot, as read from the time driver once per scan.
pub type Millis = u64;

/// Global tapping term: a dual-role key held at least this long counts as held.
pub const TAPPING_TERM: Millis = 200;

/// Prevent normal rollover on alphas from accidentally triggering mods: pressing any other key
/// while a dual-role key is undecided settles it as a hold straight away.
pub const HOLD_ON_OTHER_KEY_PRESS: bool = true;

/// Allow a rapid switch from tap to hold: a dual-role key pressed again right after being tapped
/// is decided afresh, rather than auto-repeating its tap action.
pub const TAPPING_FORCE_HOLD: bool = true;

/// How many scans a key stays held after it was last seen pressed.
pub const DEBOUNCE_COUNT: u8 = 5;

/// How many keys can be tracked as held at once.
pub const HELD_KEYS_LIMIT: usize = 16;

/// How many dual-role keys can be undecided or held at once.
pub const DUAL_ROLE_LIMIT: usize = 4;

/// Time given to a row line to settle after driving it, in microseconds.
pub const ROW_SETTLE_MICROS: u64 = 100;

/// The tap-versus-hold heuristics, bundled so tests can try other combinations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TapHoldConfig {
    pub tapping_term: Millis,
    pub hold_on_other_key_press: bool,
    pub tapping_force_hold: bool,
}

impl TapHoldConfig {
    pub const DEFAULT: Self = TapHoldConfig {
        tapping_term: TAPPING_TERM,
        hold_on_other_key_press: HOLD_ON_OTHER_KEY_PRESS,
        tapping_force_hold: TAPPING_FORCE_HOLD,
    };
}

impl Default for TapHoldConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
