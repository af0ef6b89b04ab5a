//! Decides whether each dual-role key (see [Thing::DualRole](crate::keymap::Thing::DualRole)) is
//! being tapped or held, according to a [TapHoldConfig].

use crate::config::{Millis, TapHoldConfig, DUAL_ROLE_LIMIT};
use crate::keymap::{Key, Modifiers, ScanCode};
use log::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Pressed, but not yet known to be a tap or a hold
    Undecided { pressed_at: Millis },
    /// Acting as its hold modifiers until released
    Hold,
    /// Re-pressed quickly after a tap: keeps typing the tap key until released
    /// (only without [TapHoldConfig::tapping_force_hold])
    RepeatingTap,
}

#[derive(Clone, Copy, Debug)]
struct DualRoleKey {
    position: ScanCode,
    tap: Key,
    hold: Modifiers,
    decision: Decision,
}

pub struct TapHold {
    config: TapHoldConfig,
    keys: [Option<DualRoleKey>; DUAL_ROLE_LIMIT],
    /// Most recent tap, for tap-then-hold repeat detection
    last_tap: Option<(ScanCode, Millis)>,
}

impl TapHold {
    pub const fn new(config: TapHoldConfig) -> Self {
        TapHold {
            config,
            keys: [None; DUAL_ROLE_LIMIT],
            last_tap: None,
        }
    }

    /// Start tracking a newly pressed dual-role key. Returns `false` if there was no room to track
    /// it, in which case the press does nothing.
    pub fn press(&mut self, position: ScanCode, tap: Key, hold: Modifiers, now: Millis) -> bool {
        let repeat = !self.config.tapping_force_hold
            && matches!(self.last_tap, Some((p, at)) if p == position && now.saturating_sub(at) < self.config.tapping_term);
        self.other_key_pressed();

        let Some(slot) = self.keys.iter_mut().find(|key| key.is_none()) else {
            warn!("too many dual-role keys held, ignoring {:?}", position);
            return false;
        };
        let decision = if repeat { Decision::RepeatingTap } else { Decision::Undecided { pressed_at: now } };
        debug!("dual-role {:?} pressed: {:?}", position, decision);
        *slot = Some(DualRoleKey { position, tap, hold, decision });
        true
    }

    /// Some other key went down. Settles undecided keys as held if so configured, and stops a
    /// following press of the last tapped key from counting as a repeat.
    pub fn other_key_pressed(&mut self) {
        self.last_tap = None;
        if self.config.hold_on_other_key_press {
            self.settle_holds(|_| true);
        }
    }

    /// Settle keys that have been undecided for the whole tapping term as held.
    pub fn tick(&mut self, now: Millis) {
        let term = self.config.tapping_term;
        self.settle_holds(|pressed_at| now.saturating_sub(pressed_at) >= term);
    }

    /// Stop tracking a released dual-role key. Returns the key to tap, if this release made it a
    /// tap.
    pub fn release(&mut self, position: ScanCode, now: Millis) -> Option<Key> {
        let slot = self.keys.iter_mut().find(|key| matches!(key, Some(k) if k.position == position))?;
        let key = slot.take()?;
        match key.decision {
            Decision::Undecided { pressed_at } if now.saturating_sub(pressed_at) < self.config.tapping_term => {
                debug!("dual-role {:?} tapped", position);
                self.last_tap = Some((position, now));
                Some(key.tap)
            },
            _ => {
                debug!("dual-role {:?} released", position);
                None
            },
        }
    }

    pub fn any_undecided(&self) -> bool {
        self.keys.iter().flatten().any(|key| matches!(key.decision, Decision::Undecided { .. }))
    }

    /// What the held key at `position` currently adds to the keyboard report.
    pub fn report_contribution(&self, position: ScanCode) -> Option<Key> {
        let key = self.find(position)?;
        match key.decision {
            Decision::Undecided { .. } => None,
            Decision::Hold => Some((0, key.hold)),
            Decision::RepeatingTap => Some(key.tap),
        }
    }

    fn find(&self, position: ScanCode) -> Option<&DualRoleKey> {
        self.keys.iter().flatten().find(|key| key.position == position)
    }

    fn settle_holds(&mut self, should_hold: impl Fn(Millis) -> bool) {
        for key in self.keys.iter_mut().flatten() {
            if let Decision::Undecided { pressed_at } = key.decision {
                if should_hold(pressed_at) {
                    debug!("dual-role {:?} held", key.position);
                    key.decision = Decision::Hold;
                }
            }
        }
    }
}

impl Default for TapHold {
    fn default() -> Self {
        Self::new(TapHoldConfig::DEFAULT)
    }
}
