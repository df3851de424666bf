//! Multi-touch identity tracking. Peaks found in the current frame are
//! matched to the previous frame's touches by squared distance, closest
//! pair first, so ids stay stable while fingers move.

use heapless::Vec;

use crate::types::{Position, MAX_TOUCHES, MAX_TOUCH_ID};

/// Aging slots: live touches plus ids kept around for possible re-match.
const HISTORY_SLOTS: usize = (MAX_TOUCH_ID as usize) + 1;

/// Displacement budgets for identity matching, all squared position units.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Ordinary frame-to-frame displacement budget per touch.
    pub displacement_sq: u32,
    /// Relaxed budget applied when exactly one touch faces exactly one
    /// candidate, which separates a fast single finger from a lift-and-new
    /// second finger.
    pub fast_displacement_sq: u32,
    /// Frames an unmatched id survives before it retires and frees its
    /// number.
    pub retire_frames: u8,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            displacement_sq: 40 * 40,
            fast_displacement_sq: 120 * 120,
            retire_frames: 2,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct TrackedTouch {
    id: u16,
    x: u16,
    y: u16,
    missing: u8,
}

pub(crate) fn squared_distance(ax: u16, ay: u16, bx: u16, by: u16) -> u32 {
    let dx = (ax as i32 - bx as i32).unsigned_abs();
    let dy = (ay as i32 - by as i32).unsigned_abs();
    dx.saturating_mul(dx).saturating_add(dy.saturating_mul(dy))
}

#[derive(Debug, Default)]
pub(crate) struct TouchTracker {
    history: Vec<TrackedTouch, HISTORY_SLOTS>,
}

impl TouchTracker {
    pub fn new() -> Self {
        TouchTracker { history: Vec::new() }
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }

    /// Assigns ids in place and advances the history one frame.
    pub fn track(&mut self, touches: &mut Vec<Position, MAX_TOUCHES>, config: &TrackerConfig) {
        let live_history = self.history.iter().filter(|t| t.missing == 0).count();
        let budget = if touches.len() == 1 && live_history == 1 {
            config.fast_displacement_sq
        } else {
            config.displacement_sq
        };

        let mut touch_matched = [false; MAX_TOUCHES];
        let mut history_matched = [false; HISTORY_SLOTS];

        // Greedy closest-pair assignment.
        loop {
            let mut best: Option<(usize, usize, u32)> = None;
            for (ti, touch) in touches.iter().enumerate() {
                if touch_matched[ti] {
                    continue;
                }
                for (hi, tracked) in self.history.iter().enumerate() {
                    if history_matched[hi] {
                        continue;
                    }
                    let distance = squared_distance(touch.x, touch.y, tracked.x, tracked.y);
                    if distance > budget {
                        continue;
                    }
                    if best.map_or(true, |(_, _, d)| distance < d) {
                        best = Some((ti, hi, distance));
                    }
                }
            }
            let Some((ti, hi, _)) = best else { break };
            touches[ti].id = self.history[hi].id;
            touch_matched[ti] = true;
            history_matched[hi] = true;
        }

        // Unmatched touches take the lowest id not in use.
        self.assign_new_ids(touches, &touch_matched, &mut history_matched);

        // Advance the history.
        let mut next: Vec<TrackedTouch, HISTORY_SLOTS> = Vec::new();
        for touch in touches.iter() {
            let _ = next.push(TrackedTouch { id: touch.id, x: touch.x, y: touch.y, missing: 0 });
        }
        for (hi, tracked) in self.history.iter().enumerate() {
            if history_matched[hi] {
                continue;
            }
            let mut aged = *tracked;
            aged.missing = aged.missing.saturating_add(1);
            if aged.missing <= config.retire_frames {
                let _ = next.push(aged);
            }
        }
        self.history = next;
    }

    fn assign_new_ids(
        &self,
        touches: &mut Vec<Position, MAX_TOUCHES>,
        matched: &[bool; MAX_TOUCHES],
        history_matched: &mut [bool; HISTORY_SLOTS],
    ) {
        for ti in 0..touches.len() {
            if matched[ti] {
                continue;
            }
            let mut assigned = None;
            for candidate in 0..=MAX_TOUCH_ID {
                let in_history = self.history.iter().any(|t| t.id == candidate);
                let in_frame = touches
                    .iter()
                    .enumerate()
                    .any(|(other, t)| other != ti && (matched[other] || other < ti) && t.id == candidate);
                if !in_history && !in_frame {
                    assigned = Some(candidate);
                    break;
                }
            }
            touches[ti].id = match assigned {
                Some(id) => id,
                // Every id is held: evict the stalest aged entry and take
                // its id. Marking the slot matched keeps it out of the
                // advanced history.
                None => match self.stalest_aged(history_matched) {
                    Some(slot) => {
                        history_matched[slot] = true;
                        self.history[slot].id
                    }
                    None => MAX_TOUCH_ID,
                },
            };
        }
    }

    fn stalest_aged(&self, history_matched: &[bool; HISTORY_SLOTS]) -> Option<usize> {
        let mut stalest: Option<usize> = None;
        for (slot, tracked) in self.history.iter().enumerate() {
            if history_matched[slot] || tracked.missing == 0 {
                continue;
            }
            if stalest.map_or(true, |best| self.history[best].missing < tracked.missing) {
                stalest = Some(slot);
            }
        }
        stalest
    }
}
