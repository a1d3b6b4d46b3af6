use std::collections::HashSet;

use serde::Serialize;
use uuid::Uuid;

use super::planner::ViewingPlan;

const PROGRESS_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum PlaybackStatus {
    #[default]
    Idle,
    Playing,
    Paused,
    WaitingOnMedia,
    /// Ran off the end of the order; dismissal is scheduled.
    Dismissing,
}

/// Result of a navigation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Moved,
    /// Ran past the last viewable user; the session should wind down.
    Finished,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Idle,
    Progressed,
    Completed,
    WatchdogCleared,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub status: PlaybackStatus,
    pub current_user_index: usize,
    pub current_story_index: usize,
    pub viewing_order: Vec<usize>,
    pub position_in_order: usize,
    pub progress: f64,
    pub is_paused: bool,
    pub is_waiting_on_media: bool,
    pub dismiss_pending: bool,
}

/// Navigation and playback state of the session engine.
///
/// Pure bookkeeping: story counts are supplied by the caller as a lookup from
/// user index to number of stories (0 for unknown indices).
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub presenting: bool,
    pub current_user_index: usize,
    pub current_story_index: usize,
    pub viewing_order: Vec<usize>,
    pub position_in_order: usize,
    pub progress: f64,
    pub is_paused: bool,
    /// Set only when backgrounding caused the current pause.
    pub paused_by_background: bool,
    pub is_waiting_on_media: bool,
    pub dismiss_pending: bool,
    pub marked_this_session: HashSet<Uuid>,
    /// Consecutive unpaused ticks spent waiting on media.
    pub waiting_ticks: u32,
    /// Bumped on every timer restart or stop; stale tickers compare against it.
    pub ticker_generation: u64,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> PlaybackStatus {
        if !self.presenting {
            PlaybackStatus::Idle
        } else if self.dismiss_pending {
            PlaybackStatus::Dismissing
        } else if self.is_paused {
            PlaybackStatus::Paused
        } else if self.is_waiting_on_media {
            PlaybackStatus::WaitingOnMedia
        } else {
            PlaybackStatus::Playing
        }
    }

    pub fn begin(&mut self, plan: ViewingPlan, user_index: usize, story_index: usize) {
        let generation = self.ticker_generation;
        *self = Self {
            presenting: true,
            current_user_index: user_index,
            current_story_index: story_index,
            viewing_order: plan.order,
            position_in_order: plan.start_position,
            ticker_generation: generation,
            ..Self::default()
        };
        self.rearm();
    }

    /// Clears everything except the ticker generation.
    pub fn end(&mut self) {
        let generation = self.ticker_generation;
        *self = Self {
            ticker_generation: generation,
            ..Self::default()
        };
    }

    pub fn next_generation(&mut self) -> u64 {
        self.ticker_generation = self.ticker_generation.wrapping_add(1);
        self.ticker_generation
    }

    fn rearm(&mut self) {
        self.progress = 0.0;
        self.is_waiting_on_media = true;
        self.waiting_ticks = 0;
    }

    pub fn advance_story(&mut self, story_count: &dyn Fn(usize) -> usize) -> Step {
        if !self.presenting || self.dismiss_pending {
            return Step::Unchanged;
        }
        let count = story_count(self.current_user_index);
        if self.current_story_index + 1 < count {
            self.current_story_index += 1;
            self.rearm();
            return Step::Moved;
        }
        self.advance_user(story_count)
    }

    pub fn retreat_story(&mut self, story_count: &dyn Fn(usize) -> usize) -> Step {
        if !self.presenting || self.dismiss_pending {
            return Step::Unchanged;
        }
        if self.current_story_index > 0 {
            self.current_story_index -= 1;
            self.rearm();
            return Step::Moved;
        }
        self.retreat_user(story_count)
    }

    /// Moves to the next position whose user has stories.
    pub fn advance_user(&mut self, story_count: &dyn Fn(usize) -> usize) -> Step {
        if !self.presenting || self.dismiss_pending {
            return Step::Unchanged;
        }
        let next = (self.position_in_order + 1..self.viewing_order.len())
            .find(|&position| story_count(self.viewing_order[position]) > 0);

        match next {
            Some(position) => {
                self.move_to_position(position);
                Step::Moved
            }
            None => {
                self.dismiss_pending = true;
                Step::Finished
            }
        }
    }

    /// Moves to the previous position whose user has stories; clamped at the start.
    pub fn retreat_user(&mut self, story_count: &dyn Fn(usize) -> usize) -> Step {
        if !self.presenting || self.dismiss_pending {
            return Step::Unchanged;
        }
        let previous = (0..self.position_in_order.min(self.viewing_order.len()))
            .rev()
            .find(|&position| story_count(self.viewing_order[position]) > 0);

        match previous {
            Some(position) => {
                self.move_to_position(position);
                Step::Moved
            }
            None => Step::Unchanged,
        }
    }

    fn move_to_position(&mut self, position: usize) {
        self.position_in_order = position;
        self.current_user_index = self.viewing_order[position];
        self.current_story_index = 0;
        self.rearm();
    }

    pub fn tick(&mut self, increment: f64, watchdog_ticks: u32) -> TickOutcome {
        if !self.presenting || self.dismiss_pending || self.is_paused {
            return TickOutcome::Idle;
        }

        if self.is_waiting_on_media {
            self.waiting_ticks = self.waiting_ticks.saturating_add(1);
            if self.waiting_ticks >= watchdog_ticks {
                self.is_waiting_on_media = false;
                self.waiting_ticks = 0;
                return TickOutcome::WatchdogCleared;
            }
            return TickOutcome::Idle;
        }

        self.progress += increment;
        if self.progress >= 1.0 - PROGRESS_EPSILON {
            self.progress = 1.0;
            TickOutcome::Completed
        } else {
            TickOutcome::Progressed
        }
    }

    /// Explicit hold. Taking over a background pause makes it explicit.
    pub fn pause(&mut self) -> bool {
        if !self.presenting {
            return false;
        }
        self.paused_by_background = false;
        if self.is_paused {
            return false;
        }
        self.is_paused = true;
        true
    }

    pub fn resume(&mut self) -> bool {
        if !self.presenting || !self.is_paused {
            return false;
        }
        self.is_paused = false;
        self.paused_by_background = false;
        true
    }

    pub fn enter_background(&mut self) -> bool {
        if !self.presenting || self.is_paused {
            return false;
        }
        self.is_paused = true;
        self.paused_by_background = true;
        true
    }

    /// Only lifts a pause that backgrounding put in place.
    pub fn enter_foreground(&mut self) -> bool {
        if !self.presenting || !self.paused_by_background {
            return false;
        }
        self.is_paused = false;
        self.paused_by_background = false;
        true
    }

    pub fn media_ready(&mut self) -> bool {
        if !self.presenting || !self.is_waiting_on_media {
            return false;
        }
        self.is_waiting_on_media = false;
        self.waiting_ticks = 0;
        true
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.status(),
            current_user_index: self.current_user_index,
            current_story_index: self.current_story_index,
            viewing_order: self.viewing_order.clone(),
            position_in_order: self.position_in_order,
            progress: self.progress,
            is_paused: self.is_paused,
            is_waiting_on_media: self.is_waiting_on_media,
            dismiss_pending: self.dismiss_pending,
        }
    }
}
