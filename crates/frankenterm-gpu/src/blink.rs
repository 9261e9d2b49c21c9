//! Cursor blink state machine.
//!
//! The manager never sleeps or spawns; it asks a [`TimerHost`] for timeouts,
//! intervals and animation frames and is driven by the host calling
//! [`CursorBlinkStateManager::fire`] with the id that elapsed. Restarts
//! (cursor moves, typing) only record a timestamp, so a burst of input costs
//! no timer churn: the pending timer re-arms itself for the remaining time
//! when it fires.
//!
//! Phases:
//!
//! ```text
//!   Paused --resume--> Solid --timeout--> Blinking --restart seen--> Solid
//!      ^                  |                   |
//!      +------pause-------+-------pause-------+
//! ```

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

/// Time the cursor stays solid after activity, and the blink half-period.
pub const BLINK_INTERVAL: Duration = Duration::from_millis(600);

/// Handle of a scheduled timer or animation frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

/// Host scheduling primitives (`setTimeout`, `setInterval`,
/// `requestAnimationFrame` in a browser).
pub trait TimerHost {
    /// Monotonic time.
    fn now(&self) -> Duration;

    fn set_timeout(&mut self, delay: Duration) -> TimerId;

    fn set_interval(&mut self, period: Duration) -> TimerId;

    fn request_animation_frame(&mut self) -> TimerId;

    /// Cancel a pending timer; unknown ids are ignored.
    fn cancel(&mut self, id: TimerId);
}

// ---------------------------------------------------------------------------
// Manual timers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct PendingTimer {
    id: TimerId,
    due: Duration,
    period: Option<Duration>,
}

#[derive(Debug, Default)]
struct TimerQueue {
    now: Duration,
    next_id: u64,
    pending: Vec<PendingTimer>,
    scheduled: usize,
    frames_requested: usize,
}

impl TimerQueue {
    fn push(&mut self, due: Duration, period: Option<Duration>) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.pending.push(PendingTimer { id, due, period });
        id
    }
}

/// Deterministic [`TimerHost`] driven by explicit time.
///
/// Cloning yields another handle to the same queue, so a test can hand one
/// clone to the renderer and keep one to advance time.
#[derive(Debug, Clone, Default)]
pub struct ManualTimers {
    inner: Rc<RefCell<TimerQueue>>,
}

impl ManualTimers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Jump to `now` without firing anything.
    pub fn set_now(&self, now: Duration) {
        self.inner.borrow_mut().now = now;
    }

    /// Earliest timer due at or before `until`, advancing time to its due
    /// point. Intervals are rescheduled, one-shots removed. When nothing is
    /// due, time advances to `until` and `None` is returned.
    pub fn pop_due(&self, until: Duration) -> Option<TimerId> {
        let mut queue = self.inner.borrow_mut();
        let next = queue
            .pending
            .iter()
            .enumerate()
            .filter(|(_, t)| t.due <= until)
            .min_by_key(|(_, t)| (t.due, t.id))
            .map(|(i, _)| i);
        let Some(index) = next else {
            queue.now = queue.now.max(until);
            return None;
        };
        let timer = queue.pending[index];
        queue.now = queue.now.max(timer.due);
        match timer.period {
            Some(period) => queue.pending[index].due = timer.due + period,
            None => {
                queue.pending.swap_remove(index);
            }
        }
        Some(timer.id)
    }

    /// Timeouts and intervals created so far (animation frames excluded).
    #[must_use]
    pub fn schedule_count(&self) -> usize {
        self.inner.borrow().scheduled
    }

    #[must_use]
    pub fn frames_requested(&self) -> usize {
        self.inner.borrow().frames_requested
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.borrow().pending.len()
    }

    #[must_use]
    pub fn is_pending(&self, id: TimerId) -> bool {
        self.inner.borrow().pending.iter().any(|t| t.id == id)
    }
}

impl TimerHost for ManualTimers {
    fn now(&self) -> Duration {
        self.inner.borrow().now
    }

    fn set_timeout(&mut self, delay: Duration) -> TimerId {
        let mut queue = self.inner.borrow_mut();
        queue.scheduled += 1;
        let due = queue.now + delay;
        queue.push(due, None)
    }

    fn set_interval(&mut self, period: Duration) -> TimerId {
        let mut queue = self.inner.borrow_mut();
        queue.scheduled += 1;
        let due = queue.now + period;
        queue.push(due, Some(period))
    }

    fn request_animation_frame(&mut self) -> TimerId {
        let mut queue = self.inner.borrow_mut();
        queue.frames_requested += 1;
        let due = queue.now;
        queue.push(due, None)
    }

    fn cancel(&mut self, id: TimerId) {
        self.inner.borrow_mut().pending.retain(|t| t.id != id);
    }
}

// ---------------------------------------------------------------------------
// Blink state machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlinkPhase {
    Paused,
    /// Solid for the rest of the activity window.
    Solid(TimerId),
    /// Toggling every interval.
    Blinking(TimerId),
}

#[derive(Debug)]
pub struct CursorBlinkStateManager {
    phase: BlinkPhase,
    animation_frame: Option<TimerId>,
    restarted_at: Option<Duration>,
    is_cursor_visible: bool,
    disposed: bool,
}

impl CursorBlinkStateManager {
    /// Start solid when focused, paused otherwise.
    pub fn new(focused: bool, timers: &mut dyn TimerHost) -> Self {
        let phase = if focused {
            BlinkPhase::Solid(timers.set_timeout(BLINK_INTERVAL))
        } else {
            BlinkPhase::Paused
        };
        Self {
            phase,
            animation_frame: None,
            restarted_at: None,
            is_cursor_visible: true,
            disposed: false,
        }
    }

    #[must_use]
    pub fn is_cursor_visible(&self) -> bool {
        self.is_cursor_visible
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.phase == BlinkPhase::Paused
    }

    /// Whether `id` is a timer or frame this manager is waiting on.
    #[must_use]
    pub fn owns(&self, id: TimerId) -> bool {
        self.animation_frame == Some(id)
            || matches!(self.phase, BlinkPhase::Solid(t) | BlinkPhase::Blinking(t) if t == id)
    }

    /// Show the cursor and restart the solid window from now.
    pub fn restart_blink_animation(&mut self, timers: &mut dyn TimerHost) {
        if self.disposed || self.is_paused() {
            return;
        }
        self.restarted_at = Some(timers.now());
        self.is_cursor_visible = true;
        self.request_frame(timers);
    }

    fn request_frame(&mut self, timers: &mut dyn TimerHost) {
        if self.animation_frame.is_none() {
            self.animation_frame = Some(timers.request_animation_frame());
        }
    }

    /// Handle an elapsed timer. Returns `true` when the cursor row must be
    /// redrawn.
    pub fn fire(&mut self, timers: &mut dyn TimerHost, id: TimerId) -> bool {
        if self.disposed {
            return false;
        }
        if self.animation_frame == Some(id) {
            self.animation_frame = None;
            return true;
        }
        match self.phase {
            BlinkPhase::Solid(timer) if timer == id => {
                if let Some(at) = self.restarted_at.take() {
                    let elapsed = timers.now().saturating_sub(at);
                    if let Some(remaining) = BLINK_INTERVAL.checked_sub(elapsed)
                        && !remaining.is_zero()
                    {
                        self.phase = BlinkPhase::Solid(timers.set_timeout(remaining));
                        return false;
                    }
                }
                self.is_cursor_visible = false;
                self.request_frame(timers);
                self.phase = BlinkPhase::Blinking(timers.set_interval(BLINK_INTERVAL));
            }
            BlinkPhase::Blinking(interval) if interval == id => {
                if let Some(at) = self.restarted_at.take() {
                    let elapsed = timers.now().saturating_sub(at);
                    timers.cancel(interval);
                    self.phase =
                        BlinkPhase::Solid(timers.set_timeout(BLINK_INTERVAL.saturating_sub(elapsed)));
                    return false;
                }
                self.is_cursor_visible = !self.is_cursor_visible;
                self.request_frame(timers);
            }
            _ => {}
        }
        false
    }

    /// Stop blinking with the cursor shown.
    pub fn pause(&mut self, timers: &mut dyn TimerHost) {
        self.is_cursor_visible = true;
        self.cancel_all(timers);
        self.phase = BlinkPhase::Paused;
    }

    /// Start over with a full solid window.
    pub fn resume(&mut self, timers: &mut dyn TimerHost) {
        if self.disposed {
            return;
        }
        self.pause(timers);
        self.restarted_at = None;
        self.phase = BlinkPhase::Solid(timers.set_timeout(BLINK_INTERVAL));
        self.restart_blink_animation(timers);
    }

    /// Cancel everything. Safe to call more than once.
    pub fn dispose(&mut self, timers: &mut dyn TimerHost) {
        if self.disposed {
            return;
        }
        self.cancel_all(timers);
        self.phase = BlinkPhase::Paused;
        self.disposed = true;
    }

    fn cancel_all(&mut self, timers: &mut dyn TimerHost) {
        if let BlinkPhase::Solid(id) | BlinkPhase::Blinking(id) = self.phase {
            timers.cancel(id);
        }
        if let Some(frame) = self.animation_frame.take() {
            timers.cancel(frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    /// Fire everything due up to `until`; returns the number of redraws.
    fn run(blink: &mut CursorBlinkStateManager, timers: &ManualTimers, until: Duration) -> usize {
        let mut host = timers.clone();
        let mut redraws = 0;
        while let Some(id) = timers.pop_due(until) {
            if blink.fire(&mut host, id) {
                redraws += 1;
            }
        }
        redraws
    }

    #[test]
    fn unfocused_starts_paused() {
        let timers = ManualTimers::new();
        let blink = CursorBlinkStateManager::new(false, &mut timers.clone());
        assert!(blink.is_paused());
        assert!(blink.is_cursor_visible());
        assert_eq!(timers.pending_count(), 0);
    }

    #[test]
    fn solid_then_toggles_each_interval() {
        let timers = ManualTimers::new();
        let mut blink = CursorBlinkStateManager::new(true, &mut timers.clone());
        assert_eq!(run(&mut blink, &timers, ms(599)), 0);
        assert!(blink.is_cursor_visible());

        assert_eq!(run(&mut blink, &timers, ms(600)), 1);
        assert!(!blink.is_cursor_visible());
        assert_eq!(run(&mut blink, &timers, ms(1200)), 1);
        assert!(blink.is_cursor_visible());
        assert_eq!(run(&mut blink, &timers, ms(1800)), 1);
        assert!(!blink.is_cursor_visible());
    }

    #[test]
    fn restart_extends_solid_window_without_new_timers() {
        let timers = ManualTimers::new();
        let mut host = timers.clone();
        let mut blink = CursorBlinkStateManager::new(true, &mut host);
        assert_eq!(timers.schedule_count(), 1);

        for t in [100, 200, 300] {
            timers.set_now(ms(t));
            blink.restart_blink_animation(&mut host);
        }
        assert_eq!(timers.schedule_count(), 1);
        assert_eq!(timers.frames_requested(), 1);

        // The original timeout fires at 600 and re-arms for the 300ms left.
        assert_eq!(run(&mut blink, &timers, ms(600)), 1);
        assert!(blink.is_cursor_visible());
        assert_eq!(timers.schedule_count(), 2);
        assert_eq!(run(&mut blink, &timers, ms(899)), 0);
        assert!(blink.is_cursor_visible());
        assert_eq!(run(&mut blink, &timers, ms(900)), 1);
        assert!(!blink.is_cursor_visible());
    }

    #[test]
    fn restart_while_blinking_returns_to_solid() {
        let timers = ManualTimers::new();
        let mut host = timers.clone();
        let mut blink = CursorBlinkStateManager::new(true, &mut host);
        run(&mut blink, &timers, ms(700));
        assert!(!blink.is_cursor_visible());

        timers.set_now(ms(1000));
        blink.restart_blink_animation(&mut host);
        assert!(blink.is_cursor_visible());
        // Interval tick at 1200 notices the restart and arms 400ms of solid.
        run(&mut blink, &timers, ms(1200));
        assert!(blink.is_cursor_visible());
        run(&mut blink, &timers, ms(1599));
        assert!(blink.is_cursor_visible());
        run(&mut blink, &timers, ms(1600));
        assert!(!blink.is_cursor_visible());
    }

    #[test]
    fn pause_shows_cursor_and_cancels_timers() {
        let timers = ManualTimers::new();
        let mut host = timers.clone();
        let mut blink = CursorBlinkStateManager::new(true, &mut host);
        run(&mut blink, &timers, ms(700));
        blink.pause(&mut host);
        assert!(blink.is_paused());
        assert!(blink.is_cursor_visible());
        assert_eq!(timers.pending_count(), 0);

        blink.restart_blink_animation(&mut host);
        assert_eq!(timers.pending_count(), 0);

        blink.resume(&mut host);
        assert!(!blink.is_paused());
        assert_eq!(timers.pending_count(), 2);
    }

    #[test]
    fn dispose_is_idempotent_and_final() {
        let timers = ManualTimers::new();
        let mut host = timers.clone();
        let mut blink = CursorBlinkStateManager::new(true, &mut host);
        blink.dispose(&mut host);
        blink.dispose(&mut host);
        assert_eq!(timers.pending_count(), 0);
        blink.resume(&mut host);
        assert_eq!(timers.pending_count(), 0);
        assert!(!blink.fire(&mut host, TimerId(1)));
    }

    #[test]
    fn manual_timers_reschedule_intervals() {
        let timers = ManualTimers::new();
        let mut host = timers.clone();
        let interval = host.set_interval(ms(10));
        let once = host.set_timeout(ms(15));
        assert_eq!(timers.pop_due(ms(30)), Some(interval));
        assert_eq!(timers.pop_due(ms(30)), Some(once));
        assert_eq!(timers.pop_due(ms(30)), Some(interval));
        assert_eq!(timers.pop_due(ms(30)), Some(interval));
        assert_eq!(timers.pop_due(ms(30)), None);
        assert_eq!(host.now(), ms(30));
        host.cancel(interval);
        assert!(!timers.is_pending(interval));
    }
}
