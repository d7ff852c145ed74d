//! Auto-capture debouncing
//!
//! A single good frame is not enough evidence of a steady, aligned document,
//! so the still is only taken after several consecutive `ready` verdicts
//! spanning a minimum amount of time.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, trace};

use crate::config::AutoCaptureSettings;
use crate::vision::ValidationReason;

/// Controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    #[default]
    Scanning,
    Stabilizing,
    /// A capture was requested; terminal until the capture fails or the session resets
    Triggered,
}

/// Consecutive ready frames since the first `ready` verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StabilityCounter {
    pub first_ready: Instant,
    pub frames: u32,
}

impl StabilityCounter {
    fn start(now: Instant) -> Self {
        Self {
            first_ready: now,
            frames: 1,
        }
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.first_ready)
    }
}

/// What the session should do after a verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureDecision {
    Wait,
    /// Take the still now; issued at most once per attempt
    Capture,
}

/// Scanning -> stabilizing -> triggered state machine
#[derive(Debug, Clone)]
pub struct AutoCaptureController {
    settings: AutoCaptureSettings,
    state: CaptureState,
    counter: Option<StabilityCounter>,
    /// Capture-in-progress lock
    in_flight: bool,
}

impl AutoCaptureController {
    pub fn new(settings: AutoCaptureSettings) -> Self {
        Self {
            settings,
            state: CaptureState::Scanning,
            counter: None,
            in_flight: false,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn counter(&self) -> Option<StabilityCounter> {
        self.counter
    }

    pub fn is_capture_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Feed one analyzer verdict observed at `now`
    pub fn observe(&mut self, reason: ValidationReason, now: Instant) -> CaptureDecision {
        if self.in_flight || self.state == CaptureState::Triggered {
            return CaptureDecision::Wait;
        }

        if reason != ValidationReason::Ready {
            if self.state == CaptureState::Stabilizing {
                trace!("Stability lost ({:?}), back to scanning", reason);
            }
            self.state = CaptureState::Scanning;
            self.counter = None;
            return CaptureDecision::Wait;
        }

        let counter = match (self.state, self.counter) {
            (CaptureState::Stabilizing, Some(mut counter)) => {
                counter.frames += 1;
                counter
            }
            _ => {
                self.state = CaptureState::Stabilizing;
                StabilityCounter::start(now)
            }
        };
        self.counter = Some(counter);

        if counter.frames >= self.settings.min_stable_frames
            && counter.elapsed(now) >= self.settings.min_stable_delay()
        {
            debug!(
                "Document stable for {} frames / {:?}, triggering capture",
                counter.frames,
                counter.elapsed(now)
            );
            self.state = CaptureState::Triggered;
            self.in_flight = true;
            return CaptureDecision::Capture;
        }

        CaptureDecision::Wait
    }

    /// The still could not be taken; allow another attempt
    pub fn capture_failed(&mut self) {
        self.in_flight = false;
        self.state = CaptureState::Scanning;
        self.counter = None;
    }

    /// The still was taken; the lock is released but the state stays terminal
    pub fn capture_completed(&mut self) {
        self.in_flight = false;
    }

    /// Clear everything for a closed or restarted session
    pub fn reset(&mut self) {
        self.state = CaptureState::Scanning;
        self.counter = None;
        self.in_flight = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_millis(280);

    fn controller() -> AutoCaptureController {
        AutoCaptureController::new(AutoCaptureSettings::default())
    }

    #[test]
    fn test_triggers_after_frames_and_delay() {
        let mut ctl = controller();
        let t0 = Instant::now();

        assert_eq!(ctl.observe(ValidationReason::Ready, t0), CaptureDecision::Wait);
        assert_eq!(ctl.state(), CaptureState::Stabilizing);
        assert_eq!(ctl.observe(ValidationReason::Ready, t0 + TICK), CaptureDecision::Wait);
        // Third frame, but only 560ms elapsed
        assert_eq!(ctl.observe(ValidationReason::Ready, t0 + TICK * 2), CaptureDecision::Wait);
        assert_eq!(ctl.counter().unwrap().frames, 3);
        assert_eq!(ctl.observe(ValidationReason::Ready, t0 + TICK * 3), CaptureDecision::Capture);
        assert_eq!(ctl.state(), CaptureState::Triggered);
        assert!(ctl.is_capture_in_flight());
    }

    #[test]
    fn test_delay_alone_is_not_enough() {
        let mut ctl = controller();
        let t0 = Instant::now();

        ctl.observe(ValidationReason::Ready, t0);
        assert_eq!(
            ctl.observe(ValidationReason::Ready, t0 + Duration::from_secs(2)),
            CaptureDecision::Wait
        );
        assert_eq!(
            ctl.observe(ValidationReason::Ready, t0 + Duration::from_secs(3)),
            CaptureDecision::Capture
        );
    }

    #[test]
    fn test_non_ready_resets_counter() {
        let mut ctl = controller();
        let t0 = Instant::now();

        ctl.observe(ValidationReason::Ready, t0);
        ctl.observe(ValidationReason::Ready, t0 + TICK);
        ctl.observe(ValidationReason::Tilt, t0 + TICK * 2);
        assert_eq!(ctl.state(), CaptureState::Scanning);
        assert!(ctl.counter().is_none());

        // Counting restarts from the next ready frame
        ctl.observe(ValidationReason::Ready, t0 + TICK * 3);
        ctl.observe(ValidationReason::Ready, t0 + TICK * 4);
        assert_eq!(ctl.observe(ValidationReason::Ready, t0 + TICK * 5), CaptureDecision::Wait);
        assert_eq!(ctl.observe(ValidationReason::Ready, t0 + TICK * 6), CaptureDecision::Capture);
    }

    #[test]
    fn test_capture_fires_once() {
        let mut ctl = controller();
        let t0 = Instant::now();
        let mut captures = 0;
        for i in 0..20 {
            if ctl.observe(ValidationReason::Ready, t0 + TICK * i) == CaptureDecision::Capture {
                captures += 1;
            }
        }
        assert_eq!(captures, 1);

        ctl.capture_completed();
        assert_eq!(ctl.observe(ValidationReason::Ready, t0 + TICK * 21), CaptureDecision::Wait);
        assert_eq!(ctl.state(), CaptureState::Triggered);
    }

    #[test]
    fn test_failed_capture_allows_retry() {
        let mut ctl = controller();
        let t0 = Instant::now();
        for i in 0..4 {
            ctl.observe(ValidationReason::Ready, t0 + TICK * i);
        }
        assert_eq!(ctl.state(), CaptureState::Triggered);

        ctl.capture_failed();
        assert_eq!(ctl.state(), CaptureState::Scanning);
        assert!(!ctl.is_capture_in_flight());

        let t1 = t0 + Duration::from_secs(5);
        for i in 0..3 {
            assert_eq!(ctl.observe(ValidationReason::Ready, t1 + TICK * i), CaptureDecision::Wait);
        }
        assert_eq!(ctl.observe(ValidationReason::Ready, t1 + TICK * 3), CaptureDecision::Capture);
    }

    #[test]
    fn test_reset_clears_lock() {
        let mut ctl = controller();
        let t0 = Instant::now();
        for i in 0..4 {
            ctl.observe(ValidationReason::Ready, t0 + TICK * i);
        }
        assert!(ctl.is_capture_in_flight());

        ctl.reset();
        assert_eq!(ctl.state(), CaptureState::Scanning);
        assert!(!ctl.is_capture_in_flight());
        assert!(ctl.counter().is_none());
    }
}
