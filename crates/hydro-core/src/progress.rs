//! Structured progress reporting, mirroring the original tool's
//! `ProgressCallback` protocol: every field is optional, callbacks must
//! never be allowed to abort a pipeline stage by panicking.

/// A single progress update. All fields are optional; a stage fills in
/// whichever are meaningful to it.
#[derive(Debug, Clone, Default)]
pub struct ProgressEvent {
    pub phase: Option<String>,
    pub step_name: Option<String>,
    pub step_number: Option<u64>,
    pub total_steps: Option<u64>,
    pub message: Option<String>,
    pub progress: Option<f32>,
}

impl ProgressEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    pub fn with_step(mut self, name: impl Into<String>, number: u64, total: u64) -> Self {
        self.step_name = Some(name.into());
        self.step_number = Some(number);
        self.total_steps = Some(total);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_progress(mut self, progress: f32) -> Self {
        self.progress = Some(progress);
        self
    }
}

pub type ProgressCallback<'a> = dyn FnMut(ProgressEvent) + 'a;

/// Invokes `cb` with `event`, catching any panic inside the caller's
/// closure so a misbehaving callback can never abort the pipeline stage
/// it was attached to.
pub fn report(cb: Option<&mut ProgressCallback<'_>>, event: ProgressEvent) {
    if let Some(cb) = cb {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            cb(event);
        }));
    }
}

/// Tracks progress through a known number of steps within a phase,
/// emitting one event per `update` call. Generalizes the step-tracker
/// helper used throughout the original multi-step stages (flow
/// direction, stream extraction, flow length).
pub struct ProgressTracker<'a> {
    cb: Option<&'a mut ProgressCallback<'a>>,
    phase: String,
    total_steps: u64,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(cb: Option<&'a mut ProgressCallback<'a>>, phase: impl Into<String>, total_steps: u64) -> Self {
        Self {
            cb,
            phase: phase.into(),
            total_steps,
        }
    }

    pub fn update(&mut self, step: u64, step_name: &str, message: Option<&str>, progress: f32) {
        let event = ProgressEvent::new()
            .with_phase(self.phase.clone())
            .with_step(step_name, step, self.total_steps)
            .with_progress(progress);
        let event = match message {
            Some(m) => event.with_message(m),
            None => event,
        };
        report(self.cb.as_mut().map(|c| &mut **c), event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn panicking_callback_does_not_propagate() {
        let mut cb: Box<ProgressCallback> = Box::new(|_e| panic!("boom"));
        report(Some(&mut *cb), ProgressEvent::new().with_message("hi"));
    }

    #[test]
    fn tracker_reports_expected_step_numbers() {
        let seen = RefCell::new(Vec::new());
        let mut cb: Box<ProgressCallback> = Box::new(|e| {
            seen.borrow_mut().push(e.step_number.unwrap());
        });
        let mut tracker = ProgressTracker::new(Some(&mut *cb), "streams", 3);
        tracker.update(1, "mask", None, 0.33);
        tracker.update(2, "nodes", None, 0.67);
        tracker.update(3, "trace", None, 1.0);
        assert_eq!(*seen.borrow(), vec![1, 2, 3]);
    }
}
