use crate::model::duration::DurationToken;
use anyhow::{Result, bail};
use std::sync::Arc;

/// Identifies one scheduled loop on a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LoopId(pub u64);

/// Identifies one run of a transport, from `start` to `stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Session(pub u64);

/// The payload carried by every scheduled event.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteEvent {
    pub track: usize,
    pub note: usize,
    pub instrument: usize,
    pub pitches: Vec<u8>,
    /// Seconds.
    pub duration: f64,
}

/// Invoked with the event and its trigger time in seconds on the transport timeline.
pub type LoopCallback = Arc<dyn Fn(&NoteEvent, f64) + Send + Sync>;

/// A shared timeline that repeating event lists are scheduled against.
pub trait Transport: Send + Sync {
    fn set_bpm(&self, bpm: f64);

    fn bpm(&self) -> f64;

    /// Length of `token` at the current tempo.
    fn to_seconds(&self, token: DurationToken) -> f64 {
        token.seconds(self.bpm())
    }

    /// Starts the timeline at zero. Starting a running transport keeps its session.
    fn start(&self) -> Result<Session>;

    /// Halts the timeline and disposes every loop scheduled on it.
    fn stop(&self) -> Result<()>;

    /// Disposes every loop but leaves the timeline running.
    fn cancel(&self) -> Result<()>;

    /// The current run, `None` while stopped.
    fn session(&self) -> Option<Session>;

    fn is_running(&self) -> bool {
        self.session().is_some()
    }

    /// Seconds elapsed on the timeline since `start`.
    fn position(&self) -> f64;

    /// Schedules `events` (offset in seconds, payload) to repeat every `loop_length`
    /// seconds. Every loop shares the session's time zero, where its loop time is
    /// `start_offset`; events before that offset only fire from the second iteration on.
    /// A loop scheduled later joins in progress and skips events already passed.
    fn schedule_loop(
        &self,
        events: Vec<(f64, NoteEvent)>,
        loop_length: f64,
        start_offset: f64,
        callback: LoopCallback,
    ) -> Result<LoopId>;

    /// Disposes a loop. Once this returns, its callback is never invoked again.
    fn clear(&self, id: LoopId) -> Result<()>;

    fn is_scheduled(&self, id: LoopId) -> bool;
}

/// Checks a loop before scheduling and returns its events ordered by offset, dropping
/// any that fall outside `[0, loop_length)`.
pub(crate) fn prepare_loop(
    mut events: Vec<(f64, NoteEvent)>,
    loop_length: f64,
    start_offset: f64,
) -> Result<Vec<(f64, NoteEvent)>> {
    if !loop_length.is_finite() || loop_length <= 0.0 {
        bail!("Loop length must be positive, got {}..!", loop_length);
    }

    if !start_offset.is_finite() || !(0.0..loop_length).contains(&start_offset) {
        bail!(
            "Loop start offset {} is outside [0, {})..!",
            start_offset,
            loop_length
        );
    }

    events.retain(|(offset, _)| (0.0..loop_length).contains(offset));
    events.sort_by(|a, b| a.0.total_cmp(&b.0));

    Ok(events)
}
