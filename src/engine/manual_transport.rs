use crate::engine::transport::{
    LoopCallback, LoopId, NoteEvent, Session, Transport, prepare_loop,
};
use anyhow::{Result, bail};
use log::{debug, warn};
use std::collections::BTreeMap;
use std::sync::Mutex;

const DEFAULT_BPM: f64 = 120.0;

struct ScheduledLoop {
    events: Vec<(f64, NoteEvent)>,
    loop_length: f64,
    start_offset: f64,
    callback: LoopCallback,
}

struct Inner {
    bpm: f64,
    position: f64,
    session: Option<Session>,
    next_session: u64,
    next_loop: u64,
    loops: BTreeMap<LoopId, ScheduledLoop>,
}

struct Due {
    at: f64,
    id: LoopId,
    event: NoteEvent,
    callback: LoopCallback,
}

/// A transport whose clock only moves when told to.
///
/// Callbacks fire synchronously from [`ManualTransport::advance`], in timeline order,
/// which makes playback fully deterministic.
pub struct ManualTransport {
    inner: Mutex<Inner>,
}

impl Default for ManualTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualTransport {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                bpm: DEFAULT_BPM,
                position: 0.0,
                session: None,
                next_session: 0,
                next_loop: 0,
                loops: BTreeMap::new(),
            }),
        }
    }

    /// Moves the clock forward, firing every event that falls within the covered span.
    /// Returns how many callbacks were invoked. Does nothing while stopped.
    pub fn advance(&self, seconds: f64) -> Result<usize> {
        if !seconds.is_finite() || seconds < 0.0 {
            bail!("Cannot advance the transport by {} seconds..!", seconds);
        }

        let due = {
            let Ok(mut inner) = self.inner.lock() else {
                bail!("Failed to lock the transport..!")
            };

            if inner.session.is_none() {
                return Ok(0);
            }

            let from = inner.position;
            let to = from + seconds;
            inner.position = to;

            let mut due: Vec<Due> = Vec::new();
            for (&id, scheduled) in inner.loops.iter() {
                // Local loop time covered by this step, as [a, b).
                let a = scheduled.start_offset + from;
                let b = scheduled.start_offset + to;
                let first = (a / scheduled.loop_length).floor() as i64;
                let last = (b / scheduled.loop_length).floor() as i64;

                for iteration in first..=last {
                    for (offset, event) in scheduled.events.iter() {
                        let local = iteration as f64 * scheduled.loop_length + offset;
                        if local >= a && local < b {
                            due.push(Due {
                                at: local - scheduled.start_offset,
                                id,
                                event: event.clone(),
                                callback: scheduled.callback.clone(),
                            });
                        }
                    }
                }
            }

            due.sort_by(|x, y| x.at.total_cmp(&y.at));
            due
        };

        let mut fired = 0;
        for d in due {
            // A callback may have cleared this loop (or stopped the transport) already.
            if !self.is_scheduled(d.id) {
                continue;
            }

            (d.callback)(&d.event, d.at);
            fired += 1;
        }

        Ok(fired)
    }

    pub fn loop_count(&self) -> usize {
        self.inner.lock().map(|inner| inner.loops.len()).unwrap_or(0)
    }
}

impl Transport for ManualTransport {
    fn set_bpm(&self, bpm: f64) {
        let Ok(mut inner) = self.inner.lock() else {
            warn!("Failed to lock the transport to set its tempo..!");
            return;
        };

        inner.bpm = bpm;
    }

    fn bpm(&self) -> f64 {
        self.inner.lock().map(|inner| inner.bpm).unwrap_or(DEFAULT_BPM)
    }

    fn start(&self) -> Result<Session> {
        let Ok(mut inner) = self.inner.lock() else {
            bail!("Failed to lock the transport..!")
        };

        if let Some(session) = inner.session {
            return Ok(session);
        }

        inner.next_session += 1;
        let session = Session(inner.next_session);
        inner.session = Some(session);
        inner.position = 0.0;

        debug!("Manual transport started, session {}..!", session.0);
        Ok(session)
    }

    fn stop(&self) -> Result<()> {
        let Ok(mut inner) = self.inner.lock() else {
            bail!("Failed to lock the transport..!")
        };

        inner.loops.clear();
        inner.session = None;
        inner.position = 0.0;

        Ok(())
    }

    fn cancel(&self) -> Result<()> {
        let Ok(mut inner) = self.inner.lock() else {
            bail!("Failed to lock the transport..!")
        };

        inner.loops.clear();
        Ok(())
    }

    fn session(&self) -> Option<Session> {
        self.inner.lock().ok().and_then(|inner| inner.session)
    }

    fn position(&self) -> f64 {
        self.inner.lock().map(|inner| inner.position).unwrap_or(0.0)
    }

    fn schedule_loop(
        &self,
        events: Vec<(f64, NoteEvent)>,
        loop_length: f64,
        start_offset: f64,
        callback: LoopCallback,
    ) -> Result<LoopId> {
        let events = prepare_loop(events, loop_length, start_offset)?;

        let Ok(mut inner) = self.inner.lock() else {
            bail!("Failed to lock the transport..!")
        };

        if inner.session.is_none() {
            bail!("Cannot schedule a loop on a stopped transport..!")
        }

        inner.next_loop += 1;
        let id = LoopId(inner.next_loop);
        inner.loops.insert(
            id,
            ScheduledLoop {
                events,
                loop_length,
                start_offset,
                callback,
            },
        );

        Ok(id)
    }

    fn clear(&self, id: LoopId) -> Result<()> {
        let Ok(mut inner) = self.inner.lock() else {
            bail!("Failed to lock the transport..!")
        };

        inner.loops.remove(&id);
        Ok(())
    }

    fn is_scheduled(&self, id: LoopId) -> bool {
        self.inner
            .lock()
            .map(|inner| inner.loops.contains_key(&id))
            .unwrap_or(false)
    }
}
