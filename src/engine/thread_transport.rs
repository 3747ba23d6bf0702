use crate::engine::transport::{
    LoopCallback, LoopId, NoteEvent, Session, Transport, prepare_loop,
};
use anyhow::{Result, bail};
use log::{debug, warn};
use spin_sleep::{SpinSleeper, SpinStrategy};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const DEFAULT_BPM: f64 = 120.0;
const MAX_SLEEP_CHUNK_S: f64 = 0.010;
/// How late an event may be when its loop is scheduled and still fire.
const CATCH_UP_S: f64 = 0.050;

enum ControlMsg {
    Stop,
}

struct Worker {
    cancelled: Arc<AtomicBool>,
    control_tx: Sender<ControlMsg>,
    handle: JoinHandle<()>,
}

#[derive(Clone, Copy)]
struct Clock {
    session: Session,
    origin: Instant,
}

/// A wall-clock transport running every loop on its own playback thread.
pub struct ThreadTransport {
    bpm: Mutex<f64>,
    clock: Mutex<Option<Clock>>,
    next_session: AtomicU64,
    next_loop: AtomicU64,
    workers: Mutex<HashMap<LoopId, Worker>>,
}

impl Default for ThreadTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadTransport {
    pub fn new() -> Self {
        Self {
            bpm: Mutex::new(DEFAULT_BPM),
            clock: Mutex::new(None),
            next_session: AtomicU64::new(0),
            next_loop: AtomicU64::new(0),
            workers: Mutex::new(HashMap::new()),
        }
    }

    fn clock(&self) -> Option<Clock> {
        self.clock.lock().ok().and_then(|clock| *clock)
    }

    fn dispose(&self, id: LoopId, worker: Worker) {
        worker.cancelled.store(true, Ordering::SeqCst);
        let _ = worker.control_tx.send(ControlMsg::Stop);

        // A callback clearing its own loop must not wait on itself.
        if worker.handle.thread().id() == thread::current().id() {
            debug!("Loop {} cleared from its own playback thread..!", id.0);
            return;
        }

        if worker.handle.join().is_err() {
            warn!("Playback thread for loop {} panicked..!", id.0);
        } else {
            debug!("Playback thread for loop {} joined..!", id.0);
        }
    }

    fn dispose_all(&self) -> Result<()> {
        let workers: Vec<(LoopId, Worker)> = {
            let Ok(mut lock) = self.workers.lock() else {
                bail!("Failed to lock the loop workers..!")
            };
            lock.drain().collect()
        };

        for (id, worker) in workers {
            self.dispose(id, worker);
        }

        Ok(())
    }
}

fn stop_requested(ctrl_rx: &Receiver<ControlMsg>, cancelled: &AtomicBool) -> bool {
    if cancelled.load(Ordering::SeqCst) {
        return true;
    }

    match ctrl_rx.try_recv() {
        Ok(ControlMsg::Stop) | Err(TryRecvError::Disconnected) => true,
        Err(TryRecvError::Empty) => false,
    }
}

struct LoopRun {
    id: LoopId,
    events: Vec<(f64, NoteEvent)>,
    loop_length: f64,
    start_offset: f64,
    /// Session time zero, shared by every loop on the transport.
    origin: Instant,
    /// Timeline seconds at which the loop joined.
    joined: f64,
    callback: LoopCallback,
}

fn run_loop(run: LoopRun, ctrl_rx: Receiver<ControlMsg>, cancelled: Arc<AtomicBool>) {
    if run.events.is_empty() {
        return;
    }

    let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
    let len = run.events.len();

    // Loop time at the join point; anything older than the catch-up window is skipped.
    let local = run.start_offset + (run.joined - CATCH_UP_S).max(0.0);
    let mut iteration = (local / run.loop_length).floor() as u64;
    let within = local - iteration as f64 * run.loop_length;
    let mut index = run
        .events
        .iter()
        .position(|(offset, _)| *offset >= within)
        .unwrap_or(len);
    if index == len {
        index = 0;
        iteration += 1;
    }

    loop {
        let (offset, event) = &run.events[index];
        let since_origin = iteration as f64 * run.loop_length + offset - run.start_offset;
        let target = match Duration::try_from_secs_f64(since_origin.max(0.0)) {
            Ok(elapsed) => run.origin.checked_add(elapsed),
            Err(why) => {
                warn!("Loop {} cannot wait {}s, stopping it: {}..!", run.id.0, since_origin, why);
                return;
            }
        };
        let Some(target) = target else {
            warn!("Loop {} ran past the end of the clock, stopping it..!", run.id.0);
            return;
        };

        loop {
            if stop_requested(&ctrl_rx, &cancelled) {
                return;
            }

            let now = Instant::now();
            if now >= target {
                break;
            }

            let remaining = (target - now).as_secs_f64();
            sleeper.sleep(Duration::from_secs_f64(remaining.min(MAX_SLEEP_CHUNK_S)));
        }

        if cancelled.load(Ordering::SeqCst) {
            return;
        }

        (run.callback)(event, since_origin.max(0.0));

        index += 1;
        if index == len {
            index = 0;
            iteration += 1;
        }
    }
}

impl Transport for ThreadTransport {
    fn set_bpm(&self, bpm: f64) {
        let Ok(mut lock) = self.bpm.lock() else {
            warn!("Failed to lock the transport tempo for modification..!");
            return;
        };

        *lock = bpm;
    }

    fn bpm(&self) -> f64 {
        self.bpm.lock().map(|bpm| *bpm).unwrap_or(DEFAULT_BPM)
    }

    fn start(&self) -> Result<Session> {
        let Ok(mut lock) = self.clock.lock() else {
            bail!("Failed to lock the transport clock..!")
        };

        if let Some(clock) = *lock {
            return Ok(clock.session);
        }

        let session = Session(self.next_session.fetch_add(1, Ordering::SeqCst) + 1);
        *lock = Some(Clock {
            session,
            origin: Instant::now(),
        });

        debug!("Transport started, session {}..!", session.0);
        Ok(session)
    }

    fn stop(&self) -> Result<()> {
        self.dispose_all()?;

        let Ok(mut lock) = self.clock.lock() else {
            bail!("Failed to lock the transport clock..!")
        };

        if let Some(clock) = lock.take() {
            debug!("Transport stopped, session {}..!", clock.session.0);
        }

        Ok(())
    }

    fn cancel(&self) -> Result<()> {
        self.dispose_all()
    }

    fn session(&self) -> Option<Session> {
        self.clock().map(|clock| clock.session)
    }

    fn position(&self) -> f64 {
        self.clock()
            .map(|clock| clock.origin.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn schedule_loop(
        &self,
        events: Vec<(f64, NoteEvent)>,
        loop_length: f64,
        start_offset: f64,
        callback: LoopCallback,
    ) -> Result<LoopId> {
        let events = prepare_loop(events, loop_length, start_offset)?;

        let Some(clock) = self.clock() else {
            bail!("Cannot schedule a loop on a stopped transport..!")
        };

        let id = LoopId(self.next_loop.fetch_add(1, Ordering::SeqCst) + 1);
        let cancelled = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel::<ControlMsg>();

        let run = LoopRun {
            id,
            events,
            loop_length,
            start_offset,
            origin: clock.origin,
            joined: clock.origin.elapsed().as_secs_f64(),
            callback,
        };

        let flag = Arc::clone(&cancelled);
        let handle = thread::Builder::new()
            .name(format!("loop-{}", id.0))
            .spawn(move || run_loop(run, rx, flag))?;

        let Ok(mut workers) = self.workers.lock() else {
            cancelled.store(true, Ordering::SeqCst);
            bail!("Failed to lock the loop workers..!")
        };

        workers.insert(
            id,
            Worker {
                cancelled,
                control_tx: tx,
                handle,
            },
        );

        Ok(id)
    }

    fn clear(&self, id: LoopId) -> Result<()> {
        let worker = {
            let Ok(mut lock) = self.workers.lock() else {
                bail!("Failed to lock the loop workers..!")
            };
            lock.remove(&id)
        };

        if let Some(worker) = worker {
            self.dispose(id, worker);
        }

        Ok(())
    }

    fn is_scheduled(&self, id: LoopId) -> bool {
        self.workers
            .lock()
            .map(|workers| workers.contains_key(&id))
            .unwrap_or(false)
    }
}

impl Drop for ThreadTransport {
    fn drop(&mut self) {
        if let Err(why) = self.dispose_all() {
            warn!("Failed to stop playback threads on drop: {:?}", why);
        }
    }
}
