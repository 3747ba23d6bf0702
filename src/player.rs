use crate::engine::{LoopCallback, LoopId, NoteEvent, Session, Synth, Transport};
use crate::model::song::Song;
use crate::resolver::{ProcessedTrack, TokenPolicy, resolve_note, resolve_song};
use crate::util::chord_label;
use anyhow::{Result, bail};
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

/// `(track, note)` pairs currently highlighted, at most one per track.
pub type PlayingNotes = BTreeSet<(usize, usize)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
}

type Observers = Mutex<Vec<Sender<PlayingNotes>>>;

/// Loops every track of a song on a shared transport and feeds the notes to a synth.
///
/// The transport may be shared with other players; whichever calls [`Player::play`]
/// last owns it, and earlier schedules are silently dropped.
pub struct Player<T: Transport, S: Synth> {
    policy: TokenPolicy,
    verbose: bool,
    transport: Arc<T>,
    synth: Arc<S>,
    loops: Mutex<Vec<LoopId>>,
    session: Mutex<Option<Session>>,
    playing: Arc<Mutex<BTreeMap<usize, usize>>>,
    observers: Arc<Observers>,
}

fn snapshot(playing: &BTreeMap<usize, usize>) -> PlayingNotes {
    playing.iter().map(|(&track, &note)| (track, note)).collect()
}

fn publish(observers: &Observers, notes: PlayingNotes) {
    let Ok(mut observers) = observers.lock() else {
        warn!("Failed to lock the playing-notes observers..!");
        return;
    };

    observers.retain(|tx| tx.send(notes.clone()).is_ok());
}

fn check_tempo(tempo: f64) -> Result<()> {
    if !tempo.is_finite() || tempo <= 0.0 {
        bail!("Tempo must be a positive number of BPM, got {}..!", tempo)
    }

    Ok(())
}

impl<T: Transport + 'static, S: Synth + 'static> Player<T, S> {
    pub fn new(transport: Arc<T>, synth: Arc<S>, policy: TokenPolicy, verbose: bool) -> Self {
        Self {
            policy,
            verbose,
            transport,
            synth,
            loops: Mutex::new(Vec::new()),
            session: Mutex::new(None),
            playing: Arc::new(Mutex::new(BTreeMap::new())),
            observers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn synth(&self) -> &Arc<S> {
        &self.synth
    }

    /// Playing only while this player's session still owns the transport.
    pub fn state(&self) -> PlaybackState {
        let mine = self.session.lock().ok().and_then(|session| *session);

        match mine {
            Some(session) if self.transport.session() == Some(session) => PlaybackState::Playing,
            _ => PlaybackState::Idle,
        }
    }

    /// Snapshot of the notes most recently triggered on each track.
    /// Empty once another session has taken the transport over.
    pub fn playing_notes(&self) -> PlayingNotes {
        let idle = self.state() == PlaybackState::Idle;

        let Ok(mut playing) = self.playing.lock() else {
            warn!("Failed to lock the playing notes..!");
            return PlayingNotes::new();
        };

        if idle && !playing.is_empty() {
            debug!("Transport was taken over, dropping stale highlights..!");
            playing.clear();
            drop(playing);
            publish(&self.observers, PlayingNotes::new());
            return PlayingNotes::new();
        }

        snapshot(&playing)
    }

    /// Receives a fresh snapshot every time the playing notes change.
    pub fn subscribe(&self) -> Receiver<PlayingNotes> {
        let (tx, rx) = mpsc::channel();

        if let Ok(mut observers) = self.observers.lock() {
            observers.push(tx);
        } else {
            warn!("Failed to register a playing-notes observer..!");
        }

        rx
    }

    /// Restarts the transport and loops every track of `song` on it, optionally
    /// starting from the given `(track, note)`.
    pub fn play(&self, song: &Song, start_at: Option<(usize, usize)>) -> Result<()> {
        check_tempo(song.tempo)?;
        let tracks = resolve_song(song, self.policy)?;

        self.stop()?;
        self.transport.stop()?;
        self.transport.set_bpm(song.tempo);
        let session = self.transport.start()?;

        {
            let Ok(mut lock) = self.session.lock() else {
                bail!("Failed to lock the player session..!")
            };
            *lock = Some(session);
        }

        if let Err(why) = self.schedule_tracks(song, &tracks, start_at) {
            let _ = self.stop();
            return Err(why);
        }

        info!(
            "Playing '{}' at {} BPM with {} track(s)..!",
            song.title.as_deref().unwrap_or("No Title"),
            song.tempo,
            tracks.len()
        );

        Ok(())
    }

    fn seek_offset(
        &self,
        tracks: &[ProcessedTrack],
        start_at: Option<(usize, usize)>,
    ) -> Option<(usize, f64)> {
        let (track, note) = start_at?;

        let Some(processed) = tracks.get(track) else {
            warn!(
                "Cannot start at track {}, song only has {} track(s)..! Starting from the top.",
                track,
                tracks.len()
            );
            return None;
        };

        match processed.loop_offset(note) {
            Some(offset) => Some((track, offset)),
            None => {
                warn!(
                    "Cannot start at note {} of track {} with {} note(s)..! Starting from the top.",
                    note,
                    track,
                    processed.notes.len()
                );
                None
            }
        }
    }

    fn schedule_tracks(
        &self,
        song: &Song,
        tracks: &[ProcessedTrack],
        start_at: Option<(usize, usize)>,
    ) -> Result<()> {
        let seek = self.seek_offset(tracks, start_at);

        for (i, (track, processed)) in song.tracks.iter().zip(tracks.iter()).enumerate() {
            if processed.duration <= 0.0 {
                warn!("Track {} has no length, so it will not be looped..!", i);
                continue;
            }

            let start_offset = match seek {
                Some((t, offset)) if t == i => offset,
                _ => 0.0,
            };

            let events: Vec<(f64, NoteEvent)> = processed
                .notes
                .iter()
                .enumerate()
                .map(|(n, note)| {
                    (
                        note.start,
                        NoteEvent {
                            track: i,
                            note: n,
                            instrument: track.instrument,
                            pitches: note.pitches.clone(),
                            duration: note.duration,
                        },
                    )
                })
                .collect();

            let id = self.transport.schedule_loop(
                events,
                processed.duration,
                start_offset,
                self.note_callback(),
            )?;

            debug!(
                "Scheduled track {} as loop {}: {} note(s), {:.3}s long, starting at {:.3}s..!",
                i,
                id.0,
                processed.notes.len(),
                processed.duration,
                start_offset
            );

            let Ok(mut loops) = self.loops.lock() else {
                bail!("Failed to lock the player loops..!")
            };
            loops.push(id);
        }

        Ok(())
    }

    fn note_callback(&self) -> LoopCallback {
        let playing = Arc::clone(&self.playing);
        let observers = Arc::clone(&self.observers);
        let synth = Arc::clone(&self.synth);
        let verbose = self.verbose;

        Arc::new(move |event: &NoteEvent, at: f64| {
            let notes = {
                let Ok(mut playing) = playing.lock() else {
                    warn!("Failed to lock the playing notes..!");
                    return;
                };
                playing.insert(event.track, event.note);
                snapshot(&playing)
            };
            publish(&observers, notes);

            if verbose {
                info!(
                    "Track {} note {} ({}) at {:.3}s",
                    event.track,
                    event.note,
                    chord_label(&event.pitches),
                    at
                );
            }

            if event.pitches.is_empty() {
                return;
            }

            if let Err(why) = synth.play(
                event.instrument,
                &event.pitches,
                Some(event.duration),
                Some(at),
            ) {
                warn!(
                    "Synth error for track {} note {} at {:.3}s | why: {:?}",
                    event.track, event.note, at, why
                );
            }
        })
    }

    /// Sounds one note right away, leaving any running schedule alone.
    pub fn play_note(&self, song: &Song, track: usize, note: usize) -> Result<()> {
        check_tempo(song.tempo)?;
        let Some(n) = song.note(track, note) else {
            bail!("No note {} in track {}..!", note, track)
        };

        let instrument = song.tracks[track].instrument;
        let processed = resolve_note(song.tempo, note, n, self.policy)?;

        if processed.pitches.is_empty() {
            debug!("Track {} note {} is a rest, nothing to play..!", track, note);
            return Ok(());
        }

        self.synth
            .play(instrument, &processed.pitches, Some(processed.duration), None)
    }

    /// Cancels this player's loops and halts the transport if it still owns it.
    /// Stopping an idle player changes nothing.
    pub fn stop(&self) -> Result<()> {
        let ids = {
            let Ok(mut lock) = self.loops.lock() else {
                bail!("Failed to lock the player loops..!")
            };
            std::mem::take(&mut *lock)
        };

        let session = {
            let Ok(mut lock) = self.session.lock() else {
                bail!("Failed to lock the player session..!")
            };
            lock.take()
        };

        for id in ids.iter() {
            self.transport.clear(*id)?;
        }

        if let Some(session) = session {
            if self.transport.session() == Some(session) {
                self.transport.stop()?;
                debug!("Stopped transport session {}..!", session.0);
            } else {
                debug!("Transport was taken over by another session, leaving it running..!");
            }

            if let Err(why) = self.synth.release_all() {
                warn!("Failed to release sounding notes: {:?}", why);
            }

            info!("Stopped playback of {} loop(s)..!", ids.len());
        }

        let was_playing = {
            let Ok(mut playing) = self.playing.lock() else {
                bail!("Failed to lock the playing notes..!")
            };
            let was_playing = !playing.is_empty();
            playing.clear();
            was_playing
        };

        if was_playing {
            publish(&self.observers, PlayingNotes::new());
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::{LogSynth, ManualTransport};
    use crate::model::song::{DurationSpec, Note, Track};

    #[derive(Default)]
    struct RecordingSynth {
        played: Mutex<Vec<(usize, Vec<u8>, Option<f64>, Option<f64>)>>,
    }

    impl RecordingSynth {
        fn pitches(&self) -> Vec<Vec<u8>> {
            self.played
                .lock()
                .unwrap()
                .iter()
                .map(|(_, p, _, _)| p.clone())
                .collect()
        }
    }

    impl Synth for RecordingSynth {
        fn play(
            &self,
            instrument: usize,
            pitches: &[u8],
            duration: Option<f64>,
            at_time: Option<f64>,
        ) -> Result<()> {
            self.played
                .lock()
                .unwrap()
                .push((instrument, pitches.to_vec(), duration, at_time));
            Ok(())
        }

        fn stop(&self, _: usize, _: &[u8]) -> Result<()> {
            Ok(())
        }

        fn playing_notes(&self) -> BTreeMap<usize, BTreeSet<u8>> {
            BTreeMap::new()
        }
    }

    type TestPlayer = Player<ManualTransport, RecordingSynth>;

    fn player() -> TestPlayer {
        Player::new(
            Arc::new(ManualTransport::new()),
            Arc::new(RecordingSynth::default()),
            TokenPolicy::Lenient,
            false,
        )
    }

    /// Track 0: four quarters (2s loop). Track 1: half + rest (1.5s loop).
    fn song() -> Song {
        Song::new(
            120.0,
            vec![
                Track::new(
                    0,
                    vec![
                        Note::new(&[60], "4n"),
                        Note::new(&[62], "4n"),
                        Note::new(&[64], "4n"),
                        Note::new(&[65], "4n"),
                    ],
                ),
                Track::new(3, vec![Note::new(&[48, 55], "2n"), Note::rest("4n")]),
            ],
        )
    }

    fn set(pairs: &[(usize, usize)]) -> PlayingNotes {
        pairs.iter().copied().collect()
    }

    #[test]
    fn first_notes_fire_immediately() {
        env_logger::try_init().unwrap_or(());

        let p = player();
        p.play(&song(), None).unwrap();
        assert_eq!(p.state(), PlaybackState::Playing);

        p.transport().advance(0.1).unwrap();
        assert_eq!(p.playing_notes(), set(&[(0, 0), (1, 0)]));

        let played = p.synth().played.lock().unwrap().clone();
        assert_eq!(played.len(), 2);
        assert!(played.contains(&(0, vec![60], Some(0.5), Some(0.0))));
        assert!(played.contains(&(3, vec![48, 55], Some(1.0), Some(0.0))));
    }

    #[test]
    fn only_the_latest_note_per_track_is_playing() {
        let p = player();
        p.play(&song(), None).unwrap();

        p.transport().advance(1.2).unwrap();
        assert_eq!(p.playing_notes(), set(&[(0, 2), (1, 1)]));

        // Rests highlight but never reach the synth.
        assert!(!p.synth().pitches().contains(&Vec::new()));
    }

    #[test]
    fn tracks_loop_at_their_own_length() {
        let p = player();
        p.play(&song(), None).unwrap();

        // Track 1 wraps at 1.5s, track 0 is still on its last note.
        p.transport().advance(1.6).unwrap();
        assert_eq!(p.playing_notes(), set(&[(0, 3), (1, 0)]));

        // Track 0 wraps at 2.0s, track 1 is still holding its chord.
        p.transport().advance(0.5).unwrap();
        assert_eq!(p.playing_notes(), set(&[(0, 0), (1, 0)]));

        // Both reach note 1 together at 2.5s, out of phase with where they began.
        p.transport().advance(0.5).unwrap();
        assert_eq!(p.playing_notes(), set(&[(0, 1), (1, 1)]));
    }

    #[test]
    fn seeking_offsets_only_the_chosen_track() {
        let p = player();
        p.play(&song(), Some((0, 2))).unwrap();

        p.transport().advance(0.1).unwrap();
        assert_eq!(p.playing_notes(), set(&[(0, 2), (1, 0)]));

        p.transport().advance(0.5).unwrap();
        assert_eq!(p.playing_notes(), set(&[(0, 3), (1, 0)]));

        p.transport().advance(0.5).unwrap();
        assert_eq!(p.playing_notes(), set(&[(0, 0), (1, 1)]));
    }

    #[test]
    fn seeking_out_of_range_starts_from_the_top() {
        let p = player();
        p.play(&song(), Some((0, 42))).unwrap();
        p.transport().advance(0.1).unwrap();
        assert_eq!(p.playing_notes(), set(&[(0, 0), (1, 0)]));

        p.play(&song(), Some((9, 0))).unwrap();
        p.transport().advance(0.1).unwrap();
        assert_eq!(p.playing_notes(), set(&[(0, 0), (1, 0)]));
    }

    #[test]
    fn stop_is_idempotent_and_silences_the_schedule() {
        let p = player();
        p.stop().unwrap();
        assert!(p.playing_notes().is_empty());
        assert_eq!(p.state(), PlaybackState::Idle);

        p.play(&song(), None).unwrap();
        p.transport().advance(0.7).unwrap();
        let fired = p.synth().pitches().len();

        p.stop().unwrap();
        assert!(p.playing_notes().is_empty());
        assert_eq!(p.state(), PlaybackState::Idle);
        assert!(!p.transport().is_running());
        assert_eq!(p.transport().loop_count(), 0);

        p.stop().unwrap();
        assert!(p.playing_notes().is_empty());

        p.transport().advance(5.0).unwrap();
        assert_eq!(p.synth().pitches().len(), fired);
    }

    #[test]
    fn replaying_replaces_the_previous_schedule() {
        let p = player();
        p.play(&song(), None).unwrap();
        p.transport().advance(0.1).unwrap();

        let other = Song::new(60.0, vec![Track::new(0, vec![Note::new(&[90], "4n")])]);
        p.play(&other, None).unwrap();
        let before = p.synth().pitches().len();

        p.transport().advance(10.0).unwrap();
        let after = p.synth().pitches();
        assert!(after[before..].iter().all(|pitches| pitches == &vec![90]));
        assert_eq!(after.len() - before, 10);
        assert_eq!(p.transport().loop_count(), 1);
    }

    #[test]
    fn second_player_preempts_the_first() {
        let transport = Arc::new(ManualTransport::new());
        let first = Player::new(
            Arc::clone(&transport),
            Arc::new(RecordingSynth::default()),
            TokenPolicy::Lenient,
            false,
        );
        let second = Player::new(
            Arc::clone(&transport),
            Arc::new(RecordingSynth::default()),
            TokenPolicy::Lenient,
            false,
        );

        let first_updates = first.subscribe();

        first.play(&song(), None).unwrap();
        transport.advance(0.6).unwrap();
        let heard = first.synth().pitches().len();
        assert_eq!(first.playing_notes(), set(&[(0, 1), (1, 0)]));

        second.play(&song(), None).unwrap();
        assert_eq!(first.state(), PlaybackState::Idle);
        assert_eq!(second.state(), PlaybackState::Playing);

        transport.advance(3.0).unwrap();
        assert_eq!(first.synth().pitches().len(), heard);
        assert!(!second.synth().pitches().is_empty());

        // Nothing of the first schedule is still running, so nothing is highlighted.
        assert!(first.playing_notes().is_empty());
        assert!(!second.playing_notes().is_empty());
        let last = first_updates.try_iter().last().unwrap();
        assert!(last.is_empty());

        // The pre-empted player must not halt the new owner's clock.
        first.stop().unwrap();
        assert_eq!(second.state(), PlaybackState::Playing);
        assert_eq!(transport.loop_count(), 2);
    }

    #[test]
    fn play_note_auditions_without_touching_playback() {
        let p = player();
        p.play_note(&song(), 1, 0).unwrap();
        assert_eq!(p.state(), PlaybackState::Idle);
        assert_eq!(
            p.synth().played.lock().unwrap()[0],
            (3, vec![48, 55], Some(1.0), None)
        );

        p.play_note(&song(), 1, 1).unwrap();
        assert_eq!(p.synth().pitches().len(), 1);

        assert!(p.play_note(&song(), 0, 4).is_err());
        assert!(p.play_note(&song(), 2, 0).is_err());
    }

    #[test]
    fn play_note_refuses_a_broken_tempo() {
        let p: Player<ManualTransport, LogSynth> = Player::new(
            Arc::new(ManualTransport::new()),
            Arc::new(LogSynth::new(false)),
            TokenPolicy::Lenient,
            false,
        );

        for tempo in [0.0, -90.0, f64::NAN, f64::INFINITY] {
            let mut s = song();
            s.tempo = tempo;
            assert!(p.play_note(&s, 0, 0).is_err());
        }
        assert!(p.synth().playing_notes().is_empty());

        p.play_note(&song(), 0, 0).unwrap();
        assert_eq!(p.synth().playing_notes()[&0], BTreeSet::from([60]));
    }

    #[test]
    fn seeking_fires_every_note_sharing_the_target_start() {
        let p = player();
        let s = Song::new(
            120.0,
            vec![Track::new(
                0,
                vec![
                    Note::new(&[60], "4n"),
                    Note::new(&[62], "4n"),
                    Note::new(&[64], DurationSpec::default()),
                    Note::new(&[65], "4n"),
                ],
            )],
        );

        // Note 2 has no length and starts where note 3 does.
        p.play(&s, Some((0, 3))).unwrap();
        p.transport().advance(0.1).unwrap();

        assert_eq!(p.playing_notes(), set(&[(0, 3)]));
        assert_eq!(p.synth().pitches(), vec![vec![64], vec![65]]);
    }

    #[test]
    fn zero_length_tracks_are_not_looped() {
        let p = player();
        let s = Song::new(
            120.0,
            vec![
                Track::new(0, Vec::new()),
                Track::new(0, vec![Note::placeholder()]),
                Track::new(0, vec![Note::new(&[60], "4n")]),
            ],
        );

        p.play(&s, None).unwrap();
        assert_eq!(p.transport().loop_count(), 1);

        p.transport().advance(1.1).unwrap();
        assert_eq!(p.playing_notes(), set(&[(2, 0)]));
        assert_eq!(p.synth().pitches().len(), 3);
    }

    #[test]
    fn bad_tempo_is_rejected_before_anything_changes() {
        let p = player();
        p.play(&song(), None).unwrap();

        let mut broken = song();
        broken.tempo = 0.0;
        assert!(p.play(&broken, None).is_err());
        broken.tempo = f64::NAN;
        assert!(p.play(&broken, None).is_err());

        assert_eq!(p.state(), PlaybackState::Playing);
    }

    #[test]
    fn strict_policy_refuses_unknown_tokens() {
        let p = Player::new(
            Arc::new(ManualTransport::new()),
            Arc::new(RecordingSynth::default()),
            TokenPolicy::Strict,
            false,
        );

        let s = Song::new(120.0, vec![Track::new(0, vec![Note::new(&[60], "5n")])]);
        assert!(p.play(&s, None).is_err());
        assert!(p.play_note(&s, 0, 0).is_err());
        assert_eq!(p.state(), PlaybackState::Idle);
    }

    #[test]
    fn observers_see_every_change() {
        let p = player();
        let rx = p.subscribe();

        p.play(&song(), None).unwrap();
        p.transport().advance(0.6).unwrap();
        p.stop().unwrap();

        let snapshots: Vec<PlayingNotes> = rx.try_iter().collect();
        assert_eq!(
            snapshots,
            vec![
                set(&[(0, 0)]),
                set(&[(0, 0), (1, 0)]),
                set(&[(0, 1), (1, 0)]),
                PlayingNotes::new(),
            ]
        );
    }
}
