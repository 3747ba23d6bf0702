use crate::model::song::Song;
use crate::resolver::{TokenPolicy, resolve_song};
use anyhow::{Result, anyhow, bail};
use log::{debug, info};
use midly::num::{u4, u7, u15, u24, u28};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use std::fs;
use std::path::Path;

const TICKS_PER_QUARTER: u16 = 480;
const MICROSECONDS_PER_MINUTE: f64 = 60_000_000.0;
const DEFAULT_VELOCITY: u8 = 100;
const MAX_U24: u32 = (1 << 24) - 1;
const MAX_U28: u32 = (1 << 28) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Point {
    tick: u32,
    /// Note-offs sort ahead of note-ons at the same tick.
    is_on: bool,
    key: u8,
}

fn seconds_to_ticks(seconds: f64, tempo: f64) -> u32 {
    let ticks = (seconds * tempo / 60.0 * TICKS_PER_QUARTER as f64).round();
    ticks.clamp(0.0, MAX_U28 as f64) as u32
}

fn to_track_events<'a>(mut points: Vec<Point>, channel: u8, end_tick: u32) -> Vec<TrackEvent<'a>> {
    points.sort();

    let mut last_tick = 0;
    let mut events = Vec::with_capacity(points.len() + 1);
    for pt in points {
        let key = u7::new(pt.key.min(127));
        let message = if pt.is_on {
            MidiMessage::NoteOn {
                key,
                vel: u7::new(DEFAULT_VELOCITY),
            }
        } else {
            MidiMessage::NoteOff {
                key,
                vel: u7::new(0),
            }
        };

        events.push(TrackEvent {
            delta: u28::new(pt.tick - last_tick),
            kind: TrackEventKind::Midi {
                channel: u4::new(channel),
                message,
            },
        });
        last_tick = pt.tick;
    }

    events.push(TrackEvent {
        delta: u28::new(end_tick.saturating_sub(last_tick)),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });

    events
}

/// Renders one pass through every track of `song` as a format 1 standard MIDI file.
///
/// Track 0 carries the tempo; each song track follows on its own MIDI track, on
/// channel `instrument % 16`.
pub fn song_to_midi_bytes(song: &Song, policy: TokenPolicy) -> Result<Vec<u8>> {
    if !song.tempo.is_finite() || song.tempo <= 0.0 {
        bail!("Cannot export a song with a tempo of {} BPM..!", song.tempo)
    }

    let tracks = resolve_song(song, policy)?;
    let mpqn = (MICROSECONDS_PER_MINUTE / song.tempo).round().clamp(1.0, MAX_U24 as f64) as u32;

    let mut smf = Smf::new(Header::new(
        Format::Parallel,
        Timing::Metrical(u15::new(TICKS_PER_QUARTER)),
    ));

    let mut conductor = Vec::new();
    if let Some(title) = song.title.as_deref() {
        conductor.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::TrackName(title.as_bytes())),
        });
    }
    conductor.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(mpqn))),
    });
    conductor.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });
    smf.tracks.push(conductor);

    for (track, processed) in song.tracks.iter().zip(tracks.iter()) {
        let mut points = Vec::new();

        for note in processed.notes.iter() {
            let on = seconds_to_ticks(note.start, song.tempo);
            let off = seconds_to_ticks(note.start + note.duration, song.tempo);
            if off <= on {
                continue;
            }

            for &key in note.pitches.iter() {
                points.push(Point {
                    tick: on,
                    is_on: true,
                    key,
                });
                points.push(Point {
                    tick: off,
                    is_on: false,
                    key,
                });
            }
        }

        let end_tick = seconds_to_ticks(processed.duration, song.tempo);
        debug!(
            "Exporting track with {} note event(s) ending at tick {}..!",
            points.len(),
            end_tick
        );

        let channel = (track.instrument % 16) as u8;
        smf.tracks.push(to_track_events(points, channel, end_tick));
    }

    let mut bytes = Vec::new();
    smf.write_std(&mut bytes)
        .map_err(|e| anyhow!("Failed to encode MIDI: {:?}", e))?;

    Ok(bytes)
}

pub fn export_midi_file<P: AsRef<Path>>(song: &Song, path: P, policy: TokenPolicy) -> Result<()> {
    let bytes = song_to_midi_bytes(song, policy)?;

    fs::write(path.as_ref(), &bytes).map_err(|e| {
        anyhow!(
            "Failed to write MIDI file {}: {}",
            path.as_ref().display(),
            e
        )
    })?;

    info!(
        "Exported {} track(s) to '{}'..!",
        song.tracks.len(),
        path.as_ref().display()
    );

    Ok(())
}
