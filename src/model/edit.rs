//! Song editing actions.
//!
//! Every action takes the current song and returns a new one; the input is never
//! mutated, so callers can keep old values around as history.

use crate::model::song::{DurationSpec, Note, Song, Track};
use anyhow::{Result, bail};

fn track_mut(song: &mut Song, track: usize) -> Result<&mut Track> {
    let count = song.tracks.len();
    match song.tracks.get_mut(track) {
        Some(t) => Ok(t),
        None => bail!("Track {} does not exist, song has {} track(s)..!", track, count),
    }
}

fn note_mut(song: &mut Song, track: usize, note: usize) -> Result<&mut Note> {
    let t = track_mut(song, track)?;
    let count = t.notes.len();
    match t.notes.get_mut(note) {
        Some(n) => Ok(n),
        None => bail!(
            "Note {} does not exist in track {}, track has {} note(s)..!",
            note,
            track,
            count
        ),
    }
}

pub fn with_tempo(song: &Song, tempo: f64) -> Song {
    Song {
        tempo,
        ..song.clone()
    }
}

/// Inserts `note` before index `at`. Inserting at the track length appends.
pub fn with_note_inserted(song: &Song, track: usize, at: usize, note: Note) -> Result<Song> {
    let mut next = song.clone();
    let t = track_mut(&mut next, track)?;

    if at > t.notes.len() {
        bail!(
            "Cannot insert at {} in track {} with {} note(s)..!",
            at,
            track,
            t.notes.len()
        );
    }

    t.notes.insert(at, note);
    Ok(next)
}

/// Removes a note. Removing the last note leaves a placeholder so the track is never empty.
pub fn with_note_removed(song: &Song, track: usize, note: usize) -> Result<Song> {
    let mut next = song.clone();
    note_mut(&mut next, track, note)?;

    let t = track_mut(&mut next, track)?;
    t.notes.remove(note);
    if t.notes.is_empty() {
        t.notes.push(Note::placeholder());
    }

    Ok(next)
}

pub fn with_duration(
    song: &Song,
    track: usize,
    note: usize,
    duration: impl Into<DurationSpec>,
) -> Result<Song> {
    let mut next = song.clone();
    note_mut(&mut next, track, note)?.duration = duration.into();
    Ok(next)
}

pub fn with_pitches(song: &Song, track: usize, note: usize, pitches: &[u8]) -> Result<Song> {
    let mut next = song.clone();
    let n = note_mut(&mut next, track, note)?;

    let mut pitches = pitches.to_vec();
    pitches.sort_unstable();
    pitches.dedup();
    n.pitches = pitches;

    Ok(next)
}

/// Adds `pitch` to the note if absent, removes it otherwise. Pitches stay sorted.
pub fn with_pitch_toggled(song: &Song, track: usize, note: usize, pitch: u8) -> Result<Song> {
    let mut next = song.clone();
    let n = note_mut(&mut next, track, note)?;

    if let Some(pos) = n.pitches.iter().position(|&p| p == pitch) {
        n.pitches.remove(pos);
    } else {
        n.pitches.push(pitch);
        n.pitches.sort_unstable();
    }

    Ok(next)
}

/// Appends a track holding a single placeholder note.
pub fn with_track_added(song: &Song, instrument: usize) -> Song {
    let mut next = song.clone();
    next.tracks
        .push(Track::new(instrument, vec![Note::placeholder()]));
    next
}

pub fn with_track_removed(song: &Song, track: usize) -> Result<Song> {
    let mut next = song.clone();
    track_mut(&mut next, track)?;
    next.tracks.remove(track);
    Ok(next)
}
