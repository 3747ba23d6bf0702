use crate::model::duration::{DurationBag, DurationToken};
use crate::model::song::{Note, Song};
use log::debug;
use thiserror::Error;

/// What to do with a duration token that isn't in the known set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenPolicy {
    /// Skip the token, contributing nothing to the note's length.
    #[default]
    Lenient,

    /// Reject the whole track.
    Strict,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolveError {
    #[error("Unknown duration token '{token}' on note {note}")]
    UnknownToken { note: usize, token: String },
}

/// A note with its position on the track timeline, in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedNote {
    pub start: f64,
    pub duration: f64,
    pub pitches: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedTrack {
    pub notes: Vec<ProcessedNote>,
    /// Sum of every note's duration; also the loop length during playback.
    pub duration: f64,
    /// One measure at the song tempo, regardless of content.
    pub measure_duration: f64,
}

impl ProcessedTrack {
    /// Where playback of note `index` begins within a loop of this track.
    pub fn loop_offset(&self, index: usize) -> Option<f64> {
        let note = self.notes.get(index)?;
        if self.duration > 0.0 {
            Some(note.start.rem_euclid(self.duration))
        } else {
            Some(0.0)
        }
    }
}

/// Collects a note's duration tokens into a bag, applying `policy` to anything unrecognized.
pub fn duration_bag(
    note_index: usize,
    note: &Note,
    policy: TokenPolicy,
) -> Result<DurationBag, ResolveError> {
    let mut bag = DurationBag::new();

    for raw in note.duration.tokens() {
        match raw.parse::<DurationToken>() {
            Ok(token) => bag.add(token),
            Err(_) if policy == TokenPolicy::Lenient => {
                debug!(
                    "Skipping unknown duration token '{}' on note {}..!",
                    raw, note_index
                );
            }
            Err(_) => {
                return Err(ResolveError::UnknownToken {
                    note: note_index,
                    token: raw.clone(),
                });
            }
        }
    }

    Ok(bag)
}

/// Resolves the length of a single note in seconds.
pub fn resolve_note(
    tempo: f64,
    note_index: usize,
    note: &Note,
    policy: TokenPolicy,
) -> Result<ProcessedNote, ResolveError> {
    let bag = duration_bag(note_index, note, policy)?;

    Ok(ProcessedNote {
        start: 0.0,
        duration: bag.seconds(tempo),
        pitches: note.pitches.clone(),
    })
}

/// Lays a track's notes end to end on an absolute timeline.
///
/// An empty note list resolves to a single zero-length placeholder so that nothing
/// downstream ever sees an empty track. The tempo is not validated here.
pub fn resolve_track(
    tempo: f64,
    notes: &[Note],
    policy: TokenPolicy,
) -> Result<ProcessedTrack, ResolveError> {
    let measure_duration = DurationToken::Measure.seconds(tempo);

    if notes.is_empty() {
        debug!("Resolving an empty track as a single placeholder note..!");
        return Ok(ProcessedTrack {
            notes: vec![ProcessedNote {
                start: 0.0,
                duration: 0.0,
                pitches: Vec::new(),
            }],
            duration: 0.0,
            measure_duration,
        });
    }

    let mut cursor = 0.0;
    let mut processed = Vec::with_capacity(notes.len());

    for (i, note) in notes.iter().enumerate() {
        let mut resolved = resolve_note(tempo, i, note, policy)?;
        resolved.start = cursor;
        cursor += resolved.duration;
        processed.push(resolved);
    }

    Ok(ProcessedTrack {
        notes: processed,
        duration: cursor,
        measure_duration,
    })
}

pub fn resolve_song(song: &Song, policy: TokenPolicy) -> Result<Vec<ProcessedTrack>, ResolveError> {
    song.tracks
        .iter()
        .map(|track| resolve_track(song.tempo, &track.notes, policy))
        .collect()
}
