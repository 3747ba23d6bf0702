use crate::TokenPolicy;
use anyhow::{Result, anyhow};
use log::info;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

pub fn parse_policy(s: &str) -> TokenPolicy {
    match s.to_lowercase().as_str() {
        "l" | "lenient" | "skip" => TokenPolicy::Lenient,
        "s" | "strict" => TokenPolicy::Strict,
        other => {
            info!("Unknown token policy '{}', defaulting to `lenient`..!", other);
            TokenPolicy::Lenient
        }
    }
}

/// Parses a `track:note` pair of zero-based indices.
pub fn parse_note_ref(s: &str) -> Result<(usize, usize)> {
    let (track, note) = s
        .split_once(':')
        .ok_or_else(|| anyhow!("Expected `track:note`, got '{}'..!", s))?;

    let track = track
        .trim()
        .parse::<usize>()
        .map_err(|e| anyhow!("Bad track index '{}': {}", track, e))?;
    let note = note
        .trim()
        .parse::<usize>()
        .map_err(|e| anyhow!("Bad note index '{}': {}", note, e))?;

    Ok((track, note))
}

/// Scientific pitch name for a MIDI note number, with middle C (60) as `C4`.
pub fn pitch_label(midi: u8) -> String {
    let octave = (midi / 12) as i32 - 1;
    format!("{}{}", NOTE_NAMES[(midi % 12) as usize], octave)
}

pub fn chord_label(pitches: &[u8]) -> String {
    if pitches.is_empty() {
        return String::from("rest");
    }

    pitches
        .iter()
        .map(|&p| pitch_label(p))
        .collect::<Vec<_>>()
        .join("+")
}
