use serde::{Deserialize, Serialize};

/// How long a note lasts: a single token, or several tokens tied together and summed.
///
/// Tokens are kept as raw strings so that unrecognized ones survive loading and are
/// handled by the resolver's [`TokenPolicy`](crate::TokenPolicy).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum DurationSpec {
    Single(String),
    Tied(Vec<String>),
}

impl DurationSpec {
    pub fn tokens(&self) -> &[String] {
        match self {
            DurationSpec::Single(token) => std::slice::from_ref(token),
            DurationSpec::Tied(tokens) => tokens,
        }
    }
}

impl Default for DurationSpec {
    fn default() -> Self {
        DurationSpec::Tied(Vec::new())
    }
}

impl From<&str> for DurationSpec {
    fn from(token: &str) -> Self {
        DurationSpec::Single(token.to_owned())
    }
}

impl From<&[&str]> for DurationSpec {
    fn from(tokens: &[&str]) -> Self {
        DurationSpec::Tied(tokens.iter().map(|t| t.to_string()).collect())
    }
}

/// Zero pitches is a rest, one is a single note, more is a chord.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct Note {
    #[serde(default)]
    pub pitches: Vec<u8>,
    #[serde(default)]
    pub duration: DurationSpec,
}

impl Note {
    pub fn new(pitches: &[u8], duration: impl Into<DurationSpec>) -> Self {
        Self {
            pitches: pitches.to_vec(),
            duration: duration.into(),
        }
    }

    pub fn rest(duration: impl Into<DurationSpec>) -> Self {
        Self::new(&[], duration)
    }

    /// The stand-in note used wherever a track would otherwise be empty.
    pub fn placeholder() -> Self {
        Self::default()
    }

    pub fn is_rest(&self) -> bool {
        self.pitches.is_empty()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Track {
    /// Index into the synth's instrument list.
    #[serde(default)]
    pub instrument: usize,
    pub notes: Vec<Note>,
}

impl Track {
    pub fn new(instrument: usize, notes: Vec<Note>) -> Self {
        Self { instrument, notes }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Song {
    #[serde(default)]
    pub title: Option<String>,
    /// Beats per minute.
    pub tempo: f64,
    pub tracks: Vec<Track>,
}

impl Song {
    pub fn new(tempo: f64, tracks: Vec<Track>) -> Self {
        Self {
            title: None,
            tempo,
            tracks,
        }
    }

    pub fn note(&self, track: usize, note: usize) -> Option<&Note> {
        self.tracks.get(track).and_then(|t| t.notes.get(note))
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
