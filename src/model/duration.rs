use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Every song is assumed to be in 4/4.
pub const BEATS_PER_MEASURE: f64 = 4.0;
pub const SECONDS_PER_MINUTE: f64 = 60.0;

/// A symbolic musical duration whose length in seconds depends on the tempo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DurationToken {
    Measure,
    Whole,
    DottedWhole,
    Half,
    DottedHalf,
    HalfTriplet,
    Quarter,
    DottedQuarter,
    QuarterTriplet,
    Eighth,
    DottedEighth,
    EighthTriplet,
    Sixteenth,
    DottedSixteenth,
    SixteenthTriplet,
    ThirtySecond,
    DottedThirtySecond,
    ThirtySecondTriplet,
}

impl DurationToken {
    pub const ALL: [DurationToken; 18] = [
        DurationToken::Measure,
        DurationToken::Whole,
        DurationToken::DottedWhole,
        DurationToken::Half,
        DurationToken::DottedHalf,
        DurationToken::HalfTriplet,
        DurationToken::Quarter,
        DurationToken::DottedQuarter,
        DurationToken::QuarterTriplet,
        DurationToken::Eighth,
        DurationToken::DottedEighth,
        DurationToken::EighthTriplet,
        DurationToken::Sixteenth,
        DurationToken::DottedSixteenth,
        DurationToken::SixteenthTriplet,
        DurationToken::ThirtySecond,
        DurationToken::DottedThirtySecond,
        DurationToken::ThirtySecondTriplet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DurationToken::Measure => "1m",
            DurationToken::Whole => "1n",
            DurationToken::DottedWhole => "1n.",
            DurationToken::Half => "2n",
            DurationToken::DottedHalf => "2n.",
            DurationToken::HalfTriplet => "2t",
            DurationToken::Quarter => "4n",
            DurationToken::DottedQuarter => "4n.",
            DurationToken::QuarterTriplet => "4t",
            DurationToken::Eighth => "8n",
            DurationToken::DottedEighth => "8n.",
            DurationToken::EighthTriplet => "8t",
            DurationToken::Sixteenth => "16n",
            DurationToken::DottedSixteenth => "16n.",
            DurationToken::SixteenthTriplet => "16t",
            DurationToken::ThirtySecond => "32n",
            DurationToken::DottedThirtySecond => "32n.",
            DurationToken::ThirtySecondTriplet => "32t",
        }
    }

    /// Length in quarter-note beats.
    pub fn beats(&self) -> f64 {
        const DOTTED: f64 = 1.5;
        const TRIPLET: f64 = 2.0 / 3.0;

        match self {
            DurationToken::Measure => BEATS_PER_MEASURE,
            DurationToken::Whole => 4.0,
            DurationToken::DottedWhole => 4.0 * DOTTED,
            DurationToken::Half => 2.0,
            DurationToken::DottedHalf => 2.0 * DOTTED,
            DurationToken::HalfTriplet => 2.0 * TRIPLET,
            DurationToken::Quarter => 1.0,
            DurationToken::DottedQuarter => DOTTED,
            DurationToken::QuarterTriplet => TRIPLET,
            DurationToken::Eighth => 0.5,
            DurationToken::DottedEighth => 0.5 * DOTTED,
            DurationToken::EighthTriplet => 0.5 * TRIPLET,
            DurationToken::Sixteenth => 0.25,
            DurationToken::DottedSixteenth => 0.25 * DOTTED,
            DurationToken::SixteenthTriplet => 0.25 * TRIPLET,
            DurationToken::ThirtySecond => 0.125,
            DurationToken::DottedThirtySecond => 0.125 * DOTTED,
            DurationToken::ThirtySecondTriplet => 0.125 * TRIPLET,
        }
    }

    /// Length in seconds at the given tempo. A non-positive tempo is not guarded against.
    pub fn seconds(&self, tempo_bpm: f64) -> f64 {
        self.beats() * SECONDS_PER_MINUTE / tempo_bpm
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown duration token '{0}'")]
pub struct UnknownToken(pub String);

impl FromStr for DurationToken {
    type Err = UnknownToken;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DurationToken::ALL
            .iter()
            .find(|token| token.as_str() == s.trim())
            .copied()
            .ok_or_else(|| UnknownToken(s.to_owned()))
    }
}

impl fmt::Display for DurationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for DurationToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DurationToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A multiset of duration tokens, summed to resolve tied or compound durations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DurationBag {
    counts: BTreeMap<DurationToken, u32>,
}

impl DurationBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, token: DurationToken) {
        *self.counts.entry(token).or_insert(0) += 1;
    }

    pub fn merge(&mut self, other: &DurationBag) {
        for (&token, &count) in other.counts.iter() {
            *self.counts.entry(token).or_insert(0) += count;
        }
    }

    pub fn count(&self, token: DurationToken) -> u32 {
        self.counts.get(&token).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn beats(&self) -> f64 {
        self.counts
            .iter()
            .map(|(token, &count)| token.beats() * count as f64)
            .sum()
    }

    pub fn seconds(&self, tempo_bpm: f64) -> f64 {
        self.counts
            .iter()
            .map(|(token, &count)| token.seconds(tempo_bpm) * count as f64)
            .sum()
    }
}

impl FromIterator<DurationToken> for DurationBag {
    fn from_iter<I: IntoIterator<Item = DurationToken>>(iter: I) -> Self {
        let mut bag = DurationBag::new();
        for token in iter {
            bag.add(token);
        }
        bag
    }
}
