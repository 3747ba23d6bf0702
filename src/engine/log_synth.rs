use crate::engine::Synth;
use crate::util::chord_label;
use anyhow::{Result, anyhow, bail};
use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A synth that writes every note to the log instead of producing sound.
///
/// Sounding pitches are tracked with their release deadline so that
/// [`Synth::playing_notes`] reflects what a real instrument would be holding.
#[derive(Debug, Default)]
pub struct LogSynth {
    verbose: bool,
    sounding: Mutex<BTreeMap<(usize, u8), Option<Instant>>>,
}

impl LogSynth {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            sounding: Mutex::new(BTreeMap::new()),
        }
    }
}

/// Negative lengths release at once; NaN and lengths past `Duration::MAX` are errors.
fn release_at(now: Instant, seconds: f64) -> Result<Instant> {
    let held = if seconds <= 0.0 {
        Duration::ZERO
    } else {
        Duration::try_from_secs_f64(seconds)?
    };

    now.checked_add(held)
        .ok_or_else(|| anyhow!("release time is out of range"))
}

impl Synth for LogSynth {
    fn play(
        &self,
        instrument: usize,
        pitches: &[u8],
        duration: Option<f64>,
        at_time: Option<f64>,
    ) -> Result<()> {
        let now = Instant::now();
        let release = duration
            .map(|d| {
                release_at(now, d).map_err(|why| {
                    anyhow!("Cannot hold {} for {}s: {}..!", chord_label(pitches), d, why)
                })
            })
            .transpose()?;

        {
            let Ok(mut sounding) = self.sounding.lock() else {
                bail!("Failed to lock the sounding notes..!")
            };

            for &pitch in pitches {
                sounding.insert((instrument, pitch), release);
            }
        }

        let label = format!("Instrument {} plays {}", instrument, chord_label(pitches));
        match (at_time, duration) {
            (Some(at), Some(d)) if self.verbose => {
                info!("{:40} | at {:>10.3}s | duration: {:>7.3}s", label, at, d)
            }
            (None, Some(d)) if self.verbose => info!("{:40} | now | duration: {:>7.3}s", label, d),
            _ if self.verbose => info!("{}", label),
            _ => debug!("{}", label),
        }

        Ok(())
    }

    fn stop(&self, instrument: usize, pitches: &[u8]) -> Result<()> {
        let Ok(mut sounding) = self.sounding.lock() else {
            bail!("Failed to lock the sounding notes..!")
        };

        for &pitch in pitches {
            sounding.remove(&(instrument, pitch));
        }

        debug!("Instrument {} released {}", instrument, chord_label(pitches));
        Ok(())
    }

    fn playing_notes(&self) -> BTreeMap<usize, BTreeSet<u8>> {
        let Ok(mut sounding) = self.sounding.lock() else {
            return BTreeMap::new();
        };

        let now = Instant::now();
        sounding.retain(|_, release| release.is_none_or(|at| at > now));

        let mut playing: BTreeMap<usize, BTreeSet<u8>> = BTreeMap::new();
        for &(instrument, pitch) in sounding.keys() {
            playing.entry(instrument).or_default().insert(pitch);
        }

        playing
    }
}
