use std::collections::{BTreeMap, BTreeSet};

mod log_synth;
mod manual_transport;
mod thread_transport;
mod transport;

pub use log_synth::LogSynth;
pub use manual_transport::ManualTransport;
pub use thread_transport::ThreadTransport;
pub use transport::*;

/// Sound output for one or more instruments, addressed by index.
pub trait Synth: Send + Sync {
    /// Start sounding `pitches` on an instrument. With a duration the pitches release
    /// on their own, otherwise they sound until [`Synth::stop`].
    fn play(
        &self,
        instrument: usize,
        pitches: &[u8],
        duration: Option<f64>,
        at_time: Option<f64>,
    ) -> anyhow::Result<()>;

    fn stop(&self, instrument: usize, pitches: &[u8]) -> anyhow::Result<()>;

    /// Pitches currently sounding, per instrument.
    fn playing_notes(&self) -> BTreeMap<usize, BTreeSet<u8>>;

    fn release_all(&self) -> anyhow::Result<()> {
        for (instrument, pitches) in self.playing_notes() {
            let pitches: Vec<u8> = pitches.into_iter().collect();
            self.stop(instrument, &pitches)?;
        }

        Ok(())
    }
}
