use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "TRACK_LOOPER",
    about = "Resolve a sequencer song into per-track loops and play them back!"
)]
pub struct Args {
    /// Path to the song file (JSON).
    pub song: PathBuf,

    /// Overrides the tempo stored in the song file (beats per minute).
    #[arg(short, long)]
    pub tempo: Option<f64>,

    /// What to do with unrecognized duration tokens: lenient|strict.
    #[arg(short, long, default_value = "lenient")]
    pub policy: String,

    /// Dry run (print the resolved schedule of every track and exit).
    #[arg(short, long, default_value_t = false)]
    pub dry_run: bool,

    /// Start playback at a given note, written as `track:note` (zero-based).
    #[arg(short, long = "start-at")]
    pub start_at: Option<String>,

    /// Stops playback after N seconds. Plays until Ctrl-C when 0.
    #[arg(long, default_value_t = 0.0)]
    pub seconds: f64,

    /// Plays a single note (`track:note`) and exits instead of looping the song.
    #[arg(short, long)]
    pub audition: Option<String>,

    /// Writes one loop of the resolved song to a standard MIDI file.
    #[arg(short, long = "export-midi")]
    pub export_midi: Option<PathBuf>,

    /// Prints extra information to the terminal.
    #[arg(short, long)]
    pub verbose: bool,
}
