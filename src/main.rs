use TRACK_LOOPER::{
    Args, LogSynth, Player, Song, ThreadTransport, chord_label, export_midi_file, parse_note_ref,
    parse_policy, resolve_song,
};
use anyhow::{Result, anyhow};
use clap::Parser;
use log::{info, warn};
use std::fs;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let policy = parse_policy(&args.policy);

    info!("Loading song: '{}'...", args.song.display());
    let json = fs::read_to_string(&args.song)
        .map_err(|e| anyhow!("Failed to read song file {}: {}", args.song.display(), e))?;
    let mut song = Song::from_json(&json)?;

    if song.title.is_none() {
        song.title = args
            .song
            .file_stem()
            .and_then(|s| s.to_str())
            .map(|s| s.to_string());
    }
    if let Some(tempo) = args.tempo {
        song.tempo = tempo;
    }

    if let Some(path) = args.export_midi.as_ref() {
        export_midi_file(&song, path, policy)?;
    }

    if args.dry_run {
        let tracks = resolve_song(&song, policy)?;
        for (i, (track, processed)) in song.tracks.iter().zip(tracks.iter()).enumerate() {
            info!(
                "Track {}: instrument={} notes={} loop={:.3}s measure={:.3}s",
                i,
                track.instrument,
                processed.notes.len(),
                processed.duration,
                processed.measure_duration
            );

            for (n, note) in processed.notes.iter().enumerate() {
                info!(
                    "  Note {}: start={:.3}s dur={:.3}s pitches={}",
                    n,
                    note.start,
                    note.duration,
                    chord_label(&note.pitches)
                );
            }
        }
        return Ok(());
    }

    let player = Player::new(
        Arc::new(ThreadTransport::new()),
        Arc::new(LogSynth::new(args.verbose)),
        policy,
        args.verbose,
    );

    if let Some(target) = args.audition.as_deref() {
        let (track, note) = parse_note_ref(target)?;
        let duration = resolve_song(&song, policy)?
            .get(track)
            .and_then(|t| t.notes.get(note))
            .map(|n| n.duration)
            .unwrap_or(0.0);

        player.play_note(&song, track, note)?;
        match Duration::try_from_secs_f64(duration.max(0.0)) {
            Ok(held) => spin_sleep::sleep(held),
            Err(why) => warn!("Cannot wait {}s for the note to finish: {}", duration, why),
        }
        info!("Audition finished, exiting..!");
        return Ok(());
    }

    let start_at = args.start_at.as_deref().map(parse_note_ref).transpose()?;

    let (done_tx, done_rx) = mpsc::channel::<()>();
    let timer_tx = done_tx.clone();

    ctrlc::set_handler(move || {
        warn!("Ctrl-C received, stopping playback..!");
        let _ = done_tx.send(());
    })
    .map_err(|e| anyhow!("Error setting Ctrl-C handler: {}", e))?;

    player.play(&song, start_at)?;

    if args.seconds > 0.0 {
        match Duration::try_from_secs_f64(args.seconds) {
            Ok(limit) => {
                std::thread::spawn(move || {
                    spin_sleep::sleep(limit);
                    let _ = timer_tx.send(());
                });
            }
            Err(why) => warn!("Ignoring --seconds {}: {}", args.seconds, why),
        }
    }

    let _ = done_rx.recv();
    player.stop()?;
    info!("Playback finished, exiting..!");

    Ok(())
}
