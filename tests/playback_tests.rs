use TRACK_LOOPER::{
    LogSynth, ManualTransport, Note, PlaybackState, Player, Song, Synth, ThreadTransport,
    TokenPolicy, Track, edit, resolve_song,
};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TWINKLE: &str = "./resources/songs/twinkle.json";

fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-6
}

fn twinkle() -> Song {
    let json = fs::read_to_string(TWINKLE).unwrap();
    Song::from_json(&json).unwrap()
}

#[derive(Default)]
struct PitchLog {
    pitches: Mutex<Vec<Vec<u8>>>,
}

impl PitchLog {
    fn snapshot(&self) -> Vec<Vec<u8>> {
        self.pitches.lock().unwrap().clone()
    }
}

impl Synth for PitchLog {
    fn play(&self, _: usize, pitches: &[u8], _: Option<f64>, _: Option<f64>) -> anyhow::Result<()> {
        self.pitches.lock().unwrap().push(pitches.to_vec());
        Ok(())
    }

    fn stop(&self, _: usize, _: &[u8]) -> anyhow::Result<()> {
        Ok(())
    }

    fn playing_notes(&self) -> BTreeMap<usize, BTreeSet<u8>> {
        BTreeMap::new()
    }
}

#[test]
fn twinkle_resolves_into_three_loops() {
    let song = twinkle();
    let tracks = resolve_song(&song, TokenPolicy::Strict).unwrap();

    // 0.6s per beat at 100 BPM.
    assert_eq!(tracks.len(), 3);
    assert!(approx_eq(tracks[0].duration, 16.0 * 0.6));
    assert!(approx_eq(tracks[1].duration, 20.0 * 0.6));
    assert!(approx_eq(tracks[2].duration, 2.0 * 0.6));
    assert!(approx_eq(tracks[0].measure_duration, 2.4));

    let last = tracks[0].notes.last().unwrap();
    assert!(approx_eq(last.duration, 1.2));
    assert!(approx_eq(last.start + last.duration, tracks[0].duration));
}

#[test]
fn seeking_into_twinkle_on_a_manual_clock() {
    env_logger::try_init().unwrap_or(());

    let transport = Arc::new(ManualTransport::new());
    let synth = Arc::new(LogSynth::new(true));
    let player = Player::new(Arc::clone(&transport), Arc::clone(&synth), TokenPolicy::Lenient, true);

    player.play(&twinkle(), Some((0, 7))).unwrap();
    transport.advance(0.01).unwrap();

    let expected: BTreeSet<(usize, usize)> = [(0, 7), (1, 0), (2, 0)].into_iter().collect();
    assert_eq!(player.playing_notes(), expected);

    let sounding = synth.playing_notes();
    assert!(sounding[&0].contains(&74));
    assert_eq!(sounding[&1], BTreeSet::from([45, 52, 57]));

    // Track 2 loops every 1.2s, nine times before track 0 reaches its 12s mark.
    transport.advance(1.2).unwrap();
    assert!(player.playing_notes().contains(&(2, 0)));

    player.stop().unwrap();
    assert!(player.playing_notes().is_empty());
    assert!(synth.playing_notes().is_empty());
}

#[test]
fn edits_take_effect_on_the_next_play() {
    let transport = Arc::new(ManualTransport::new());
    let synth = Arc::new(PitchLog::default());
    let player = Player::new(Arc::clone(&transport), Arc::clone(&synth), TokenPolicy::Lenient, false);

    let song = Song::new(120.0, vec![Track::new(0, vec![Note::new(&[60], "4n")])]);
    player.play(&song, None).unwrap();
    transport.advance(0.1).unwrap();

    let edited = edit::with_pitches(&song, 0, 0, &[61]).unwrap();
    let edited = edit::with_note_inserted(&edited, 0, 1, Note::new(&[62], "4n")).unwrap();
    player.play(&edited, None).unwrap();
    transport.advance(1.0).unwrap();

    assert_eq!(synth.snapshot(), vec![vec![60], vec![61], vec![62]]);
}

#[test]
fn real_time_playback_can_be_replaced_and_stopped() {
    env_logger::try_init().unwrap_or(());

    let synth = Arc::new(PitchLog::default());
    let player = Player::new(
        Arc::new(ThreadTransport::new()),
        Arc::clone(&synth),
        TokenPolicy::Lenient,
        false,
    );
    let updates = player.subscribe();

    // 600 BPM makes every quarter note 0.1s long.
    let first = Song::new(600.0, vec![Track::new(0, vec![Note::new(&[60], "4n"); 2])]);
    let second = Song::new(600.0, vec![Track::new(0, vec![Note::new(&[90], "8n"); 3])]);

    player.play(&first, None).unwrap();
    spin_sleep::sleep(Duration::from_millis(120));

    player.play(&second, None).unwrap();
    spin_sleep::sleep(Duration::from_millis(200));

    // Once the second song starts, the first one never sounds again.
    let played = synth.snapshot();
    let switched_at = played.iter().position(|p| p == &vec![90]).unwrap();
    assert!(switched_at >= 1);
    assert!(played[..switched_at].iter().all(|p| p == &vec![60]));
    assert!(played[switched_at..].iter().all(|p| p == &vec![90]));
    assert_eq!(player.state(), PlaybackState::Playing);

    player.stop().unwrap();
    assert_eq!(player.state(), PlaybackState::Idle);
    assert!(player.playing_notes().is_empty());

    let stopped_at = synth.snapshot().len();
    spin_sleep::sleep(Duration::from_millis(150));
    assert_eq!(synth.snapshot().len(), stopped_at);

    let snapshots: Vec<BTreeSet<(usize, usize)>> = updates.try_iter().collect();
    assert!(!snapshots.is_empty());
    assert!(snapshots.last().unwrap().is_empty());
}
