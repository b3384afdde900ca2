//! Headless session driver: builds a demo project, saves and reloads it,
//! bounces it to WAV and MIDI, and with `--play` runs it through the
//! default output device while printing the playhead.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use log::{LevelFilter, info};
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

use backbeat_engine::assets::SamplePool;
use backbeat_engine::engine::{EngineConfig, RealtimeBackend};
use backbeat_engine::export::render_to_wav;
use backbeat_engine::midi::write_midi_file;
use backbeat_engine::project_io::{load_project_file, save_project_file};
use backbeat_engine::timebase::beats_to_seconds;
use backbeat_engine::transport::Transport;
use backbeat_shared::automation::{AutomationLane, AutomationTarget, CurveType};
use backbeat_shared::project::{
    Adsr, Effect, EffectSpec, Instrument, InstrumentSpec, MidiNote, OscShape, Pattern, Project,
    Track,
};
use backbeat_shared::steps::StepPattern;

const BACKBEAT_LOG_CONFIG: &str = "BACKBEAT_LOG_CONFIG";
const DEFAULT_BACKBEAT_LOG_CONFIG: &str = "log4rs.yaml";

fn init_logging() -> Result<()> {
    let log_config_path = std::env::var(BACKBEAT_LOG_CONFIG)
        .unwrap_or_else(|_| DEFAULT_BACKBEAT_LOG_CONFIG.to_string());

    if std::path::Path::new(&log_config_path).exists() {
        log4rs::init_file(log_config_path.as_str(), Default::default())?;
        return Ok(());
    }

    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{d(%H:%M:%S%.3f)} {h({l})} {m}{n}")))
        .build();
    let config = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(LevelFilter::Info))?;
    log4rs::init_config(config)?;
    Ok(())
}

/// Two synth tracks over a swung step groove, with a volume ramp on the
/// keys and a delay on the bass.
fn demo_session() -> Result<(Project, Vec<StepPattern>)> {
    let mut project = Project::new("Backbeat Demo");
    project.set_bpm(110.0);

    let keys = project.add_instrument(Instrument::new(
        "keys",
        InstrumentSpec::synth(OscShape::Sawtooth, Adsr::new(0.01, 0.12, 0.6, 0.25)),
    ));
    let bass = project.add_instrument(Instrument::new(
        "bass",
        InstrumentSpec::synth(OscShape::Square, Adsr::new(0.005, 0.05, 0.8, 0.1)),
    ));
    let drums = project.add_instrument(Instrument::new(
        "drums",
        InstrumentSpec::synth(OscShape::Sine, Adsr::new(0.001, 0.09, 0.0, 0.05)),
    ));

    let mut riff = Pattern::new("keys riff", 4.0);
    riff.add_note(MidiNote::new(60, 0.0, 0.75, 96));
    riff.add_note(MidiNote::new(64, 1.0, 0.75, 88));
    riff.add_note(MidiNote::new(67, 2.0, 0.75, 92));
    riff.add_note(MidiNote::new(71, 3.0, 0.5, 84));
    let riff_id = project.add_pattern(riff);

    let mut bassline = Pattern::new("bassline", 4.0);
    bassline.add_note(MidiNote::new(36, 0.0, 1.5, 110));
    bassline.add_note(MidiNote::new(36, 2.0, 0.5, 100));
    bassline.add_note(MidiNote::new(43, 2.5, 1.0, 105));
    let bassline_id = project.add_pattern(bassline);

    let echo = project.add_effect(Effect::new("echo", EffectSpec::delay(0.3, 0.35)));

    let keys_track_id = project.add_track(Track::new("keys"));
    project.bind_instrument(keys_track_id, keys)?;
    project.place_pattern(keys_track_id, riff_id, 0.0, 8.0)?;

    let bass_track_id = project.add_track(Track::new("bass"));
    project.bind_instrument(bass_track_id, bass)?;
    project.chain_effect(bass_track_id, echo)?;
    project.place_pattern(bass_track_id, bassline_id, 0.0, 8.0)?;

    let mut ramp = AutomationLane::new(AutomationTarget::TrackVolume { track: keys_track_id });
    ramp.add_point(0.0, 0.3, CurveType::Linear);
    ramp.add_point(8.0, 0.9, CurveType::Linear);
    project.add_lane(ramp);

    let mut groove = StepPattern::new("groove", drums, 16);
    groove.set_swing(35.0);
    groove.add_row(36);
    groove.add_row(42);
    for step in [0, 4, 8, 12] {
        groove.toggle(0, step);
    }
    for step in (0..16).step_by(2) {
        groove.toggle(1, step);
    }
    groove.rows[1].cells[14].set_roll(3);
    groove.toggle(1, 14);

    Ok((project, vec![groove]))
}

fn bounce(project: &Project, step_patterns: &[StepPattern], out_dir: &Path) -> Result<()> {
    let pool = SamplePool::new();
    let tail = 1.5;
    let duration = beats_to_seconds(project.end_beat(), project.bpm) + tail;

    let wav_path = out_dir.join("backbeat_demo.wav");
    render_to_wav(project, step_patterns, &pool, duration, 44_100, &wav_path)?;
    info!("[Headless] Bounced {:.2}s to {}", duration, wav_path.display());

    let midi_path = out_dir.join("backbeat_demo.mid");
    write_midi_file(project, &midi_path)?;
    Ok(())
}

fn play_live(project: &Project, step_patterns: &[StepPattern]) -> Result<()> {
    let backend = RealtimeBackend::new(EngineConfig::default())?;
    let pool = backend.pool();
    let mut transport = Transport::new(backend, pool);
    transport.set_project(project, step_patterns);

    transport.play();
    for _ in 0..16 {
        std::thread::sleep(Duration::from_millis(500));
        let (bar, beat) = transport.current_bar_beat();
        let voices = transport.backend().active_voices().unwrap_or(0);
        info!(
            "[Headless] {:6.2}s  bar {} beat {:.2}  ({} voices)",
            transport.position_seconds(),
            bar,
            beat + 1.0,
            voices
        );
    }
    transport.stop();
    Ok(())
}

fn main() -> Result<()> {
    init_logging()?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let live = args.iter().any(|a| a == "--play");
    let out_dir = args
        .iter()
        .position(|a| a == "--out")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    let (project, step_patterns) = demo_session()?;

    // Round-trip through the project format before doing anything else.
    let project_path = out_dir.join("backbeat_demo.json");
    save_project_file(&project, &step_patterns, &project_path)?;
    let (project, step_patterns) = load_project_file(&project_path)?;

    bounce(&project, &step_patterns, &out_dir)?;

    if live {
        play_live(&project, &step_patterns)?;
    } else {
        info!("[Headless] Done (pass --play to hear it)");
    }
    Ok(())
}
