use backbeat_shared::project::Project;
use backbeat_shared::steps::StepPattern;
use log::info;
use rayon::prelude::*;

use crate::assets::SamplePool;
use crate::backend::RackSetup;
use crate::schedule::compile;
use crate::synth::Rack;
use crate::timebase::TempoMap;

const BLOCK_FRAMES: usize = 512;

/// Renders a project offline into interleaved stereo. Same compiler, same
/// rack as live playback, but the clock is a plain counter: no device and
/// no realtime constraint. Content past `duration_seconds` is cut off and
/// the buffer is exactly `duration * rate` frames.
pub fn render_offline(
    project: &Project,
    step_patterns: &[StepPattern],
    pool: &SamplePool,
    duration_seconds: f64,
    sample_rate: u32,
) -> Vec<f32> {
    let frames_total = (duration_seconds.max(0.0) * sample_rate as f64).round() as usize;
    if frames_total == 0 {
        return Vec::new();
    }

    let map = TempoMap::from_lane(project.bpm, project.tempo_lane());
    let schedule = compile(project, step_patterns, &map, pool, 0.0);
    info!(
        "[Render] Offline: {:.2}s at {} Hz, {} events",
        duration_seconds,
        sample_rate,
        schedule.len()
    );

    let mut rack = Rack::new(sample_rate as f32);
    rack.sync(&RackSetup::from_project(project, step_patterns), pool);

    let sr = sample_rate as f64;
    let mut out = vec![0.0f32; frames_total * 2];
    let mut cursor = 0usize;
    let mut pos = 0u64;

    for chunk in out.chunks_mut(BLOCK_FRAMES * 2) {
        let frames = chunk.len() / 2;
        let t_end = (pos + frames as u64) as f64 / sr;

        while cursor < schedule.events.len() && schedule.events[cursor].time_seconds < t_end {
            let event = &schedule.events[cursor];
            let event_frame = (event.time_seconds * sr) as u64;
            let offset = (event_frame.saturating_sub(pos) as usize).min(frames - 1);
            rack.dispatch(event, offset, pool);
            cursor += 1;
        }

        // Strips are independent until the mix, so render them in
        // parallel.
        rack.strips_mut().par_iter_mut().for_each(|strip| strip.process(frames));
        rack.mix_into(chunk);

        pos += frames as u64;
    }

    out
}
