use backbeat_shared::project::{Clip, ClipSource, Pattern, Project, Track};
use backbeat_shared::steps::StepPattern;
use log::warn;

use crate::assets::SamplePool;
use crate::automation::lane_events;
use crate::events::{EventKind, ScheduledEvent};
use crate::steps::expand_pattern;
use crate::timebase::{TempoMap, beats_to_seconds};

/// An empty arrangement still schedules a bar of silence so the transport
/// has somewhere to run.
const MIN_HORIZON_BEATS: f64 = 4.0;

const BEAT_EPS: f64 = 1e-9;

/// The compiled, time-ordered output of one build pass. Consumers replace
/// it wholesale on rebuild; nothing is patched in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schedule {
    pub events: Vec<ScheduledEvent>,
    /// Horizon: end of the last timeline event, every step-pattern cycle,
    /// and any requested minimum (e.g. a loop end).
    pub end_seconds: f64,
}

impl Schedule {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Index of the first event at or after `seconds`; the dispatch cursor
    /// after a seek. Events strictly before the position never re-fire.
    pub fn first_index_at(&self, seconds: f64) -> usize {
        self.events.partition_point(|e| e.time_seconds < seconds)
    }
}

/// Compiles a project snapshot plus the live step patterns into one sorted
/// schedule. Pure over its inputs: the same snapshot and map always yield
/// the same schedule, and nothing here mutates the document.
pub fn compile(
    project: &Project,
    step_patterns: &[StepPattern],
    map: &TempoMap,
    pool: &SamplePool,
    min_end_seconds: f64,
) -> Schedule {
    let mut events = Vec::new();

    let timeline_end = project.end_beat();
    let pattern_period = step_patterns
        .iter()
        .filter(|p| p.enabled)
        .map(StepPattern::period_beats)
        .fold(0.0, f64::max);
    let horizon_beats = timeline_end
        .max(pattern_period)
        .max(MIN_HORIZON_BEATS)
        .max(map.beat_at_seconds(min_end_seconds));

    for track in &project.tracks {
        if !project.is_track_audible(track) {
            continue;
        }
        for clip in &track.clips {
            match clip.source {
                ClipSource::Pattern { pattern } => match project.pattern(pattern) {
                    Some(p) => compile_pattern_clip(&mut events, project, track, clip, p, map),
                    None => {
                        warn!(
                            "[Schedule] Clip {} references missing pattern {}, skipping",
                            clip.id, pattern
                        );
                    }
                },
                ClipSource::Sample { sample } => {
                    if pool.contains(sample) {
                        compile_sample_clip(&mut events, track, clip, sample, map);
                    } else {
                        warn!(
                            "[Schedule] Clip {} references undecoded sample {}, skipping",
                            clip.id, sample
                        );
                    }
                }
            }
        }
    }

    for pattern in step_patterns.iter().filter(|p| p.enabled) {
        if project.instrument(pattern.instrument).is_none() {
            warn!(
                "[Schedule] Step pattern '{}' references missing instrument {}, skipping",
                pattern.name, pattern.instrument
            );
            continue;
        }
        events.extend(expand_pattern(pattern, map, horizon_beats));
    }

    for lane in project.automation.iter().filter(|l| l.enabled) {
        if let Some(track_id) = lane.target.track() {
            if project.track(track_id).is_none() {
                warn!("[Schedule] Lane {} targets missing track, skipping", lane.id);
                continue;
            }
        }
        if let Some(effect_id) = lane.target.effect() {
            if project.effect(effect_id).is_none() {
                warn!("[Schedule] Lane {} targets missing effect, skipping", lane.id);
                continue;
            }
        }
        events.extend(lane_events(lane, map));
    }

    events.sort_by(ScheduledEvent::chronological);

    let mut end_seconds = map.seconds_at_beat(horizon_beats).max(min_end_seconds);
    if let Some(last) = events.last() {
        end_seconds = end_seconds.max(last.time_seconds);
    }

    Schedule { events, end_seconds }
}

/// Places every occurrence of a pattern's notes inside the clip window.
/// Content tiles across the clip when the clip outlives the pattern;
/// `offset_beats` trims the head. Notes are truncated at the clip end and
/// onsets at or past it are dropped.
fn compile_pattern_clip(
    events: &mut Vec<ScheduledEvent>,
    project: &Project,
    track: &Track,
    clip: &Clip,
    pattern: &Pattern,
    map: &TempoMap,
) {
    let Some(instrument) = track.instrument else {
        warn!(
            "[Schedule] Track '{}' has pattern clips but no instrument, skipping clip {}",
            track.name, clip.id
        );
        return;
    };
    if project.instrument(instrument).is_none() {
        warn!(
            "[Schedule] Track '{}' binds missing instrument {}, skipping clip {}",
            track.name, instrument, clip.id
        );
        return;
    }

    let len = pattern.length_beats.max(0.25);
    let clip_end = clip.end_beat();
    // Timeline beat where content beat 0 of the first tile sits.
    let tile_origin = clip.start_beat - clip.offset_beats;
    let mut tile = ((clip.start_beat - tile_origin) / len).floor().max(0.0) as u64;

    loop {
        let origin = tile_origin + tile as f64 * len;
        if origin >= clip_end - BEAT_EPS {
            break;
        }
        for note in &pattern.notes {
            if note.length_beats <= 0.0 {
                continue;
            }
            let on_beat = origin + note.start_beat;
            if on_beat < clip.start_beat - BEAT_EPS || on_beat >= clip_end - BEAT_EPS {
                continue;
            }
            let off_beat = (on_beat + note.length_beats).min(clip_end);
            events.push(ScheduledEvent {
                time_seconds: map.seconds_at_beat(on_beat),
                track: track.id,
                kind: EventKind::NoteOn {
                    instrument,
                    pitch: note.pitch,
                    velocity: note.velocity as f32 / 127.0,
                },
            });
            events.push(ScheduledEvent {
                time_seconds: map.seconds_at_beat(off_beat),
                track: track.id,
                kind: EventKind::NoteOff { instrument, pitch: note.pitch },
            });
        }
        tile += 1;
    }
}

fn compile_sample_clip(
    events: &mut Vec<ScheduledEvent>,
    track: &Track,
    clip: &Clip,
    sample: uuid::Uuid,
    map: &TempoMap,
) {
    if clip.length_beats <= 0.0 {
        return;
    }
    let start = map.seconds_at_beat(clip.start_beat);
    let duration = map.seconds_at_beat(clip.end_beat()) - start;
    // The head trim is source time: beats at the clip's local tempo.
    let offset = beats_to_seconds(clip.offset_beats, map.bpm_at_beat(clip.start_beat));
    events.push(ScheduledEvent {
        time_seconds: start,
        track: track.id,
        kind: EventKind::SampleStart { sample, offset_seconds: offset, duration_seconds: duration },
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use backbeat_shared::automation::{AutomationLane, AutomationTarget, CurveType};
    use backbeat_shared::project::{Adsr, Instrument, InstrumentSpec, MidiNote, OscShape};
    use backbeat_shared::steps::StepCell;
    use uuid::Uuid;

    const EPS: f64 = 1e-9;

    fn synth() -> Instrument {
        Instrument::new("synth", InstrumentSpec::synth(OscShape::Sine, Adsr::default()))
    }

    /// One track, one instrument, one pattern clip at beat 0.
    fn simple_project(notes: &[(u8, f64, f64)], pattern_len: f64, clip_len: f64) -> Project {
        let mut project = Project::new("t");
        let inst = project.add_instrument(synth());
        let mut pattern = Pattern::new("p", pattern_len);
        for &(pitch, start, len) in notes {
            pattern.add_note(MidiNote::new(pitch, start, len, 100));
        }
        let pid = project.add_pattern(pattern);
        let tid = project.add_track(Track::new("a"));
        let track = project.track_mut(tid).unwrap();
        track.instrument = Some(inst);
        track.add_clip(Clip::new(ClipSource::Pattern { pattern: pid }, 0.0, clip_len));
        project
    }

    fn compile_simple(project: &Project) -> Schedule {
        let map = TempoMap::fixed(project.bpm);
        compile(project, &[], &map, &SamplePool::new(), 0.0)
    }

    #[test]
    fn events_are_time_ordered_with_release_first() {
        // Back-to-back same-pitch notes: the boundary has an off and an on
        // at the same second; the off must come first.
        let project = simple_project(&[(60, 0.0, 1.0), (60, 1.0, 1.0)], 4.0, 4.0);
        let schedule = compile_simple(&project);
        assert_eq!(schedule.len(), 4);
        let boundary = beats_to_seconds(1.0, 120.0);
        assert!((schedule.events[1].time_seconds - boundary).abs() < EPS);
        assert!(matches!(schedule.events[1].kind, EventKind::NoteOff { .. }));
        assert!((schedule.events[2].time_seconds - boundary).abs() < EPS);
        assert!(matches!(schedule.events[2].kind, EventKind::NoteOn { .. }));
    }

    #[test]
    fn compilation_is_pure() {
        let project = simple_project(&[(60, 0.0, 1.0), (64, 2.0, 0.5)], 4.0, 8.0);
        let a = compile_simple(&project);
        let b = compile_simple(&project);
        assert_eq!(a, b);
    }

    #[test]
    fn muted_tracks_are_silent_and_solo_narrows() {
        let mut project = simple_project(&[(60, 0.0, 1.0)], 4.0, 4.0);
        let tid = project.tracks[0].id;
        project.track_mut(tid).unwrap().muted = true;
        assert!(compile_simple(&project).is_empty());

        // Solo on the muted track brings it back and silences the rest.
        project.track_mut(tid).unwrap().solo = true;
        assert_eq!(compile_simple(&project).len(), 2);
    }

    #[test]
    fn dangling_pattern_reference_is_skipped() {
        let mut project = Project::new("t");
        let inst = project.add_instrument(synth());
        let tid = project.add_track(Track::new("a"));
        let track = project.track_mut(tid).unwrap();
        track.instrument = Some(inst);
        track.add_clip(Clip::new(
            ClipSource::Pattern { pattern: Uuid::new_v4() },
            0.0,
            4.0,
        ));
        assert!(compile_simple(&project).is_empty());
    }

    #[test]
    fn track_without_instrument_is_skipped() {
        let mut project = simple_project(&[(60, 0.0, 1.0)], 4.0, 4.0);
        let tid = project.tracks[0].id;
        project.track_mut(tid).unwrap().instrument = None;
        assert!(compile_simple(&project).is_empty());
    }

    #[test]
    fn short_pattern_tiles_across_the_clip() {
        let project = simple_project(&[(60, 0.0, 0.5)], 1.0, 4.0);
        let schedule = compile_simple(&project);
        let ons: Vec<f64> = schedule
            .events
            .iter()
            .filter(|e| matches!(e.kind, EventKind::NoteOn { .. }))
            .map(|e| e.time_seconds)
            .collect();
        assert_eq!(ons.len(), 4);
        for (i, t) in ons.iter().enumerate() {
            assert!((t - i as f64 * 0.5).abs() < EPS);
        }
    }

    #[test]
    fn notes_truncate_at_the_clip_end() {
        // 2-beat note starting at beat 3 of a 4-beat clip.
        let project = simple_project(&[(60, 3.0, 2.0)], 4.0, 4.0);
        let schedule = compile_simple(&project);
        let off = schedule
            .events
            .iter()
            .find(|e| matches!(e.kind, EventKind::NoteOff { .. }))
            .unwrap();
        assert!((off.time_seconds - beats_to_seconds(4.0, 120.0)).abs() < EPS);
    }

    #[test]
    fn offset_trims_the_content_head() {
        let mut project = Project::new("t");
        let inst = project.add_instrument(synth());
        let mut pattern = Pattern::new("p", 4.0);
        pattern.add_note(MidiNote::new(60, 0.0, 0.5, 100));
        pattern.add_note(MidiNote::new(64, 1.0, 0.5, 100));
        let pid = project.add_pattern(pattern);
        let tid = project.add_track(Track::new("a"));
        let track = project.track_mut(tid).unwrap();
        track.instrument = Some(inst);
        let mut clip = Clip::new(ClipSource::Pattern { pattern: pid }, 0.0, 3.0);
        clip.offset_beats = 1.0;
        track.add_clip(clip);

        let schedule = compile_simple(&project);
        // The beat-0 note is inside the trimmed head; only the beat-1 note
        // plays, landing at the clip start.
        let ons: Vec<&ScheduledEvent> = schedule
            .events
            .iter()
            .filter(|e| matches!(e.kind, EventKind::NoteOn { .. }))
            .collect();
        assert_eq!(ons.len(), 1);
        assert!((ons[0].time_seconds - 0.0).abs() < EPS);
        assert!(matches!(ons[0].kind, EventKind::NoteOn { pitch: 64, .. }));
    }

    #[test]
    fn sample_clips_start_once_with_trim_and_duration() {
        let mut project = Project::new("t");
        let sample = Uuid::new_v4();
        let mut pool = SamplePool::new();
        pool.insert_decoded(sample, vec![0.0; 44100], 44100);

        let tid = project.add_track(Track::new("a"));
        let track = project.track_mut(tid).unwrap();
        let mut clip = Clip::new(ClipSource::Sample { sample }, 2.0, 4.0);
        clip.offset_beats = 1.0;
        track.add_clip(clip);

        let map = TempoMap::fixed(120.0);
        let schedule = compile(&project, &[], &map, &pool, 0.0);
        assert_eq!(schedule.len(), 1);
        match schedule.events[0].kind {
            EventKind::SampleStart { sample: s, offset_seconds, duration_seconds } => {
                assert_eq!(s, sample);
                assert!((offset_seconds - 0.5).abs() < EPS);
                assert!((duration_seconds - 2.0).abs() < EPS);
            }
            _ => panic!("expected a sample start"),
        }
        assert!((schedule.events[0].time_seconds - 1.0).abs() < EPS);

        // Undecoded sample: skipped entirely.
        let empty = compile(&project, &[], &map, &SamplePool::new(), 0.0);
        assert!(empty.is_empty());
    }

    #[test]
    fn step_patterns_and_lanes_join_the_schedule() {
        let mut project = Project::new("t");
        let inst = project.add_instrument(synth());
        let tid = project.add_track(Track::new("a"));

        let mut sp = backbeat_shared::steps::StepPattern::new("kick", inst, 16);
        sp.add_row(36);
        sp.rows[0].cells[0] = StepCell::hit(100);

        let mut lane = AutomationLane::new(AutomationTarget::TrackVolume { track: tid });
        lane.add_point(0.0, 1.0, CurveType::Linear);
        project.add_lane(lane);

        let map = TempoMap::fixed(120.0);
        let schedule = compile(&project, &[sp.clone()], &map, &SamplePool::new(), 0.0);
        assert!(schedule.events.iter().any(|e| e.track == sp.id));
        assert!(
            schedule
                .events
                .iter()
                .any(|e| matches!(e.kind, EventKind::ParamSet { .. }))
        );

        // Disabled pattern and dangling instrument both drop out.
        sp.enabled = false;
        let schedule = compile(&project, &[sp.clone()], &map, &SamplePool::new(), 0.0);
        assert!(!schedule.events.iter().any(|e| e.track == sp.id));
        sp.enabled = true;
        sp.instrument = Uuid::new_v4();
        let schedule = compile(&project, &[sp.clone()], &map, &SamplePool::new(), 0.0);
        assert!(!schedule.events.iter().any(|e| e.track == sp.id));
    }

    #[test]
    fn horizon_covers_content_and_requested_end() {
        let project = simple_project(&[(60, 0.0, 1.0)], 4.0, 16.0);
        let schedule = compile_simple(&project);
        assert!((schedule.end_seconds - beats_to_seconds(16.0, 120.0)).abs() < EPS);

        let map = TempoMap::fixed(120.0);
        let schedule = compile(&project, &[], &map, &SamplePool::new(), 30.0);
        assert!(schedule.end_seconds >= 30.0);

        let empty = compile(&Project::new("e"), &[], &map, &SamplePool::new(), 0.0);
        assert!(empty.is_empty());
        assert!((empty.end_seconds - 2.0).abs() < EPS);
    }

    #[test]
    fn dispatch_cursor_resyncs_by_time() {
        let project = simple_project(&[(60, 0.0, 1.0), (62, 2.0, 1.0)], 4.0, 4.0);
        let schedule = compile_simple(&project);
        assert_eq!(schedule.first_index_at(0.0), 0);
        // Past the first pair (off at 0.5s), before the second on at 1.0s.
        assert_eq!(schedule.first_index_at(0.75), 2);
        assert_eq!(schedule.first_index_at(100.0), schedule.len());
    }
}
