use backbeat_shared::steps::StepPattern;

use crate::events::{EventKind, ScheduledEvent};
use crate::timebase::TempoMap;

/// The grid is locked to 16th notes.
pub const STEPS_PER_BEAT: f64 = 4.0;

/// Fraction of a hit's subdivision that actually sounds.
const HIT_GATE: f64 = 0.8;

pub fn step_seconds(bpm: f64) -> f64 {
    60.0 / bpm.max(1.0) / STEPS_PER_BEAT
}

/// Swing offset for a step index: odd 16ths are pushed late by up to half
/// a step, even 16ths never move.
pub fn swing_offset(step: usize, swing: f32, step_seconds: f64) -> f64 {
    if step % 2 == 1 {
        step_seconds * (swing.clamp(0.0, 100.0) as f64 / 100.0) * 0.5
    } else {
        0.0
    }
}

/// Tiles a pattern from beat 0 up to `horizon_beats`, expanding swing and
/// rolls into plain note events. Events mix through a strip keyed by the
/// pattern id and play the pattern's bound instrument.
pub fn expand_pattern(
    pattern: &StepPattern,
    map: &TempoMap,
    horizon_beats: f64,
) -> Vec<ScheduledEvent> {
    let mut events = Vec::new();
    if pattern.rows.is_empty() || pattern.steps == 0 {
        return events;
    }
    let period = pattern.period_beats();
    let cycles = (horizon_beats / period).ceil().max(1.0) as usize;

    for cycle in 0..cycles {
        for step in 0..pattern.steps {
            let step_beat = (cycle * pattern.steps + step) as f64 / STEPS_PER_BEAT;
            if step_beat >= horizon_beats && cycle > 0 {
                break;
            }
            // Swing and roll spacing follow the local tempo.
            let sd = step_seconds(map.bpm_at_beat(step_beat));
            let base = map.seconds_at_beat(step_beat) + swing_offset(step, pattern.swing, sd);

            for row in &pattern.rows {
                let Some(cell) = row.cells.get(step) else { continue };
                if !cell.active {
                    continue;
                }
                let roll = cell.roll.clamp(1, 4) as usize;
                let spacing = sd / roll as f64;
                for hit in 0..roll {
                    let on = base + hit as f64 * spacing;
                    events.push(ScheduledEvent {
                        time_seconds: on,
                        track: pattern.id,
                        kind: EventKind::NoteOn {
                            instrument: pattern.instrument,
                            pitch: row.pitch,
                            velocity: cell.velocity as f32 / 127.0,
                        },
                    });
                    events.push(ScheduledEvent {
                        time_seconds: on + spacing * HIT_GATE,
                        track: pattern.id,
                        kind: EventKind::NoteOff {
                            instrument: pattern.instrument,
                            pitch: row.pitch,
                        },
                    });
                }
            }
        }
    }
    events
}

/// Grid position for UI highlighting, derived from transport time alone.
pub fn playing_step(elapsed_seconds: f64, bpm: f64, steps: usize) -> usize {
    if steps == 0 {
        return 0;
    }
    let sd = step_seconds(bpm);
    let period = sd * steps as f64;
    let into = elapsed_seconds.max(0.0) % period;
    ((into / sd) as usize).min(steps - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use backbeat_shared::steps::StepCell;
    use uuid::Uuid;

    const EPS: f64 = 1e-9;

    fn one_row_pattern(steps: usize) -> StepPattern {
        let mut p = StepPattern::new("test", Uuid::new_v4(), steps);
        p.add_row(36);
        p
    }

    fn note_ons(events: &[ScheduledEvent]) -> Vec<f64> {
        events
            .iter()
            .filter(|e| matches!(e.kind, EventKind::NoteOn { .. }))
            .map(|e| e.time_seconds)
            .collect()
    }

    #[test]
    fn rigid_grid_at_120() {
        let mut p = one_row_pattern(16);
        for s in 0..16 {
            p.rows[0].cells[s] = StepCell::hit(100);
        }
        let events = expand_pattern(&p, &TempoMap::fixed(120.0), 4.0);
        let ons = note_ons(&events);
        assert_eq!(ons.len(), 16);
        for (i, t) in ons.iter().enumerate() {
            assert!((t - i as f64 * 0.125).abs() < EPS, "step {i}");
        }
    }

    #[test]
    fn swing_only_moves_odd_steps() {
        let mut p = one_row_pattern(16);
        p.set_swing(50.0);
        p.rows[0].cells[0] = StepCell::hit(100);
        p.rows[0].cells[1] = StepCell::hit(100);
        p.rows[0].cells[2] = StepCell::hit(100);

        let events = expand_pattern(&p, &TempoMap::fixed(120.0), 4.0);
        let ons = note_ons(&events);
        let sd = 0.125;
        assert!((ons[0] - 0.0).abs() < EPS);
        // Half swing pushes the off-beat a quarter step late.
        assert!((ons[1] - (sd + sd * 0.25)).abs() < EPS);
        assert!((ons[2] - 2.0 * sd).abs() < EPS);
    }

    #[test]
    fn full_swing_is_half_a_step() {
        let sd = step_seconds(120.0);
        assert!((swing_offset(1, 100.0, sd) - sd * 0.5).abs() < EPS);
        assert_eq!(swing_offset(2, 100.0, sd), 0.0);
    }

    #[test]
    fn roll_spreads_hits_evenly() {
        let mut p = one_row_pattern(16);
        p.rows[0].cells[0] = StepCell::hit(100);
        p.rows[0].cells[0].set_roll(4);

        let events = expand_pattern(&p, &TempoMap::fixed(120.0), 4.0);
        let ons = note_ons(&events);
        assert_eq!(ons.len(), 4);
        let spacing = 0.125 / 4.0;
        for (i, t) in ons.iter().enumerate() {
            assert!((t - i as f64 * spacing).abs() < EPS);
        }
        // Hits gate inside their own subdivision.
        let offs: Vec<f64> = events
            .iter()
            .filter(|e| matches!(e.kind, EventKind::NoteOff { .. }))
            .map(|e| e.time_seconds)
            .collect();
        assert!((offs[0] - spacing * 0.8).abs() < EPS);
        assert!(offs[3] < 0.125 + EPS);
    }

    #[test]
    fn pattern_tiles_to_the_horizon() {
        let mut p = one_row_pattern(16);
        p.rows[0].cells[0] = StepCell::hit(100);
        let events = expand_pattern(&p, &TempoMap::fixed(120.0), 8.0);
        let ons = note_ons(&events);
        // 4-beat period, 8-beat horizon: the downbeat fires twice.
        assert_eq!(ons.len(), 2);
        assert!((ons[1] - 2.0).abs() < EPS);
    }

    #[test]
    fn playing_step_wraps_with_the_loop() {
        assert_eq!(playing_step(0.0, 120.0, 16), 0);
        assert_eq!(playing_step(0.126, 120.0, 16), 1);
        assert_eq!(playing_step(15.5 * 0.125, 120.0, 16), 15);
        // One full period later we are back at the start.
        assert_eq!(playing_step(2.0, 120.0, 16), 0);
        assert_eq!(playing_step(2.126, 120.0, 16), 1);
    }

    #[test]
    fn velocity_normalizes() {
        let mut p = one_row_pattern(8);
        p.rows[0].cells[0] = StepCell::hit(127);
        let events = expand_pattern(&p, &TempoMap::fixed(120.0), 2.0);
        match events[0].kind {
            EventKind::NoteOn { velocity, .. } => assert!((velocity - 1.0).abs() < 1e-6),
            _ => panic!("expected a note on"),
        }
    }
}
