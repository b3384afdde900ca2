use backbeat_shared::automation::AutomationLane;
use backbeat_shared::project::TimeSignature;

/// Tempo range a normalized automation value spans.
pub const TEMPO_LANE_MIN: f64 = 60.0;
pub const TEMPO_LANE_MAX: f64 = 200.0;

pub fn beats_to_seconds(beats: f64, bpm: f64) -> f64 {
    beats * 60.0 / bpm.max(1.0)
}

pub fn seconds_to_beats(seconds: f64, bpm: f64) -> f64 {
    seconds * bpm.max(1.0) / 60.0
}

/// Maps a normalized lane value onto the tempo range.
pub fn lane_value_to_bpm(value: f64) -> f64 {
    TEMPO_LANE_MIN + value.clamp(0.0, 1.0) * (TEMPO_LANE_MAX - TEMPO_LANE_MIN)
}

/// 1-based bar number and the beat within that bar.
pub fn bar_beat(beat: f64, signature: TimeSignature) -> (u32, f64) {
    let per_bar = signature.beats_per_bar();
    let bar = (beat / per_bar).floor();
    (bar as u32 + 1, beat - bar * per_bar)
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct TempoPoint {
    beat: f64,
    bpm: f64,
    /// Cumulative seconds from the musical origin up to `beat`.
    seconds: f64,
}

/// Piecewise-constant tempo over musical time. Between breakpoints the
/// tempo holds the left value, so both direction queries are exact prefix
/// sums computed from the origin rather than accumulated block by block.
#[derive(Debug, Clone, PartialEq)]
pub struct TempoMap {
    points: Vec<TempoPoint>,
}

impl TempoMap {
    pub fn fixed(bpm: f64) -> Self {
        Self {
            points: vec![TempoPoint { beat: 0.0, bpm: bpm.max(1.0), seconds: 0.0 }],
        }
    }

    /// Builds the map from a tempo lane's breakpoints. The lane holds
    /// normalized values; they map onto [TEMPO_LANE_MIN, TEMPO_LANE_MAX].
    /// A missing or empty lane falls back to the fixed project tempo.
    pub fn from_lane(project_bpm: f64, lane: Option<&AutomationLane>) -> Self {
        let lane = match lane {
            Some(l) if !l.points.is_empty() => l,
            _ => return Self::fixed(project_bpm),
        };
        let mut points: Vec<TempoPoint> = Vec::with_capacity(lane.points.len() + 1);
        // Flat extrapolation before the first breakpoint.
        if lane.points[0].beat > 0.0 {
            points.push(TempoPoint {
                beat: 0.0,
                bpm: lane_value_to_bpm(lane.points[0].value),
                seconds: 0.0,
            });
        }
        for p in &lane.points {
            points.push(TempoPoint {
                beat: p.beat,
                bpm: lane_value_to_bpm(p.value),
                seconds: 0.0,
            });
        }
        let mut map = Self { points };
        map.reindex();
        map
    }

    fn reindex(&mut self) {
        let mut elapsed = 0.0;
        for i in 0..self.points.len() {
            if i > 0 {
                let prev = self.points[i - 1];
                elapsed += beats_to_seconds(self.points[i].beat - prev.beat, prev.bpm);
            }
            self.points[i].seconds = elapsed;
        }
    }

    fn segment_at_beat(&self, beat: f64) -> &TempoPoint {
        let idx = self.points.partition_point(|p| p.beat <= beat);
        &self.points[idx.saturating_sub(1)]
    }

    pub fn bpm_at_beat(&self, beat: f64) -> f64 {
        self.segment_at_beat(beat).bpm
    }

    pub fn seconds_at_beat(&self, beat: f64) -> f64 {
        let seg = self.segment_at_beat(beat.max(0.0));
        seg.seconds + beats_to_seconds(beat.max(0.0) - seg.beat, seg.bpm)
    }

    pub fn beat_at_seconds(&self, seconds: f64) -> f64 {
        let s = seconds.max(0.0);
        let idx = self.points.partition_point(|p| p.seconds <= s);
        let seg = &self.points[idx.saturating_sub(1)];
        seg.beat + seconds_to_beats(s - seg.seconds, seg.bpm)
    }

    /// True when the map is a single fixed-tempo segment.
    pub fn is_fixed(&self) -> bool {
        self.points.len() == 1
    }
}
