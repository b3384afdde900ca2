use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Shape of the segment to the RIGHT of a point. The left point owns the
/// curve, so the segment p0..p1 is drawn with `p0.curve`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CurveType {
    Linear,
    Exponential,
    Step,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AutomationPoint {
    pub beat: f64,
    /// Normalized value in [0, 1]; targets map it to their own range.
    pub value: f64,
    pub curve: CurveType,
}

impl AutomationPoint {
    pub fn new(beat: f64, value: f64, curve: CurveType) -> Self {
        Self { beat: beat.max(0.0), value: value.clamp(0.0, 1.0), curve }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AutomationTarget {
    TrackVolume { track: Uuid },
    TrackPan { track: Uuid },
    TrackMute { track: Uuid },
    EffectWet { track: Uuid, effect: Uuid },
    Tempo,
}

impl AutomationTarget {
    /// Track this target belongs to, if any.
    pub fn track(&self) -> Option<Uuid> {
        match self {
            Self::TrackVolume { track }
            | Self::TrackPan { track }
            | Self::TrackMute { track }
            | Self::EffectWet { track, .. } => Some(*track),
            Self::Tempo => None,
        }
    }

    pub fn effect(&self) -> Option<Uuid> {
        match self {
            Self::EffectWet { effect, .. } => Some(*effect),
            _ => None,
        }
    }
}

/// A breakpoint curve over musical time. Points are kept sorted by beat;
/// inserting at an existing beat replaces that point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationLane {
    pub id: Uuid,
    pub target: AutomationTarget,
    pub enabled: bool,
    pub points: Vec<AutomationPoint>,
}

impl AutomationLane {
    pub fn new(target: AutomationTarget) -> Self {
        Self { id: Uuid::new_v4(), target, enabled: true, points: Vec::new() }
    }

    pub fn add_point(&mut self, beat: f64, value: f64, curve: CurveType) {
        let point = AutomationPoint::new(beat, value, curve);
        match self.points.iter().position(|p| p.beat >= point.beat) {
            Some(i) if self.points[i].beat == point.beat => self.points[i] = point,
            Some(i) => self.points.insert(i, point),
            None => self.points.push(point),
        }
    }

    pub fn remove_point_at(&mut self, beat: f64) -> bool {
        let before = self.points.len();
        self.points.retain(|p| p.beat != beat);
        self.points.len() != before
    }

    /// Samples the curve. Flat outside the breakpoint range, 0.5 when the
    /// lane has no points at all.
    pub fn value_at(&self, beat: f64) -> f64 {
        let points = &self.points;
        if points.is_empty() {
            return 0.5;
        }
        if beat <= points[0].beat {
            return points[0].value;
        }
        let last = &points[points.len() - 1];
        if beat >= last.beat {
            return last.value;
        }
        // points.len() >= 2 here and beat lies strictly inside the range
        let right = points.partition_point(|p| p.beat <= beat);
        let p0 = &points[right - 1];
        let p1 = &points[right];
        let span = p1.beat - p0.beat;
        if span <= f64::EPSILON {
            return p1.value;
        }
        let frac = (beat - p0.beat) / span;
        match p0.curve {
            CurveType::Linear => p0.value + (p1.value - p0.value) * frac,
            CurveType::Exponential => p0.value + (p1.value - p0.value) * frac * frac,
            CurveType::Step => p0.value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lane_with(points: &[(f64, f64, CurveType)]) -> AutomationLane {
        let mut lane = AutomationLane::new(AutomationTarget::Tempo);
        for &(beat, value, curve) in points {
            lane.add_point(beat, value, curve);
        }
        lane
    }

    #[test]
    fn empty_lane_is_neutral() {
        let lane = AutomationLane::new(AutomationTarget::Tempo);
        assert_eq!(lane.value_at(0.0), 0.5);
        assert_eq!(lane.value_at(100.0), 0.5);
    }

    #[test]
    fn linear_interpolates() {
        let lane = lane_with(&[(0.0, 0.0, CurveType::Linear), (4.0, 1.0, CurveType::Linear)]);
        assert!((lane.value_at(1.0) - 0.25).abs() < 1e-9);
        assert!((lane.value_at(2.0) - 0.5).abs() < 1e-9);
        assert!((lane.value_at(3.0) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn exponential_squares_the_fraction() {
        let lane =
            lane_with(&[(0.0, 0.0, CurveType::Exponential), (4.0, 1.0, CurveType::Linear)]);
        assert!((lane.value_at(2.0) - 0.25).abs() < 1e-9);
        assert!((lane.value_at(4.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn step_holds_left_value() {
        let lane = lane_with(&[(0.0, 0.2, CurveType::Step), (4.0, 0.9, CurveType::Linear)]);
        assert!((lane.value_at(3.999) - 0.2).abs() < 1e-9);
        assert!((lane.value_at(4.0) - 0.9).abs() < 1e-9);
    }

    #[test]
    fn extrapolation_is_flat() {
        let lane = lane_with(&[(2.0, 0.3, CurveType::Linear), (6.0, 0.8, CurveType::Linear)]);
        assert!((lane.value_at(0.0) - 0.3).abs() < 1e-9);
        assert!((lane.value_at(10.0) - 0.8).abs() < 1e-9);
    }

    #[test]
    fn curve_tag_comes_from_left_point() {
        // Step into linear: the first segment steps, the second ramps.
        let lane = lane_with(&[
            (0.0, 0.0, CurveType::Step),
            (2.0, 0.5, CurveType::Linear),
            (4.0, 1.0, CurveType::Linear),
        ]);
        assert!((lane.value_at(1.0) - 0.0).abs() < 1e-9);
        assert!((lane.value_at(3.0) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn same_beat_insert_replaces() {
        let mut lane = lane_with(&[(0.0, 0.1, CurveType::Linear)]);
        lane.add_point(0.0, 0.9, CurveType::Step);
        assert_eq!(lane.points.len(), 1);
        assert_eq!(lane.points[0].value, 0.9);
        assert_eq!(lane.points[0].curve, CurveType::Step);
    }

    #[test]
    fn points_stay_sorted() {
        let lane = lane_with(&[
            (8.0, 0.1, CurveType::Linear),
            (0.0, 0.2, CurveType::Linear),
            (4.0, 0.3, CurveType::Linear),
        ]);
        let beats: Vec<f64> = lane.points.iter().map(|p| p.beat).collect();
        assert_eq!(beats, vec![0.0, 4.0, 8.0]);
    }

    #[test]
    fn values_clamp_to_unit_range() {
        let lane = lane_with(&[(0.0, 7.5, CurveType::Linear)]);
        assert_eq!(lane.points[0].value, 1.0);
    }
}
