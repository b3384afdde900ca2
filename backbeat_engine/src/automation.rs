use backbeat_shared::automation::{AutomationLane, AutomationTarget};
use uuid::Uuid;

use crate::events::{EventKind, ParamTarget, ScheduledEvent};
use crate::timebase::TempoMap;

/// Splits a lane target into the owning track and the backend parameter.
/// Tempo returns None: it shapes the tempo map instead of becoming a
/// runtime event.
pub fn param_target(target: &AutomationTarget) -> Option<(Uuid, ParamTarget)> {
    match target {
        AutomationTarget::TrackVolume { track } => Some((*track, ParamTarget::Volume)),
        AutomationTarget::TrackPan { track } => Some((*track, ParamTarget::Pan)),
        AutomationTarget::TrackMute { track } => Some((*track, ParamTarget::Mute)),
        AutomationTarget::EffectWet { track, effect } => {
            Some((*track, ParamTarget::EffectWet(*effect)))
        }
        AutomationTarget::Tempo => None,
    }
}

/// Maps a normalized lane value onto the parameter's own range.
pub fn map_value(target: ParamTarget, value: f64) -> f32 {
    let v = value.clamp(0.0, 1.0) as f32;
    match target {
        ParamTarget::Volume => v,
        ParamTarget::Pan => v * 2.0 - 1.0,
        // 1.0 = muted, 0.0 = open.
        ParamTarget::Mute => {
            if v >= 0.5 {
                1.0
            } else {
                0.0
            }
        }
        ParamTarget::EffectWet(_) => v,
    }
}

/// One discrete ParamSet per breakpoint. The curve between breakpoints is
/// display/query-side only; playback jumps at each point.
pub fn lane_events(lane: &AutomationLane, map: &TempoMap) -> Vec<ScheduledEvent> {
    let Some((track, target)) = param_target(&lane.target) else {
        return Vec::new();
    };
    lane.points
        .iter()
        .map(|p| ScheduledEvent {
            time_seconds: map.seconds_at_beat(p.beat),
            track,
            kind: EventKind::ParamSet { target, value: map_value(target, p.value) },
        })
        .collect()
}
