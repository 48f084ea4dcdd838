use crate::config::CogitoCfg;
use crate::types::{AffectReading, EventKind};

/// Width of one priority band.
const BAND_WIDTH: u32 = 100;
/// Offset of an unstressed event inside its band.
const BAND_BASE: u32 = 50;
/// Largest stress boost; keeps a boosted event inside its own band.
const MAX_BOOST: u32 = 49;
/// Floor for the importance of an event context entry.
const MIN_CONTEXT_IMPORTANCE: f32 = 0.05;

/// Deterministic priority: `band * 100 + 50 - boost`. Lower is more urgent.
pub fn priority_for(cfg: &CogitoCfg, kind: EventKind, affect: &AffectReading) -> u32 {
    let band = cfg.band_for(kind);
    band.saturating_mul(BAND_WIDTH)
        .saturating_add(BAND_BASE)
        .saturating_sub(stress_boost(affect.stress(), cfg.stress_threshold))
}

/// Boost in `[0, 49]`, proportional to how far stress exceeds the threshold.
pub fn stress_boost(stress: f32, threshold: f32) -> u32 {
    if !stress.is_finite() || !threshold.is_finite() || threshold >= 1.0 || stress <= threshold {
        return 0;
    }
    let threshold = threshold.max(0.0);
    let excess = ((stress.min(1.0) - threshold) / (1.0 - threshold)).clamp(0.0, 1.0);
    ((excess * MAX_BOOST as f32).ceil() as u32).min(MAX_BOOST)
}

/// Importance of the context entry written for an event of `kind`.
pub fn context_importance(cfg: &CogitoCfg, kind: EventKind) -> f32 {
    let band = cfg.band_for(kind) as f32;
    let lowest = cfg.lowest_band() as f32;
    (1.0 - band / (lowest + 1.0)).clamp(MIN_CONTEXT_IMPORTANCE, 1.0)
}
