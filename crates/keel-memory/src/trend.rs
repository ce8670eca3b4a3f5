use crate::sample::SampleHistory;

/// Number of recent samples the growth estimate looks at.
const TREND_WINDOW: usize = 3;

/// Average fractional per-step growth of effective usage over the last
/// [`TREND_WINDOW`] samples.
///
/// Averaging over the window keeps a single spiky sample from dominating:
/// one large reading between flat neighbors contributes one inflated step
/// and one deflated step, which mostly cancel. Fewer than two samples (or
/// all-zero usage) yields `0.0`. The result may be negative when usage is
/// shrinking.
pub fn growth_rate(history: &SampleHistory) -> f64 {
    let usages: Vec<u64> = history
        .recent(TREND_WINDOW)
        .map(|sample| sample.effective_usage())
        .collect();
    if usages.len() < 2 {
        return 0.0;
    }

    let mut total = 0.0;
    let mut steps = 0u32;
    for pair in usages.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        if prev == 0 {
            continue;
        }
        total += (next as f64 - prev as f64) / (prev as f64);
        steps += 1;
    }
    if steps == 0 {
        return 0.0;
    }
    total / f64::from(steps)
}

/// Map a growth rate to a risk score in `[0, 1]`.
///
/// The transform is `ln(1 + rate) / ln 2`: monotone, concave and bounded,
/// saturating once usage doubles per step. Negative rates score zero.
pub fn risk_score(rate: f64) -> f64 {
    let rate = if rate.is_finite() { rate.max(0.0) } else { 0.0 };
    (rate.ln_1p() / std::f64::consts::LN_2).clamp(0.0, 1.0)
}

/// Widen a projected usage by the current risk: `projected * (1 + risk)`.
pub fn adjusted_projection(projected_bytes: u64, risk: f64) -> u64 {
    let risk = risk.clamp(0.0, 1.0);
    let adjusted = (projected_bytes as f64) * (1.0 + risk);
    if adjusted >= u64::MAX as f64 {
        u64::MAX
    } else {
        adjusted.round() as u64
    }
}

/// How many concurrent remediation operations are allowed at the given risk.
///
/// Shrinks sub-linearly from `base` at zero risk down to one at full risk;
/// never returns zero, so remediation can always make progress.
pub fn remediation_allowance(base: usize, risk: f64) -> usize {
    if base <= 1 {
        return 1;
    }
    let risk = risk.clamp(0.0, 1.0);
    let shrunk = (base as f64) / (1.0 + risk * (base as f64 - 1.0));
    (shrunk.floor() as usize).max(1)
}
