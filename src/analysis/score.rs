//! Spectral balance score: a crude 0..1 heuristic over band energy.
//!
//! Penalizes sub dominance vs the rest of the spectrum, high-end harshness
//! vs the mids, and overall loudness outliers. Used by the style-pack
//! iteration loop together with the sanity gate (final score = min of both).

use serde::Serialize;

use crate::analysis::bands::{band_energy_report, BandReport};
use crate::error::Result;

/// Spectral score with its reasons and raw band report
#[derive(Debug, Clone, Serialize)]
pub struct SpectralScore {
    pub score: f64,
    pub reasons: Vec<String>,
    pub report: BandReport,
}

/// Compute the spectral score from a band report (pure)
pub fn score_spectral(report: &BandReport) -> SpectralScore {
    let get = |k: &str| report.get(k).copied().unwrap_or_default().mean_volume;
    let full = get("full");
    let sub = get("sub_lt90");
    let rest = get("rest_ge90");
    let mid = get("mid_200_4k");
    let high = get("high_ge4k");

    let mut penalties: Vec<(f64, String)> = Vec::new();

    // Low end balance; volumes are negative dBFS, "louder" is closer to 0.
    let sub_minus_rest = sub - rest;
    if sub_minus_rest > 6.0 {
        penalties.push((
            ((sub_minus_rest - 6.0) / 20.0).min(0.35),
            format!("too much low end (sub-rest={:.1}dB)", sub_minus_rest),
        ));
    }
    if sub_minus_rest < -6.0 {
        penalties.push((
            ((-6.0 - sub_minus_rest) / 24.0).min(0.25),
            format!("too little low end (sub-rest={:.1}dB)", sub_minus_rest),
        ));
    }

    // High end harshness vs mids.
    if mid != 0.0 && high != 0.0 {
        let high_minus_mid = high - mid;
        if high_minus_mid > 4.0 {
            penalties.push((
                ((high_minus_mid - 4.0) / 18.0).min(0.25),
                format!("too much high end (high-mid={:.1}dB)", high_minus_mid),
            ));
        }
    }

    // Overall loudness sanity.
    if full < -33.0 {
        penalties.push((0.15, format!("overall too quiet (mean={:.1}dB)", full)));
    }
    if full > -10.0 {
        penalties.push((0.15, format!("overall too hot (mean={:.1}dB)", full)));
    }

    let penalty: f64 = penalties.iter().map(|(p, _)| p).sum();
    SpectralScore {
        score: (1.0 - penalty).clamp(0.0, 1.0),
        reasons: penalties.into_iter().map(|(_, r)| r).collect(),
        report: report.clone(),
    }
}

/// Run the spectral score against an audio file
pub fn spectral_balance_score(in_audio: &str) -> Result<SpectralScore> {
    Ok(score_spectral(&band_energy_report(in_audio)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::bands::BandVolume;

    fn report(full: f64, sub: f64, rest: f64, mid: f64, high: f64) -> BandReport {
        let mut b = BandReport::new();
        let mk = |mean: f64| BandVolume {
            mean_volume: mean,
            max_volume: -3.0,
        };
        b.insert("full".to_string(), mk(full));
        b.insert("sub_lt90".to_string(), mk(sub));
        b.insert("rest_ge90".to_string(), mk(rest));
        b.insert("low_90_200".to_string(), mk(sub));
        b.insert("mid_200_4k".to_string(), mk(mid));
        b.insert("high_ge4k".to_string(), mk(high));
        b
    }

    #[test]
    fn test_balanced_scores_high() {
        let s = score_spectral(&report(-18.0, -22.0, -19.0, -19.0, -24.0));
        assert!(s.score > 0.95);
        assert!(s.reasons.is_empty());
    }

    #[test]
    fn test_boomy_sub_penalized() {
        let s = score_spectral(&report(-18.0, -8.0, -22.0, -22.0, -26.0));
        assert!(s.reasons.iter().any(|r| r.contains("too much low end")));
        assert!(s.score < 1.0);
    }

    #[test]
    fn test_thin_sub_penalized() {
        let s = score_spectral(&report(-18.0, -40.0, -20.0, -20.0, -26.0));
        assert!(s.reasons.iter().any(|r| r.contains("too little low end")));
    }

    #[test]
    fn test_penalties_are_capped() {
        // absurd sub dominance still caps at 0.35
        let balanced = score_spectral(&report(-18.0, -22.0, -19.0, -19.0, -24.0)).score;
        let boomy = score_spectral(&report(-18.0, 0.0, -60.0, -19.0, -24.0)).score;
        assert!(balanced - boomy <= 0.35 + 1e-9);
    }
}
