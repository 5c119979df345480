//! # Rendition Selection
//!
//! Pure mapping from quality mode, bandwidth and saver state to a playable
//! URI. A local vault copy always wins.

use crate::asset::{MediaAsset, QualityMode, Rendition};
use crate::estimator::BandwidthEstimate;
use std::path::Path;

/// Below this many Mbps Auto picks 240p.
pub const LOW_TIER_MBPS: f64 = 1.0;
/// At or above this many Mbps Auto picks 720p.
pub const HIGH_TIER_MBPS: f64 = 3.0;

/// What the player should load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedSource {
    pub uri: String,
    /// `None` for a local copy.
    pub rendition: Option<Rendition>,
    pub local: bool,
}

impl SelectedSource {
    /// Tag for logs and events.
    pub fn label(&self) -> &'static str {
        match self.rendition {
            _ if self.local => "local",
            Some(rendition) => rendition.tag(),
            None => "unknown",
        }
    }
}

/// Tier Auto mode wants for `mbps`.
///
/// `b < 1` → 240p, `1 <= b < 3` → 360p, `b >= 3` → 720p.
pub fn tier_for_bandwidth(mbps: f64) -> Rendition {
    if mbps < LOW_TIER_MBPS {
        Rendition::P240
    } else if mbps < HIGH_TIER_MBPS {
        Rendition::P360
    } else {
        Rendition::P720
    }
}

/// Tier that would be requested, before checking what the asset carries.
///
/// Saver forces the lowest tier; Auto without a sample behaves like zero
/// bandwidth.
pub fn desired_rendition(mode: QualityMode, bandwidth: BandwidthEstimate, saver_on: bool) -> Rendition {
    if saver_on {
        return Rendition::P240;
    }
    match mode {
        QualityMode::Auto => tier_for_bandwidth(bandwidth.mbps().unwrap_or(0.0)),
        QualityMode::Fixed(rendition) => rendition,
    }
}

/// Choose the source for `asset`.
///
/// Returns `None` only when nothing is playable: no local copy, no
/// matching tier and no canonical URL.
pub fn select(
    mode: QualityMode,
    bandwidth: BandwidthEstimate,
    saver_on: bool,
    asset: &MediaAsset,
    local: Option<&Path>,
) -> Option<SelectedSource> {
    if let Some(path) = local {
        return Some(SelectedSource {
            uri: path.to_string_lossy().into_owned(),
            rendition: None,
            local: true,
        });
    }

    let wanted = if saver_on {
        // Lowest tier the asset actually has.
        asset.lowest_tier().unwrap_or(Rendition::AutoSource)
    } else {
        desired_rendition(mode, bandwidth, saver_on)
    };

    if let Some(uri) = asset.rendition_url(wanted) {
        return Some(SelectedSource {
            uri: uri.to_string(),
            rendition: Some(wanted),
            local: false,
        });
    }

    canonical_url(asset).map(|uri| SelectedSource {
        uri: uri.to_string(),
        rendition: Some(Rendition::AutoSource),
        local: false,
    })
}

fn canonical_url(asset: &MediaAsset) -> Option<&str> {
    asset
        .url
        .as_deref()
        .or_else(|| asset.rendition_url(Rendition::AutoSource))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn asset_with(tiers: &[Rendition]) -> MediaAsset {
        let mut asset = MediaAsset::offline("c1", "v1", "Lesson", None);
        asset.url = Some("https://cdn/source.mp4".to_string());
        asset.renditions = tiers
            .iter()
            .map(|t| (*t, format!("https://cdn/{}.mp4", t.tag())))
            .collect::<BTreeMap<_, _>>();
        asset
    }

    fn all_tiers() -> MediaAsset {
        asset_with(&Rendition::TIERS)
    }

    fn picked(mode: QualityMode, mbps: f64, saver: bool, asset: &MediaAsset) -> Option<Rendition> {
        select(mode, BandwidthEstimate::from_mbps(mbps), saver, asset, None)
            .and_then(|s| s.rendition)
    }

    #[test]
    fn test_auto_thresholds() {
        let asset = all_tiers();
        let cases = [
            (0.0, Rendition::P240),
            (0.5, Rendition::P240),
            (0.999, Rendition::P240),
            (1.0, Rendition::P360),
            (2.0, Rendition::P360),
            (2.999, Rendition::P360),
            (3.0, Rendition::P720),
            (50.0, Rendition::P720),
        ];
        for (mbps, expected) in cases {
            assert_eq!(
                picked(QualityMode::Auto, mbps, false, &asset),
                Some(expected),
                "bandwidth {} Mbps",
                mbps
            );
        }
    }

    #[test]
    fn test_auto_threshold_sweep() {
        let asset = all_tiers();
        let mut mbps = 0.0;
        while mbps < 6.0 {
            let expected = if mbps < 1.0 {
                Rendition::P240
            } else if mbps < 3.0 {
                Rendition::P360
            } else {
                Rendition::P720
            };
            assert_eq!(tier_for_bandwidth(mbps), expected);
            assert_eq!(picked(QualityMode::Auto, mbps, false, &asset), Some(expected));
            mbps += 0.0625;
        }
    }

    #[test]
    fn test_no_sample_selects_lowest() {
        let asset = all_tiers();
        let source = select(QualityMode::Auto, BandwidthEstimate::NoSample, false, &asset, None).unwrap();
        assert_eq!(source.rendition, Some(Rendition::P240));
    }

    #[test]
    fn test_saver_forces_240p() {
        let asset = all_tiers();
        for mode in [
            QualityMode::Auto,
            QualityMode::Fixed(Rendition::P720),
            QualityMode::Fixed(Rendition::P360),
            QualityMode::Fixed(Rendition::AutoSource),
        ] {
            for mbps in [0.0, 1.5, 100.0] {
                assert_eq!(picked(mode, mbps, true, &asset), Some(Rendition::P240));
            }
        }
    }

    #[test]
    fn test_saver_uses_lowest_available_tier() {
        let asset = asset_with(&[Rendition::P360, Rendition::P720]);
        assert_eq!(picked(QualityMode::Auto, 10.0, true, &asset), Some(Rendition::P360));
    }

    #[test]
    fn test_fixed_mode_ignores_bandwidth() {
        let asset = all_tiers();
        assert_eq!(
            picked(QualityMode::Fixed(Rendition::P720), 0.1, false, &asset),
            Some(Rendition::P720)
        );
    }

    #[test]
    fn test_missing_tier_falls_back_to_canonical() {
        let asset = asset_with(&[Rendition::P240]);
        let source = select(
            QualityMode::Fixed(Rendition::P720),
            BandwidthEstimate::NoSample,
            false,
            &asset,
            None,
        )
        .unwrap();
        assert_eq!(source.uri, "https://cdn/source.mp4");
        assert_eq!(source.rendition, Some(Rendition::AutoSource));

        let source = select(QualityMode::Auto, BandwidthEstimate::from_mbps(5.0), false, &asset, None).unwrap();
        assert_eq!(source.uri, "https://cdn/source.mp4");
    }

    #[test]
    fn test_local_copy_takes_priority() {
        let asset = all_tiers();
        let local = PathBuf::from("/tmp/playback/v1.mp4");
        for saver in [false, true] {
            let source = select(
                QualityMode::Fixed(Rendition::P720),
                BandwidthEstimate::from_mbps(10.0),
                saver,
                &asset,
                Some(&local),
            )
            .unwrap();
            assert!(source.local);
            assert_eq!(source.uri, "/tmp/playback/v1.mp4");
            assert_eq!(source.label(), "local");
        }
    }

    #[test]
    fn test_nothing_playable() {
        let asset = MediaAsset::offline("c1", "v1", "Lesson", None);
        assert!(select(QualityMode::Auto, BandwidthEstimate::NoSample, false, &asset, None).is_none());
    }
}
