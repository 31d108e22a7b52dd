//! Named tuning presets

use serde::{Deserialize, Serialize};

/// Audio preset for tuning the analysis to different listening styles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioPreset {
    pub name: String,
    pub smoothing_factor: f32,
    pub peak_decay: f32,
    pub onset_threshold: f32,
    pub sensitivity: f32,
    pub bass_boost: f32,
}

/// Return all built-in presets
pub fn get_presets() -> Vec<AudioPreset> {
    vec![
        AudioPreset {
            name: "auto".into(),
            smoothing_factor: 0.75,
            peak_decay: 0.95,
            onset_threshold: 0.25,
            sensitivity: 1.0,
            bass_boost: 1.0,
        },
        AudioPreset {
            name: "ambient".into(),
            smoothing_factor: 0.9,
            peak_decay: 0.98,
            onset_threshold: 0.3,
            sensitivity: 1.0,
            bass_boost: 1.0,
        },
        AudioPreset {
            name: "reactive".into(),
            smoothing_factor: 0.4,
            peak_decay: 0.9,
            onset_threshold: 0.2,
            sensitivity: 1.3,
            bass_boost: 1.2,
        },
        AudioPreset {
            name: "club".into(),
            smoothing_factor: 0.6,
            peak_decay: 0.92,
            onset_threshold: 0.22,
            sensitivity: 1.1,
            bass_boost: 1.5,
        },
        AudioPreset {
            name: "chill".into(),
            smoothing_factor: 0.85,
            peak_decay: 0.97,
            onset_threshold: 0.3,
            sensitivity: 0.9,
            bass_boost: 1.0,
        },
    ]
}

/// Look up a preset by name (case-insensitive)
pub fn get_preset(name: &str) -> Option<AudioPreset> {
    get_presets()
        .into_iter()
        .find(|p| p.name.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_preset_is_case_insensitive() {
        let preset = get_preset("CLUB").expect("club preset should exist");
        assert_eq!(preset.name, "club");
        assert_eq!(preset.bass_boost, 1.5);
    }

    #[test]
    fn get_preset_returns_none_for_unknown_name() {
        assert!(get_preset("polka").is_none());
    }

    #[test]
    fn presets_stay_within_gain_limits() {
        for preset in get_presets() {
            assert!((0.0..=1.0).contains(&preset.smoothing_factor), "{}", preset.name);
            assert!((0.0..=1.0).contains(&preset.peak_decay), "{}", preset.name);
            assert!((0.1..=3.0).contains(&preset.sensitivity), "{}", preset.name);
            assert!((0.5..=3.0).contains(&preset.bass_boost), "{}", preset.name);
        }
    }

    #[test]
    fn auto_matches_default_tuning() {
        let auto = get_preset("auto").unwrap();
        let config = crate::audio::AudioConfig::default();
        assert_eq!(auto.smoothing_factor, config.smoothing_factor);
        assert_eq!(auto.peak_decay, config.peak_decay);
        assert_eq!(auto.onset_threshold, config.beat.onset_threshold);
    }
}
