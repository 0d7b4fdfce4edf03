//! Per-language coaching profiles
//!
//! Process-wide immutable registry of audio expectations, benchmark tables,
//! coaching styles, and localized messages. Values for French and English
//! are fixed; new languages extend the registry without touching the core.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;

use coach_core::Language;

/// Audio expectations calibrated per language.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct AudioExpectations {
    /// Optimal speaking pace in syllables per second.
    pub optimal_pace: f64,
    pub natural_pace_min: f64,
    pub natural_pace_max: f64,
    /// Expected pitch variation ratio (stdev/mean).
    pub pitch_variance_expected: f64,
    /// Variation ratio below which delivery is flagged monotone.
    pub monotone_threshold: f64,
    pub volume_consistency_threshold: f64,
    /// Target RMS level, doubles as the optimal dynamic range anchor.
    pub dynamic_range_optimal: f64,
    /// Scaling applied to the raw clarity score.
    pub clarity_weight: f64,
    pub accent_tolerance: f64,
    /// Spoken units per second of active speech on the WPM scale used for
    /// pace scoring. Matches the optimal pace so full activity lands on the
    /// optimum.
    pub words_per_second: f64,
}

impl AudioExpectations {
    /// Optimal pace expressed on the WPM scale.
    pub fn optimal_wpm(&self) -> f64 {
        self.optimal_pace * 60.0
    }

    pub fn min_wpm(&self) -> f64 {
        self.natural_pace_min * 60.0
    }

    pub fn max_wpm(&self) -> f64 {
        self.natural_pace_max * 60.0
    }
}

/// One benchmark row: population mean, stdev, and quintile percentiles.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Benchmark {
    pub mean: f64,
    pub std: f64,
    /// p20, p40, p60, p80, p100.
    pub percentiles: [f64; 5],
}

impl Benchmark {
    /// Percentile rank of a score against the quintile table.
    pub fn percentile_rank(&self, score: f64) -> f64 {
        for (i, &p) in self.percentiles.iter().enumerate() {
            if score <= p {
                return (i as f64 + 1.0) * 20.0;
            }
        }
        100.0
    }

    pub fn z_score(&self, score: f64) -> f64 {
        if self.std > 0.0 {
            (score - self.mean) / self.std
        } else {
            0.0
        }
    }
}

/// Benchmark categories tracked per language.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BenchmarkTable {
    pub pace: Benchmark,
    pub volume: Benchmark,
    pub clarity: Benchmark,
    pub pitch_variation: Benchmark,
    pub consistency: Benchmark,
    pub engagement: Benchmark,
}

impl BenchmarkTable {
    pub fn get(&self, category: &str) -> Option<&Benchmark> {
        match category {
            "pace" => Some(&self.pace),
            "volume" => Some(&self.volume),
            "clarity" => Some(&self.clarity),
            "pitch_variation" => Some(&self.pitch_variation),
            "consistency" => Some(&self.consistency),
            "engagement" => Some(&self.engagement),
            _ => None,
        }
    }
}

/// Weights for combining the four sub-scores into the language score.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ScoreWeights {
    pub pace: f64,
    pub volume: f64,
    pub pitch: f64,
    pub clarity: f64,
}

/// Full per-language profile.
#[derive(Debug, Clone)]
pub struct LanguageProfile {
    pub language: Language,
    pub display_name: &'static str,
    /// Presentation-culture descriptor used in prompts and tests.
    pub culture: &'static str,
    pub audio: AudioExpectations,
    pub benchmarks: BenchmarkTable,
    pub weights: ScoreWeights,
    /// Prose guidance injected into the coaching prompt.
    pub coaching_style: &'static str,
    messages: HashMap<&'static str, &'static str>,
}

impl LanguageProfile {
    /// Localized UI message, falling back to the caller-supplied default.
    pub fn message<'a>(&self, key: &str, default: &'a str) -> &'a str {
        self.messages.get(key).copied().unwrap_or(default)
    }
}

fn french_messages() -> HashMap<&'static str, &'static str> {
    HashMap::from([
        ("volume_good", "Votre volume est approprié"),
        ("pace_slow_down", "Ralentissez votre débit de parole"),
        ("pace_slow_down_tip", "Prenez une pause et respirez profondément"),
        ("pace_speed_up", "Vous pouvez accélérer légèrement"),
        ("pace_speed_up_tip", "Augmentez votre énergie et votre rythme"),
        ("volume_inconsistent", "Maintenez un volume plus constant"),
        (
            "volume_inconsistent_tip",
            "Concentrez-vous sur une projection vocale régulière",
        ),
        ("clarity_low", "Articulez plus distinctement"),
        (
            "clarity_low_tip",
            "Ouvrez davantage la bouche et prononcez chaque syllabe",
        ),
        ("confidence_high", "Excellente assurance dans votre voix !"),
        ("confidence_high_tip", "Continuez avec cette belle énergie"),
        ("confidence_low", "Projetez plus de confiance"),
        (
            "confidence_low_tip",
            "Redressez-vous et parlez avec plus d'autorité",
        ),
        ("monotone", "Variez davantage votre intonation"),
        ("quality_milestone", "Performance Excellente !"),
        (
            "quality_milestone_desc",
            "Vous avez atteint un niveau de qualité exceptionnel",
        ),
        ("consistency_milestone", "Consistance Remarquable !"),
        (
            "consistency_milestone_desc",
            "Vous maintenez une performance très régulière",
        ),
        ("improvement_milestone", "Progression Significative !"),
        ("endurance_milestone", "Belle Endurance !"),
        ("fallback_summary", "Analyse en cours, continuez votre présentation."),
        ("fallback_strength", "Vous maintenez un bon rythme"),
        ("fallback_encouragement", "Vous progressez bien, continuez !"),
        ("fallback_next_focus", "Maintenir la consistance"),
    ])
}

fn english_messages() -> HashMap<&'static str, &'static str> {
    HashMap::from([
        ("volume_good", "Your volume level is perfect"),
        ("pace_slow_down", "Slow down your speaking pace"),
        ("pace_slow_down_tip", "Pause and take a deep breath"),
        ("pace_speed_up", "You can pick up the pace a little"),
        ("pace_speed_up_tip", "Bring more energy and rhythm"),
        ("volume_inconsistent", "Keep your volume more consistent"),
        ("volume_inconsistent_tip", "Focus on steady vocal projection"),
        ("clarity_low", "Articulate more distinctly"),
        ("clarity_low_tip", "Open your mouth wider and sound out each syllable"),
        ("confidence_high", "Great confidence in your voice!"),
        ("confidence_high_tip", "Keep that energy going"),
        ("confidence_low", "Project more confidence"),
        ("confidence_low_tip", "Stand tall and speak with authority"),
        ("monotone", "Vary your intonation more"),
        ("quality_milestone", "Excellent Performance!"),
        ("quality_milestone_desc", "You reached an exceptional quality level"),
        ("consistency_milestone", "Remarkable Consistency!"),
        (
            "consistency_milestone_desc",
            "You are maintaining a very steady performance",
        ),
        ("improvement_milestone", "Significant Progress!"),
        ("endurance_milestone", "Great Endurance!"),
        ("fallback_summary", "Analysis in progress, keep presenting."),
        ("fallback_strength", "You are keeping a good rhythm"),
        ("fallback_encouragement", "You are doing well, keep going!"),
        ("fallback_next_focus", "Maintain consistency"),
    ])
}

static REGISTRY: Lazy<HashMap<Language, LanguageProfile>> = Lazy::new(|| {
    let mut registry = HashMap::new();

    registry.insert(
        Language::French,
        LanguageProfile {
            language: Language::French,
            display_name: "Français",
            culture: "academic_and_structured",
            audio: AudioExpectations {
                optimal_pace: 4.7,
                natural_pace_min: 3.8,
                natural_pace_max: 5.6,
                pitch_variance_expected: 0.15,
                monotone_threshold: 0.08,
                volume_consistency_threshold: 0.8,
                dynamic_range_optimal: 0.06,
                clarity_weight: 1.1,
                accent_tolerance: 0.6,
                words_per_second: 4.7,
            },
            benchmarks: BenchmarkTable {
                pace: Benchmark {
                    mean: 4.7,
                    std: 0.8,
                    percentiles: [3.8, 4.2, 4.7, 5.2, 5.6],
                },
                volume: Benchmark {
                    mean: 0.06,
                    std: 0.015,
                    percentiles: [0.04, 0.05, 0.06, 0.07, 0.08],
                },
                clarity: Benchmark {
                    mean: 0.78,
                    std: 0.12,
                    percentiles: [0.65, 0.72, 0.78, 0.85, 0.92],
                },
                pitch_variation: Benchmark {
                    mean: 0.15,
                    std: 0.05,
                    percentiles: [0.08, 0.12, 0.15, 0.18, 0.22],
                },
                consistency: Benchmark {
                    mean: 0.82,
                    std: 0.08,
                    percentiles: [0.72, 0.78, 0.82, 0.87, 0.93],
                },
                engagement: Benchmark {
                    mean: 0.71,
                    std: 0.11,
                    percentiles: [0.58, 0.65, 0.71, 0.78, 0.86],
                },
            },
            weights: ScoreWeights {
                pace: 0.25,
                volume: 0.2,
                pitch: 0.2,
                clarity: 0.35,
            },
            coaching_style: "structuré, formel et nuancé - privilégie la rigueur \
                 logique, l'élégance verbale et la précision",
            messages: french_messages(),
        },
    );

    registry.insert(
        Language::English,
        LanguageProfile {
            language: Language::English,
            display_name: "English",
            culture: "engaging_and_storytelling",
            audio: AudioExpectations {
                optimal_pace: 3.7,
                natural_pace_min: 2.9,
                natural_pace_max: 4.5,
                pitch_variance_expected: 0.25,
                monotone_threshold: 0.12,
                volume_consistency_threshold: 0.7,
                dynamic_range_optimal: 0.08,
                clarity_weight: 0.95,
                accent_tolerance: 0.8,
                words_per_second: 3.7,
            },
            benchmarks: BenchmarkTable {
                pace: Benchmark {
                    mean: 3.7,
                    std: 0.6,
                    percentiles: [2.9, 3.3, 3.7, 4.1, 4.5],
                },
                volume: Benchmark {
                    mean: 0.08,
                    std: 0.02,
                    percentiles: [0.055, 0.065, 0.08, 0.095, 0.11],
                },
                clarity: Benchmark {
                    mean: 0.73,
                    std: 0.14,
                    percentiles: [0.58, 0.66, 0.73, 0.81, 0.89],
                },
                pitch_variation: Benchmark {
                    mean: 0.25,
                    std: 0.08,
                    percentiles: [0.15, 0.20, 0.25, 0.30, 0.37],
                },
                consistency: Benchmark {
                    mean: 0.76,
                    std: 0.12,
                    percentiles: [0.62, 0.70, 0.76, 0.83, 0.91],
                },
                engagement: Benchmark {
                    mean: 0.79,
                    std: 0.09,
                    percentiles: [0.68, 0.74, 0.79, 0.85, 0.92],
                },
            },
            weights: ScoreWeights {
                pace: 0.25,
                volume: 0.2,
                pitch: 0.25,
                clarity: 0.3,
            },
            coaching_style: "direct, storytelling-driven and engaging - favors \
                 dynamic delivery, narrative hooks and audience connection",
            messages: english_messages(),
        },
    );

    registry
});

/// Look up the immutable profile for a language.
pub fn language_profile(language: Language) -> &'static LanguageProfile {
    REGISTRY
        .get(&language)
        .unwrap_or_else(|| &REGISTRY[&Language::French])
}

/// Localized UI message with a caller-supplied fallback.
pub fn ui_message<'a>(key: &str, language: Language, default: &'a str) -> &'a str {
    language_profile(language).message(key, default)
}

/// Summaries for the supported-languages endpoint.
pub fn supported_languages() -> Vec<serde_json::Value> {
    Language::all()
        .iter()
        .map(|lang| {
            let profile = language_profile(*lang);
            serde_json::json!({
                "code": lang.code(),
                "name": profile.display_name,
                "culture": profile.culture,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_has_both_languages() {
        let langs = supported_languages();
        assert_eq!(langs.len(), 2);
        assert!(langs.iter().any(|l| l["code"] == "fr"));
        assert!(langs.iter().any(|l| l["code"] == "en"));
    }

    #[test]
    fn test_profile_values() {
        let fr = language_profile(Language::French);
        let en = language_profile(Language::English);

        assert_eq!(fr.audio.optimal_pace, 4.7);
        assert_eq!(en.audio.optimal_pace, 3.7);

        // French expects faster pace bounds.
        assert!(fr.audio.natural_pace_min > en.audio.natural_pace_min);
        assert!(fr.audio.natural_pace_max > en.audio.natural_pace_max);

        // English allows more pitch variation, less volume strictness.
        assert!(en.audio.pitch_variance_expected > fr.audio.pitch_variance_expected);
        assert!(en.audio.volume_consistency_threshold < fr.audio.volume_consistency_threshold);
    }

    #[test]
    fn test_ui_messages_localized() {
        let fr = ui_message("volume_good", Language::French, "default");
        assert_eq!(fr, "Votre volume est approprié");

        let en = ui_message("volume_good", Language::English, "default");
        assert_eq!(en, "Your volume level is perfect");

        let missing = ui_message("unknown_key", Language::French, "default");
        assert_eq!(missing, "default");
    }

    #[test]
    fn test_percentile_rank() {
        let clarity = language_profile(Language::French).benchmarks.clarity;
        assert_eq!(clarity.percentile_rank(0.60), 20.0);
        assert_eq!(clarity.percentile_rank(0.78), 60.0);
        assert_eq!(clarity.percentile_rank(0.95), 100.0);
    }

    #[test]
    fn test_z_score() {
        let pace = language_profile(Language::English).benchmarks.pace;
        assert!((pace.z_score(3.7)).abs() < 1e-9);
        assert!((pace.z_score(4.3) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_weights_sum_to_one() {
        for lang in Language::all() {
            let w = language_profile(*lang).weights;
            let sum = w.pace + w.volume + w.pitch + w.clarity;
            assert!((sum - 1.0).abs() < 1e-9);
        }
    }
}
