//! Feedback generation
//!
//! Two paths over every analysis result: a deterministic rule engine for
//! realtime suggestions, and throttled LLM coaching with a rule-based
//! fallback when the upstream fails or replies with garbage.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use coach_config::{language_profile, ui_message, LanguageProfile};
use coach_core::{
    CoachingFeedback, CoachingReply, FeedbackItem, FeedbackKind, FeedbackSource, Improvement,
    Severity, VoiceMetrics,
};
use coach_upstream::CoachingModel;

/// At most this many realtime items per chunk; higher severity wins.
const MAX_FEEDBACK_PER_CHUNK: usize = 3;
/// A rule that fired within this many recent chunks is suppressed.
const DEDUP_CHUNKS: usize = 3;
/// Bounded feedback history kept for prompt context.
const HISTORY_LIMIT: usize = 15;

/// Identifies a realtime rule for cross-chunk dedup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RuleId {
    PaceFast,
    PaceSlow,
    VolumeInconsistent,
    ClarityLow,
    ConfidenceHigh,
    ConfidenceLow,
}

/// Rule-based and LLM-assisted coaching feedback for one session.
pub struct FeedbackGenerator {
    profile: &'static LanguageProfile,
    model: Option<Arc<dyn CoachingModel>>,
    feedback_frequency: u32,
    llm_deadline: Duration,

    strengths: BTreeSet<String>,
    improvement_areas: BTreeSet<String>,
    theme_counts: BTreeMap<String, u32>,
    history: VecDeque<FeedbackItem>,
    recent_rules: VecDeque<Vec<RuleId>>,

    chunks_seen: u64,
    llm_calls: u64,
    llm_failures: u64,
}

impl FeedbackGenerator {
    pub fn new(
        language: coach_core::Language,
        model: Option<Arc<dyn CoachingModel>>,
        feedback_frequency: u32,
        llm_deadline: Duration,
    ) -> Self {
        Self {
            profile: language_profile(language),
            model,
            feedback_frequency: feedback_frequency.clamp(1, 30),
            llm_deadline,
            strengths: BTreeSet::new(),
            improvement_areas: BTreeSet::new(),
            theme_counts: BTreeMap::new(),
            history: VecDeque::with_capacity(HISTORY_LIMIT),
            recent_rules: VecDeque::with_capacity(DEDUP_CHUNKS),
            chunks_seen: 0,
            llm_calls: 0,
            llm_failures: 0,
        }
    }

    /// Runtime update through the `config_update` whitelist.
    pub fn set_feedback_frequency(&mut self, frequency: u32) {
        self.feedback_frequency = frequency.clamp(1, 30);
    }

    pub fn identified_strengths(&self) -> &BTreeSet<String> {
        &self.strengths
    }

    pub fn improvement_areas(&self) -> &BTreeSet<String> {
        &self.improvement_areas
    }

    /// Improvement-area histogram across the session.
    pub fn theme_histogram(&self) -> &BTreeMap<String, u32> {
        &self.theme_counts
    }

    /// Most recent feedback items, oldest first (bounded).
    pub fn recent_feedback(&self) -> impl Iterator<Item = &FeedbackItem> {
        self.history.iter()
    }

    pub fn chunks_seen(&self) -> u64 {
        self.chunks_seen
    }

    pub fn llm_call_count(&self) -> u64 {
        self.llm_calls
    }

    pub fn llm_failure_count(&self) -> u64 {
        self.llm_failures
    }

    /// Whether the coaching slot is due for this chunk. Without a model the
    /// due slot still produces the deterministic fallback reply.
    pub fn llm_due(&self, chunk_number: u64) -> bool {
        chunk_number % self.feedback_frequency as u64 == 0
    }

    /// Deterministic realtime rule engine. Sub-millisecond; no I/O.
    pub fn realtime_feedback(&mut self, metrics: &VoiceMetrics) -> Vec<FeedbackItem> {
        self.chunks_seen += 1;
        let lang = self.profile.language;
        let mut candidates: Vec<(RuleId, FeedbackItem)> = Vec::new();

        let pace = metrics.pace_wpm;
        if pace > 200.0 {
            candidates.push((
                RuleId::PaceFast,
                FeedbackItem::new(
                    FeedbackKind::Pace,
                    Severity::Warning,
                    ui_message("pace_slow_down", lang, "Slow down your pace"),
                    ui_message("pace_slow_down_tip", lang, "Pause and breathe"),
                    0.9,
                    FeedbackSource::Rule,
                ),
            ));
        } else if pace > 0.0 && pace < 100.0 {
            candidates.push((
                RuleId::PaceSlow,
                FeedbackItem::new(
                    FeedbackKind::Pace,
                    Severity::Info,
                    ui_message("pace_speed_up", lang, "You may speed up"),
                    ui_message("pace_speed_up_tip", lang, "Bring more energy"),
                    0.8,
                    FeedbackSource::Rule,
                ),
            ));
        }

        if metrics.volume_consistency < 0.6 {
            candidates.push((
                RuleId::VolumeInconsistent,
                FeedbackItem::new(
                    FeedbackKind::Volume,
                    Severity::Warning,
                    ui_message("volume_inconsistent", lang, "Keep your volume steady"),
                    ui_message("volume_inconsistent_tip", lang, "Project consistently"),
                    0.85,
                    FeedbackSource::Rule,
                ),
            ));
        }

        if metrics.clarity_score < 0.6 {
            candidates.push((
                RuleId::ClarityLow,
                FeedbackItem::new(
                    FeedbackKind::Clarity,
                    Severity::Warning,
                    ui_message("clarity_low", lang, "Articulate more distinctly"),
                    ui_message("clarity_low_tip", lang, "Sound out each syllable"),
                    0.85,
                    FeedbackSource::Rule,
                ),
            ));
        }

        let confidence = metrics.advanced.confidence_score;
        if confidence > 0.8 {
            candidates.push((
                RuleId::ConfidenceHigh,
                FeedbackItem::new(
                    FeedbackKind::Confidence,
                    Severity::Positive,
                    ui_message("confidence_high", lang, "Great confidence!"),
                    ui_message("confidence_high_tip", lang, "Keep that energy"),
                    0.9,
                    FeedbackSource::Rule,
                ),
            ));
        } else if confidence < 0.5 {
            candidates.push((
                RuleId::ConfidenceLow,
                FeedbackItem::new(
                    FeedbackKind::Confidence,
                    Severity::Info,
                    ui_message("confidence_low", lang, "Project more confidence"),
                    ui_message("confidence_low_tip", lang, "Speak with authority"),
                    0.7,
                    FeedbackSource::Rule,
                ),
            ));
        }

        // Suppress rules that already fired in the last few chunks.
        candidates.retain(|(rule, _)| {
            !self
                .recent_rules
                .iter()
                .any(|fired| fired.contains(rule))
        });

        // Higher severity wins ties for the per-chunk cap.
        candidates.sort_by(|a, b| b.1.severity.cmp(&a.1.severity));
        candidates.truncate(MAX_FEEDBACK_PER_CHUNK);

        if self.recent_rules.len() == DEDUP_CHUNKS {
            self.recent_rules.pop_front();
        }
        self.recent_rules
            .push_back(candidates.iter().map(|(rule, _)| *rule).collect());

        let items: Vec<FeedbackItem> = candidates.into_iter().map(|(_, item)| item).collect();
        for item in &items {
            self.push_history(item.clone());
        }
        items
    }

    /// LLM coaching for a due chunk, falling back to a deterministic reply
    /// on any upstream or parse failure.
    pub async fn coaching_feedback(
        &mut self,
        metrics: &VoiceMetrics,
        chunk_number: u64,
    ) -> CoachingFeedback {
        let Some(model) = self.model.clone() else {
            return self.fallback_feedback(metrics);
        };

        self.llm_calls += 1;
        let prompt = self.build_prompt(metrics, chunk_number);

        let reply = match tokio::time::timeout(self.llm_deadline, model.generate(&prompt)).await {
            Ok(Ok(raw)) => match self.parse_reply(&raw) {
                Some(reply) => reply,
                None => {
                    self.llm_failures += 1;
                    tracing::warn!(chunk_number, "Coaching reply failed validation, using fallback");
                    return self.fallback_feedback(metrics);
                }
            },
            Ok(Err(err)) => {
                self.llm_failures += 1;
                tracing::warn!(chunk_number, error = %err, "Coaching model call failed");
                return self.fallback_feedback(metrics);
            }
            Err(_) => {
                self.llm_failures += 1;
                tracing::warn!(
                    chunk_number,
                    deadline_ms = self.llm_deadline.as_millis() as u64,
                    "Coaching model call timed out"
                );
                return self.fallback_feedback(metrics);
            }
        };

        self.absorb_reply(&reply);
        let items = self.reply_to_items(&reply, FeedbackSource::Llm);
        for item in &items {
            self.push_history(item.clone());
        }

        CoachingFeedback {
            items,
            reply: Some(reply),
            source: Some(FeedbackSource::Llm),
        }
    }

    /// Deterministic reply used when the LLM path is unavailable.
    pub fn fallback_feedback(&mut self, metrics: &VoiceMetrics) -> CoachingFeedback {
        let lang = self.profile.language;
        let mut strengths = Vec::new();
        if metrics.pace_analysis.is_optimal {
            strengths.push(ui_message("fallback_strength", lang, "Good rhythm").to_string());
        }
        if metrics.volume_consistency > 0.7 {
            strengths.push(ui_message("volume_good", lang, "Steady volume").to_string());
        }
        if strengths.is_empty() {
            strengths.push(ui_message("fallback_strength", lang, "Good rhythm").to_string());
        }

        let mut improvements = Vec::new();
        if metrics.clarity_score < 0.7 {
            improvements.push(Improvement {
                area: FeedbackKind::Clarity.as_str().to_string(),
                current_issue: ui_message("clarity_low", lang, "Articulation").to_string(),
                actionable_tip: ui_message("clarity_low_tip", lang, "Articulate").to_string(),
                why_important: String::new(),
            });
        }

        let reply = CoachingReply {
            feedback_summary: ui_message("fallback_summary", lang, "Keep presenting.").to_string(),
            strengths,
            improvements,
            encouragement: ui_message("fallback_encouragement", lang, "Keep going!").to_string(),
            next_focus: ui_message("fallback_next_focus", lang, "Consistency").to_string(),
        };

        self.absorb_reply(&reply);
        let items = self.reply_to_items(&reply, FeedbackSource::Fallback);

        CoachingFeedback {
            items,
            reply: Some(reply),
            source: Some(FeedbackSource::Fallback),
        }
    }

    /// Language-specific prompt for the coaching model.
    fn build_prompt(&self, metrics: &VoiceMetrics, chunk_number: u64) -> String {
        let strengths = if self.strengths.is_empty() {
            "-".to_string()
        } else {
            self.strengths.iter().cloned().collect::<Vec<_>>().join(", ")
        };
        let areas = if self.improvement_areas.is_empty() {
            "-".to_string()
        } else {
            self.improvement_areas
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        };

        match self.profile.language {
            coach_core::Language::French => format!(
                "Tu es un coach de présentation IA expert et bienveillant. Analyse ces \
                 métriques vocales et génère un feedback personnalisé en français.\n\n\
                 MÉTRIQUES ACTUELLES:\n\
                 - Débit: {:.1} mots/min (optimal: {:.0})\n\
                 - Consistance volume: {:.2} (idéal: >0.7)\n\
                 - Clarté: {:.2} (idéal: >0.7)\n\
                 - Activité vocale: {:.2} (idéal: 0.6-0.8)\n\
                 - Score confiance: {:.2} (idéal: >0.7)\n\n\
                 CONTEXTE SESSION:\n\
                 - Chunk #{}\n\
                 - Forces identifiées: {}\n\
                 - Axes d'amélioration: {}\n\n\
                 STYLE DE COACHING: {} - Sois encourageant, constructif et actionnable.\n\n\
                 Génère un feedback JSON avec cette structure EXACTE:\n\
                 {{\n\
                 \"feedback_summary\": \"Résumé en 1-2 phrases\",\n\
                 \"strengths\": [\"Force 1\", \"Force 2\"],\n\
                 \"improvements\": [{{\"area\": \"...\", \"current_issue\": \"...\", \
                 \"actionable_tip\": \"...\", \"why_important\": \"...\"}}],\n\
                 \"encouragement\": \"Message motivant\",\n\
                 \"next_focus\": \"Prochaine priorité\"\n\
                 }}\n\n\
                 Réponds UNIQUEMENT avec le JSON, sans texte additionnel.",
                metrics.pace_wpm,
                self.profile.audio.optimal_wpm(),
                metrics.volume_consistency,
                metrics.clarity_score,
                metrics.voice_activity_ratio,
                metrics.advanced.confidence_score,
                chunk_number,
                strengths,
                areas,
                self.profile.coaching_style,
            ),
            coach_core::Language::English => format!(
                "You are an expert, supportive AI presentation coach. Analyze these \
                 voice metrics and produce personalized feedback in English.\n\n\
                 CURRENT METRICS:\n\
                 - Pace: {:.1} wpm (optimal: {:.0})\n\
                 - Volume consistency: {:.2} (target: >0.7)\n\
                 - Clarity: {:.2} (target: >0.7)\n\
                 - Voice activity: {:.2} (target: 0.6-0.8)\n\
                 - Confidence: {:.2} (target: >0.7)\n\n\
                 SESSION CONTEXT:\n\
                 - Chunk #{}\n\
                 - Identified strengths: {}\n\
                 - Improvement areas: {}\n\n\
                 COACHING STYLE: {} - Be encouraging, constructive and actionable.\n\n\
                 Produce JSON feedback with this EXACT structure:\n\
                 {{\n\
                 \"feedback_summary\": \"1-2 sentence summary\",\n\
                 \"strengths\": [\"Strength 1\", \"Strength 2\"],\n\
                 \"improvements\": [{{\"area\": \"...\", \"current_issue\": \"...\", \
                 \"actionable_tip\": \"...\", \"why_important\": \"...\"}}],\n\
                 \"encouragement\": \"Motivating message\",\n\
                 \"next_focus\": \"Next priority\"\n\
                 }}\n\n\
                 Reply with ONLY the JSON, no additional text.",
                metrics.pace_wpm,
                self.profile.audio.optimal_wpm(),
                metrics.volume_consistency,
                metrics.clarity_score,
                metrics.voice_activity_ratio,
                metrics.advanced.confidence_score,
                chunk_number,
                strengths,
                areas,
                self.profile.coaching_style,
            ),
        }
    }

    fn parse_reply(&self, raw: &str) -> Option<CoachingReply> {
        parse_coaching_reply(raw, self.profile.language)
    }

    fn absorb_reply(&mut self, reply: &CoachingReply) {
        for strength in &reply.strengths {
            if !strength.trim().is_empty() {
                self.strengths.insert(strength.clone());
            }
        }
        for improvement in &reply.improvements {
            if !improvement.area.trim().is_empty() {
                self.improvement_areas.insert(improvement.area.clone());
                *self
                    .theme_counts
                    .entry(improvement.area.to_lowercase())
                    .or_insert(0) += 1;
            }
        }
    }

    fn reply_to_items(&self, reply: &CoachingReply, source: FeedbackSource) -> Vec<FeedbackItem> {
        let mut items = Vec::new();

        for improvement in reply.improvements.iter().take(MAX_FEEDBACK_PER_CHUNK) {
            items.push(FeedbackItem::new(
                kind_for_area(&improvement.area),
                Severity::Warning,
                improvement.current_issue.clone(),
                improvement.actionable_tip.clone(),
                if source == FeedbackSource::Llm { 0.8 } else { 0.5 },
                source,
            ));
        }

        if !reply.strengths.is_empty() {
            items.push(FeedbackItem::new(
                FeedbackKind::Engagement,
                Severity::Positive,
                reply.strengths[..reply.strengths.len().min(2)].join(", "),
                reply.encouragement.clone(),
                if source == FeedbackSource::Llm { 0.9 } else { 0.6 },
                source,
            ));
        }

        items
    }

    fn push_history(&mut self, item: FeedbackItem) {
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(item);
    }
}

/// Strip code fences and parse a model reply into a validated
/// [`CoachingReply`], repairing empty optional fields from the localized
/// defaults. `None` means the reply is unusable and the caller should fall
/// back.
pub fn parse_coaching_reply(raw: &str, language: coach_core::Language) -> Option<CoachingReply> {
    let mut cleaned = raw.trim();
    if let Some(stripped) = cleaned.strip_prefix("```json") {
        cleaned = stripped;
    } else if let Some(stripped) = cleaned.strip_prefix("```") {
        cleaned = stripped;
    }
    if let Some(stripped) = cleaned.strip_suffix("```") {
        cleaned = stripped;
    }

    let mut reply: CoachingReply = serde_json::from_str(cleaned.trim()).ok()?;

    if reply.encouragement.trim().is_empty() {
        reply.encouragement =
            ui_message("fallback_encouragement", language, "Keep going!").to_string();
    }
    if reply.next_focus.trim().is_empty() {
        reply.next_focus = ui_message("fallback_next_focus", language, "Consistency").to_string();
    }

    if reply.is_valid() {
        Some(reply)
    } else {
        None
    }
}

/// Map a free-text improvement area onto a feedback kind.
fn kind_for_area(area: &str) -> FeedbackKind {
    let lower = area.to_lowercase();
    if lower.contains("pace") || lower.contains("débit") || lower.contains("rythme") {
        FeedbackKind::Pace
    } else if lower.contains("volume") {
        FeedbackKind::Volume
    } else if lower.contains("clart") || lower.contains("clarity") || lower.contains("articulation")
    {
        FeedbackKind::Clarity
    } else if lower.contains("confi") || lower.contains("assurance") {
        FeedbackKind::Confidence
    } else if lower.contains("engag") {
        FeedbackKind::Engagement
    } else {
        FeedbackKind::Structure
    }
}
