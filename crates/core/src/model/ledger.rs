use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::model::feedback::{Criteria, Decision, FeedbackEntry};
use crate::model::ids::{QuestionId, SessionId};
use crate::model::session::Session;

/// Version written into every snapshot produced by [`FeedbackLedger::to_json`].
///
/// Version 1 records stored `entries` as a flat array and could omit
/// `hintUsed` and `totalQuestions`.
pub const LEDGER_SCHEMA_VERSION: u32 = 2;

//
// ─── ERRORS ───────────────────────────────────────────────────────────────────
//

/// A stored record that cannot be turned into a ledger at all.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ReconcileError {
    #[error("stored ledger is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("stored ledger is not an object")]
    NotAnObject,

    #[error("stored ledger is missing `{0}`")]
    MissingField(&'static str),

    #[error("stored ledger field `{0}` has the wrong shape")]
    InvalidField(&'static str),
}

//
// ─── COUNTS ───────────────────────────────────────────────────────────────────
//

/// Per-decision counters derived from the deduplicated entry set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecisionCounts {
    pub correct: u32,
    pub partial: u32,
    pub incorrect: u32,
}

impl DecisionCounts {
    fn tally<'a>(entries: impl Iterator<Item = &'a FeedbackEntry>) -> Self {
        let mut counts = Self::default();
        for entry in entries {
            match entry.decision() {
                Some(Decision::Correct) => counts.correct = counts.correct.saturating_add(1),
                Some(Decision::Partial) => counts.partial = counts.partial.saturating_add(1),
                Some(Decision::Incorrect) => {
                    counts.incorrect = counts.incorrect.saturating_add(1);
                }
                None => {}
            }
        }
        counts
    }

    #[must_use]
    pub fn sum(&self) -> u32 {
        self.correct + self.partial + self.incorrect
    }
}

/// What reconciliation had to fix while loading a stored record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub legacy_sequence: bool,
    pub duplicates_dropped: usize,
    pub hint_backfilled: usize,
    pub unreadable_entries: usize,
    pub total_repaired: bool,
}

impl ReconcileReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }
}

//
// ─── LEDGER ───────────────────────────────────────────────────────────────────
//

/// Deduplicated per-session feedback record with aggregate counters.
///
/// At most one entry exists per question id. Counters are always recomputed
/// from `entries` after a mutation, never adjusted incrementally.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackLedger {
    session_id: SessionId,
    session_title: String,
    session_level: String,
    session_context: String,
    session_description: String,
    entries: BTreeMap<QuestionId, FeedbackEntry>,
    total_questions: u32,
    answered_questions: u32,
    counts: DecisionCounts,
}

impl FeedbackLedger {
    /// Empty ledger sized to the session's question list.
    #[must_use]
    pub fn fresh(session: &Session) -> Self {
        Self {
            session_id: session.id.clone(),
            session_title: session.title.clone(),
            session_level: session.level.clone(),
            session_context: session.context.clone(),
            session_description: session.description.clone(),
            entries: BTreeMap::new(),
            total_questions: u32::try_from(session.question_count()).unwrap_or(u32::MAX),
            answered_questions: 0,
            counts: DecisionCounts::default(),
        }
    }

    /// Rebuild a consistent ledger from a stored record of any supported version.
    ///
    /// Duplicated entries collapse to the one with the greatest timestamp (the
    /// later one in storage order on a tie), missing `hintUsed` becomes
    /// `false`, counters are recomputed, and `totalQuestions` is only repaired
    /// when it is absent or not a non-negative integer.
    ///
    /// # Errors
    ///
    /// Returns `ReconcileError` when the record is not an object, lacks a
    /// session id, or carries an `entries` field that is neither an array nor
    /// an object.
    pub fn reconcile(
        raw: &Value,
        question_set_size: usize,
    ) -> Result<(Self, ReconcileReport), ReconcileError> {
        let object = raw.as_object().ok_or(ReconcileError::NotAnObject)?;
        let mut report = ReconcileReport::default();

        let session_id = object
            .get("sessionId")
            .or_else(|| object.get("activityId"))
            .and_then(Value::as_str)
            .filter(|id| !id.trim().is_empty())
            .map(SessionId::new)
            .ok_or(ReconcileError::MissingField("sessionId"))?;

        let text = |key: &str| {
            object
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned()
        };

        let stored: Vec<(Option<&str>, &Value)> = match object.get("entries") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => {
                report.legacy_sequence = true;
                items.iter().map(|item| (None, item)).collect()
            }
            Some(Value::Object(map)) => map
                .iter()
                .map(|(key, item)| (Some(key.as_str()), item))
                .collect(),
            Some(_) => return Err(ReconcileError::InvalidField("entries")),
        };

        let mut entries: BTreeMap<QuestionId, FeedbackEntry> = BTreeMap::new();
        for (key, item) in stored {
            let Some((entry, backfilled)) = read_stored_entry(item, key) else {
                tracing::debug!(%session_id, "skipping unreadable stored feedback entry");
                report.unreadable_entries += 1;
                continue;
            };
            if backfilled {
                report.hint_backfilled += 1;
            }
            let stored_is_newer = entries
                .get(&entry.question_id)
                .map(|existing| existing.timestamp > entry.timestamp);
            match stored_is_newer {
                Some(true) => {
                    tracing::debug!(
                        question = %entry.question_id,
                        dropped = entry.timestamp,
                        "dropping stale duplicate feedback entry"
                    );
                    report.duplicates_dropped += 1;
                }
                Some(false) => {
                    tracing::debug!(
                        question = %entry.question_id,
                        kept = entry.timestamp,
                        "replacing stale duplicate feedback entry"
                    );
                    report.duplicates_dropped += 1;
                    entries.insert(entry.question_id.clone(), entry);
                }
                None => {
                    entries.insert(entry.question_id.clone(), entry);
                }
            }
        }

        let total_questions = match object.get("totalQuestions").and_then(stored_count) {
            Some(total) => total,
            None => {
                report.total_repaired = true;
                u32::try_from(question_set_size).unwrap_or(u32::MAX)
            }
        };

        let mut ledger = Self {
            session_id,
            session_title: text("sessionTitle"),
            session_level: text("sessionLevel"),
            session_context: text("sessionContext"),
            session_description: text("sessionDescription"),
            entries,
            total_questions,
            answered_questions: 0,
            counts: DecisionCounts::default(),
        };
        ledger.recompute();
        Ok((ledger, report))
    }

    /// Parse a stored string and reconcile it.
    ///
    /// # Errors
    ///
    /// Returns `ReconcileError::InvalidJson` for unparsable input, otherwise
    /// whatever [`FeedbackLedger::reconcile`] reports.
    pub fn reconcile_str(
        raw: &str,
        question_set_size: usize,
    ) -> Result<(Self, ReconcileReport), ReconcileError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| ReconcileError::InvalidJson(e.to_string()))?;
        Self::reconcile(&value, question_set_size)
    }

    /// Insert or replace the entry for `entry.question_id`.
    ///
    /// Returns the entry that was replaced, if any.
    pub fn upsert(&mut self, entry: FeedbackEntry) -> Option<FeedbackEntry> {
        let previous = self.entries.insert(entry.question_id.clone(), entry);
        self.recompute();
        previous
    }

    /// Drop the entry for `question_id`. Absent ids are a no-op.
    pub fn remove(&mut self, question_id: &QuestionId) -> Option<FeedbackEntry> {
        let removed = self.entries.remove(question_id);
        if removed.is_some() {
            self.recompute();
        }
        removed
    }

    fn recompute(&mut self) {
        self.counts = DecisionCounts::tally(self.entries.values());
        self.answered_questions = u32::try_from(self.entries.len()).unwrap_or(u32::MAX);
    }

    /// True iff every question of the session has exactly one entry.
    ///
    /// Uses entry cardinality, not the cached answered counter.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        u32::try_from(self.entries.len()).is_ok_and(|n| n == self.total_questions)
    }

    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    #[must_use]
    pub fn session_title(&self) -> &str {
        &self.session_title
    }

    #[must_use]
    pub fn session_level(&self) -> &str {
        &self.session_level
    }

    #[must_use]
    pub fn session_context(&self) -> &str {
        &self.session_context
    }

    #[must_use]
    pub fn session_description(&self) -> &str {
        &self.session_description
    }

    #[must_use]
    pub fn entries(&self) -> &BTreeMap<QuestionId, FeedbackEntry> {
        &self.entries
    }

    #[must_use]
    pub fn entry(&self, question_id: &QuestionId) -> Option<&FeedbackEntry> {
        self.entries.get(question_id)
    }

    #[must_use]
    pub fn contains(&self, question_id: &QuestionId) -> bool {
        self.entries.contains_key(question_id)
    }

    #[must_use]
    pub fn total_questions(&self) -> u32 {
        self.total_questions
    }

    #[must_use]
    pub fn answered_questions(&self) -> u32 {
        self.answered_questions
    }

    #[must_use]
    pub fn counts(&self) -> DecisionCounts {
        self.counts
    }

    #[must_use]
    pub fn correct(&self) -> u32 {
        self.counts.correct
    }

    #[must_use]
    pub fn partial(&self) -> u32 {
        self.counts.partial
    }

    #[must_use]
    pub fn incorrect(&self) -> u32 {
        self.counts.incorrect
    }

    /// Entries whose decision is outside the synonym table.
    #[must_use]
    pub fn unrecognized(&self) -> u32 {
        self.answered_questions.saturating_sub(self.counts.sum())
    }

    /// Serialized form written to the store.
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if serialization fails (non-finite scores).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&LedgerSnapshot {
            version: LEDGER_SCHEMA_VERSION,
            session_id: &self.session_id,
            session_title: &self.session_title,
            session_level: &self.session_level,
            session_context: &self.session_context,
            session_description: &self.session_description,
            entries: &self.entries,
            total_questions: self.total_questions,
            answered_questions: self.answered_questions,
            correct: self.counts.correct,
            partial: self.counts.partial,
            incorrect: self.counts.incorrect,
        })
    }
}

//
// ─── STORED SHAPES ────────────────────────────────────────────────────────────
//

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LedgerSnapshot<'a> {
    version: u32,
    session_id: &'a SessionId,
    session_title: &'a str,
    session_level: &'a str,
    session_context: &'a str,
    session_description: &'a str,
    entries: &'a BTreeMap<QuestionId, FeedbackEntry>,
    total_questions: u32,
    answered_questions: u32,
    correct: u32,
    partial: u32,
    incorrect: u32,
}

/// Read an entry as it may appear in any schema version.
///
/// Fields are read one by one so a single odd value (a numeric string, a
/// float timestamp) never costs the whole entry. Only a non-object item or a
/// missing question id makes an entry unreadable.
///
/// Returns the entry and whether `hintUsed` had to be backfilled.
fn read_stored_entry(item: &Value, key: Option<&str>) -> Option<(FeedbackEntry, bool)> {
    let fields = item.as_object()?;
    let question_id = fields
        .get("questionId")
        .and_then(Value::as_str)
        .or(key)
        .map(str::trim)
        .filter(|id| !id.is_empty())?;

    let criteria: Criteria = fields
        .get("criteria")
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(name, value)| {
                    lenient_f64(value).map(|score| (name.clone(), score))
                })
                .collect()
        })
        .unwrap_or_default();

    let hint_used = fields.get("hintUsed").and_then(Value::as_bool);
    let free_text = fields
        .get("freeText")
        .or_else(|| fields.get("feedback"))
        .and_then(Value::as_str)
        .map(str::to_owned);
    let user_response = fields
        .get("userResponse")
        .and_then(Value::as_str)
        .map(str::to_owned);

    let mut entry = FeedbackEntry::new(
        QuestionId::new(question_id),
        fields
            .get("decision")
            .and_then(Value::as_str)
            .unwrap_or_default(),
        fields.get("score").and_then(lenient_f64).unwrap_or_default(),
        hint_used.unwrap_or(false),
        fields
            .get("timestamp")
            .and_then(lenient_millis)
            .unwrap_or_default(),
    )
    .with_criteria(criteria);
    entry.free_text = free_text;
    entry.user_response = user_response;
    Some((entry, hint_used.is_none()))
}

/// A finite number, or a string holding one.
fn lenient_f64(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

/// Epoch milliseconds stored as an integer, an integral float or a numeric
/// string.
fn lenient_millis(value: &Value) -> Option<i64> {
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    if let Some(n) = value.as_str().and_then(|s| s.trim().parse::<i64>().ok()) {
        return Some(n);
    }
    let f = lenient_f64(value)?;
    #[allow(clippy::cast_precision_loss)]
    let in_range = f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64;
    #[allow(clippy::cast_possible_truncation)]
    in_range.then_some(f as i64)
}

/// Accepts a non-negative integral JSON number that fits in `u32`.
fn stored_count(value: &Value) -> Option<u32> {
    if let Some(n) = value.as_u64() {
        return u32::try_from(n).ok();
    }
    let f = value.as_f64()?;
    if f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f <= f64::from(u32::MAX) {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        return Some(f as u32);
    }
    None
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
