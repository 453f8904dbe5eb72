//! Filter compilation targets.
//!
//! `PreFilter` constrains what the stores return and is rendered natively by
//! each index (SQL WHERE clauses, Qdrant payload filter). `PostFilter` runs
//! in-core against fetched document metadata, because ingredient and cooking
//! constraints straddle a schema migration the stores cannot express alone.

use serde_json::Value;
use time::{Duration, OffsetDateTime, format_description::well_known::Rfc3339};
use uuid::Uuid;

use pantry_storage::models::Document;

#[derive(Debug, Clone, Default)]
pub struct PreFilter {
	/// Document kinds in scope; empty means all.
	pub kinds: Vec<String>,
	pub subject_id: Option<Uuid>,
	pub subject_label: Option<String>,
	pub topic_id: Option<Uuid>,
	pub topic_label: Option<String>,
	/// Every listed tag must be present.
	pub tags: Vec<String>,
	pub imported: Option<bool>,
	pub updated_after: Option<OffsetDateTime>,
	pub updated_before: Option<OffsetDateTime>,
}
impl PreFilter {
	/// In-core evaluation, used to re-filter documents reached through their
	/// snapshots; the stores apply the same constraints natively.
	pub fn matches(&self, doc: &Document) -> bool {
		if !self.kinds.is_empty() && !self.kinds.contains(&doc.kind) {
			return false;
		}
		if let Some(subject_id) = self.subject_id
			&& doc.subject_id != Some(subject_id)
		{
			return false;
		}
		if let Some(label) = &self.subject_label
			&& !label_matches(label, doc.subject_label.as_deref())
		{
			return false;
		}
		if let Some(topic_id) = self.topic_id
			&& doc.topic_id != Some(topic_id)
		{
			return false;
		}
		if let Some(label) = &self.topic_label
			&& !label_matches(label, doc.topic_label.as_deref())
		{
			return false;
		}
		if self.tags.iter().any(|tag| !doc.tags.contains(tag)) {
			return false;
		}
		if let Some(imported) = self.imported
			&& doc.imported != imported
		{
			return false;
		}
		if let Some(after) = self.updated_after
			&& doc.updated_at < after
		{
			return false;
		}
		if let Some(before) = self.updated_before
			&& doc.updated_at > before
		{
			return false;
		}

		true
	}
}

fn label_matches(wanted: &str, actual: Option<&str>) -> bool {
	actual.map(|label| label.eq_ignore_ascii_case(wanted)).unwrap_or(false)
}

#[derive(Debug, Clone, Default)]
pub struct PostFilter {
	/// Canonical phrase tokens the document's ingredient tokens must all
	/// contain.
	pub include_tokens: Vec<String>,
	/// Canonical phrase tokens none of which may appear.
	pub exclude_tokens: Vec<String>,
	pub cooked: Option<CookedConstraint>,
}
impl PostFilter {
	pub fn is_empty(&self) -> bool {
		self.include_tokens.is_empty() && self.exclude_tokens.is_empty() && self.cooked.is_none()
	}

	/// Evaluate against one document. Returns whether it passes and, when it
	/// does not, which constraint dropped it.
	pub fn evaluate(&self, doc: &Document, now: OffsetDateTime) -> (bool, Option<&'static str>) {
		if self.include_tokens.iter().any(|token| !doc.ingredient_tokens.contains(token)) {
			return (false, Some("ingredient_include"));
		}
		if self.exclude_tokens.iter().any(|token| doc.ingredient_tokens.contains(token)) {
			return (false, Some("ingredient_exclude"));
		}
		if let Some(cooked) = &self.cooked
			&& let Some(reason) = cooked.evaluate(doc, now)
		{
			return (false, Some(reason));
		}

		(true, None)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookedState {
	Ever,
	Never,
}

/// Cooking-history constraints. Two representations coexist: the legacy
/// `cooked_count` column and the `cooked_history` JSON list; a constraint
/// holds when either satisfies it. Active constraints AND together.
#[derive(Debug, Clone)]
pub struct CookedConstraint {
	pub state: Option<CookedState>,
	pub within_days: Option<u32>,
	pub min_avg_rating: Option<f32>,
}
impl CookedConstraint {
	fn evaluate(&self, doc: &Document, now: OffsetDateTime) -> Option<&'static str> {
		let history = parse_history(&doc.cooked_history);
		let ever = doc.cooked_count.map(|count| count > 0).unwrap_or(false)
			|| !history.is_empty()
			|| doc.last_cooked_at.is_some();

		match self.state {
			Some(CookedState::Ever) if !ever => return Some("cooked_ever"),
			// Rows the migration never touched have a NULL count and an empty
			// history; they count as never cooked.
			Some(CookedState::Never) if ever => return Some("cooked_never"),
			_ => {},
		}

		if let Some(days) = self.within_days {
			let cutoff = now - Duration::days(i64::from(days));
			let latest = doc
				.last_cooked_at
				.into_iter()
				.chain(history.iter().map(|entry| entry.at))
				.max();

			if !latest.map(|at| at >= cutoff).unwrap_or(false) {
				return Some("cooked_within");
			}
		}
		if let Some(min) = self.min_avg_rating {
			let history_avg = mean_rating(&history);
			let best = match (doc.avg_rating, history_avg) {
				(Some(column), Some(derived)) => Some(column.max(derived)),
				(column, derived) => column.or(derived),
			};

			if !best.map(|avg| avg >= min).unwrap_or(false) {
				return Some("cooked_rating");
			}
		}

		None
	}
}

struct HistoryEntry {
	at: OffsetDateTime,
	rating: Option<f32>,
}

fn parse_history(raw: &Value) -> Vec<HistoryEntry> {
	let Some(entries) = raw.as_array() else {
		return Vec::new();
	};

	entries
		.iter()
		.filter_map(|entry| {
			let at = entry.get("at")?.as_str()?;
			let at = OffsetDateTime::parse(at, &Rfc3339).ok()?;
			let rating = entry.get("rating").and_then(Value::as_f64).map(|value| value as f32);

			Some(HistoryEntry { at, rating })
		})
		.collect()
}

fn mean_rating(history: &[HistoryEntry]) -> Option<f32> {
	let ratings: Vec<f32> = history.iter().filter_map(|entry| entry.rating).collect();

	if ratings.is_empty() {
		None
	} else {
		Some(ratings.iter().sum::<f32>() / ratings.len() as f32)
	}
}
