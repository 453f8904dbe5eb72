//! Wire types for `POST /v1/search` and compilation of a raw request into a
//! validated, operator-merged search specification.

use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use uuid::Uuid;

use pantry_domain::query::{self, KeywordPlan, ParsedQuery};

use crate::{
	Error, Result,
	search::filter::{CookedConstraint, CookedState, PostFilter, PreFilter},
};

pub const WIRE_VERSION: u32 = 1;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
	pub version: Option<u32>,
	#[serde(default)]
	pub q: String,
	pub scope: Option<String>,
	pub target_types: Option<Vec<String>>,
	pub mode: Option<String>,
	pub limit: Option<u32>,
	pub offset: Option<u32>,
	#[serde(default)]
	pub filters: SearchFilters,
	pub include_linked_snapshots: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchFilters {
	pub subject_id: Option<Uuid>,
	pub topic_id: Option<Uuid>,
	#[serde(default)]
	pub tags: Vec<String>,
	pub imported: Option<bool>,
	pub updated_after: Option<String>,
	pub updated_before: Option<String>,
	#[serde(default)]
	pub include_ingredients: Vec<String>,
	#[serde(default)]
	pub exclude_ingredients: Vec<String>,
	pub cooked: Option<CookedRequest>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookedRequest {
	pub state: Option<String>,
	pub within_days: Option<u32>,
	pub min_avg_rating: Option<f32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
	pub version: u32,
	/// Fused-candidate count before pagination; an upper bound on what deeper
	/// pages can return, not an exact corpus count.
	pub approximate_total: u32,
	pub hits: Vec<SearchHit>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
	pub target_type: String,
	pub id: Uuid,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub subject_id: Option<Uuid>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub topic_id: Option<Uuid>,
	pub title: String,
	pub doc_kind: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub snippet: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub score: Option<f32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
	Auto,
	Keyword,
	Semantic,
}

/// What kind of hits the caller asked for. Snapshot channels feed document
/// results through owner mapping; snapshot-only requests skip the mapping and
/// return the snapshots themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetMode {
	Documents,
	Snapshots,
}

/// A validated, operator-merged request, ready for the channel orchestrator.
#[derive(Debug)]
pub struct SearchSpec {
	pub parsed: ParsedQuery,
	pub plan: Option<KeywordPlan>,
	/// Query text with operators stripped; the semantic channels embed this.
	pub query_text: String,
	pub pre: PreFilter,
	pub post: PostFilter,
	pub mode: SearchMode,
	pub target: TargetMode,
	pub include_snapshots: bool,
	pub limit: u32,
	pub offset: u32,
	/// Phrases first, then bare terms; drives snippet extraction.
	pub snippet_terms: Vec<String>,
}

pub fn compile(cfg: &pantry_config::Search, req: SearchRequest) -> Result<SearchSpec> {
	if let Some(version) = req.version
		&& version != WIRE_VERSION
	{
		return Err(Error::InvalidRequest {
			message: format!("Unsupported version {version}; this endpoint speaks version 1."),
		});
	}

	let mode = match req.mode.as_deref() {
		None | Some("auto") => SearchMode::Auto,
		Some("keyword") => SearchMode::Keyword,
		Some("semantic") => SearchMode::Semantic,
		Some(other) => {
			return Err(Error::InvalidRequest {
				message: format!("Unknown mode {other:?}; expected auto, keyword, or semantic."),
			});
		},
	};
	let kinds = match req.scope.as_deref() {
		None | Some("notes") => vec!["note".to_string()],
		Some("recipes") => vec!["recipe".to_string()],
		Some("all") => Vec::new(),
		Some(other) => {
			return Err(Error::InvalidRequest {
				message: format!("Unknown scope {other:?}; expected notes, recipes, or all."),
			});
		},
	};
	let target = match req.target_types.as_deref() {
		None => TargetMode::Documents,
		Some(types) => {
			for target_type in types {
				if !matches!(target_type.as_str(), "document" | "linkedSnapshot") {
					return Err(Error::InvalidRequest {
						message: format!(
							"Unknown target type {target_type:?}; expected document or linkedSnapshot."
						),
					});
				}
			}

			// Snapshot evidence folds into document hits whenever documents
			// are requested at all.
			if types.iter().any(|target_type| target_type == "document") || types.is_empty() {
				TargetMode::Documents
			} else {
				TargetMode::Snapshots
			}
		},
	};
	let operators = query::extract_operators(&req.q);
	let parsed = query::parse_query(&operators.remainder);
	let plan = query::keyword_plan(&parsed);
	let filters = req.filters;
	let pre = PreFilter {
		kinds,
		subject_id: filters.subject_id,
		subject_label: operators.subject,
		topic_id: filters.topic_id,
		topic_label: operators.topic,
		tags: merge_tags(filters.tags, operators.tags),
		imported: filters.imported.or(operators.imported),
		updated_after: parse_timestamp("updatedAfter", filters.updated_after.as_deref())?,
		updated_before: parse_timestamp("updatedBefore", filters.updated_before.as_deref())?,
	};
	let post = PostFilter {
		include_tokens: canonical_phrases(&filters.include_ingredients),
		exclude_tokens: canonical_phrases(&filters.exclude_ingredients),
		cooked: filters.cooked.map(compile_cooked).transpose()?,
	};
	let mut snippet_terms = parsed.phrases.clone();

	snippet_terms.extend(parsed.terms.iter().cloned());

	Ok(SearchSpec {
		query_text: operators.remainder,
		plan,
		parsed,
		pre,
		post,
		mode,
		target,
		include_snapshots: req.include_linked_snapshots.unwrap_or(true),
		limit: req.limit.unwrap_or(10).clamp(1, cfg.max_limit),
		offset: req.offset.unwrap_or(0),
		snippet_terms,
	})
}

fn merge_tags(mut tags: Vec<String>, operator_tags: Vec<String>) -> Vec<String> {
	for tag in operator_tags {
		if !tags.contains(&tag) {
			tags.push(tag);
		}
	}

	tags
}

fn canonical_phrases(raw: &[String]) -> Vec<String> {
	let mut tokens = Vec::with_capacity(raw.len());

	for phrase in raw {
		// A phrase that reduces to nothing ("for serving") is no constraint.
		if let Some(token) = pantry_domain::canonical::canonical_phrase(phrase)
			&& !tokens.contains(&token)
		{
			tokens.push(token);
		}
	}

	tokens
}

fn compile_cooked(req: CookedRequest) -> Result<CookedConstraint> {
	let state = match req.state.as_deref() {
		None => None,
		Some("ever") => Some(CookedState::Ever),
		Some("never") => Some(CookedState::Never),
		Some(other) => {
			return Err(Error::InvalidRequest {
				message: format!("Unknown cooked state {other:?}; expected ever or never."),
			});
		},
	};

	if state.is_none() && req.within_days.is_none() && req.min_avg_rating.is_none() {
		return Err(Error::InvalidRequest {
			message: "Cooked filter needs a state, withinDays, or minAvgRating.".to_string(),
		});
	}
	if let Some(rating) = req.min_avg_rating
		&& !rating.is_finite()
	{
		return Err(Error::InvalidRequest {
			message: "minAvgRating must be a finite number.".to_string(),
		});
	}

	Ok(CookedConstraint {
		state,
		within_days: req.within_days,
		min_avg_rating: req.min_avg_rating,
	})
}

fn parse_timestamp(field: &str, raw: Option<&str>) -> Result<Option<OffsetDateTime>> {
	let Some(raw) = raw else {
		return Ok(None);
	};

	OffsetDateTime::parse(raw, &Rfc3339).map(Some).map_err(|_| Error::InvalidRequest {
		message: format!("{field} must be an RFC 3339 timestamp."),
	})
}
