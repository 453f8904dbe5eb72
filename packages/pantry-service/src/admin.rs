//! Operator-facing maintenance operations behind the admin router.

use serde::Serialize;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use uuid::Uuid;

use pantry_domain::{canonical, query};

use crate::{Error, PantryService, Result, search::filter::PreFilter};

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillReport {
	pub scanned: u32,
	pub updated: u32,
	pub dry_run: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticDebugReport {
	pub query: String,
	pub parsed: query::ParsedQuery,
	pub operators: query::ExtractedOperators,
	pub hits: Vec<SemanticDebugHit>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticDebugHit {
	pub id: Uuid,
	pub similarity: f32,
	pub title: Option<String>,
}

impl PantryService {
	/// Recompute canonical ingredient tokens for recipes whose token column
	/// never got populated. `dry_run` reports what would change without
	/// writing.
	pub async fn backfill_ingredient_tokens(
		&self,
		limit: Option<u32>,
		dry_run: bool,
	) -> Result<BackfillReport> {
		let limit = limit.unwrap_or(self.cfg.freshness.batch_size);
		let docs = self.index.documents_missing_ingredient_tokens(limit).await?;
		let mut report = BackfillReport { dry_run, ..Default::default() };

		for doc in &docs {
			report.scanned += 1;

			let mut tokens: Vec<String> = Vec::new();

			for phrase in &doc.ingredients {
				for token in canonical::canonical_tokens(phrase) {
					if !tokens.contains(&token) {
						tokens.push(token);
					}
				}
			}

			if tokens.is_empty() || tokens == doc.ingredient_tokens {
				continue;
			}
			if !dry_run {
				self.index.write_ingredient_tokens(doc.id, &tokens).await?;
			}

			report.updated += 1;
		}

		tracing::info!(
			scanned = report.scanned,
			updated = report.updated,
			dry_run = report.dry_run,
			"Ingredient token backfill finished."
		);

		Ok(report)
	}

	/// Raw ANN lookout for one query, bypassing fusion and post-filters, so
	/// an operator can see what the semantic channel alone returns.
	pub async fn semantic_debug(
		&self,
		q: &str,
		scope: Option<&str>,
		limit: Option<u32>,
	) -> Result<SemanticDebugReport> {
		let operators = query::extract_operators(q);
		let parsed = query::parse_query(&operators.remainder);

		if operators.remainder.trim().is_empty() {
			return Err(Error::InvalidRequest {
				message: "Semantic debug needs query text.".to_string(),
			});
		}

		let kinds = match scope {
			None | Some("all") => Vec::new(),
			Some("notes") => vec!["note".to_string()],
			Some("recipes") => vec!["recipe".to_string()],
			Some(other) => {
				return Err(Error::InvalidRequest {
					message: format!("Unknown scope {other:?}; expected notes, recipes, or all."),
				});
			},
		};
		let filter = PreFilter { kinds, ..Default::default() };
		let texts = [operators.remainder.clone()];
		let vectors = self.embedder.embed(None, &texts).await?;
		let vector = vectors.first().ok_or_else(|| Error::Provider {
			message: "Embedding provider returned no vector.".to_string(),
		})?;
		let raw = self
			.index
			.semantic_documents(vector, &filter, limit.unwrap_or(20).clamp(1, 100))
			.await?;
		let ids: Vec<Uuid> = raw.iter().map(|hit| hit.id).collect();
		let docs = self.index.fetch_documents(&ids).await?;
		let hits = raw
			.iter()
			.map(|hit| SemanticDebugHit {
				id: hit.id,
				similarity: hit.score,
				title: docs.iter().find(|doc| doc.id == hit.id).map(|doc| doc.title.clone()),
			})
			.collect();

		Ok(SemanticDebugReport { query: operators.remainder.clone(), parsed, operators, hits })
	}

	/// One-time aggregate migration for the dual cooked schema: derive
	/// `last_cooked_at` and `avg_rating` from the raw history list.
	pub async fn backfill_last_cooked(&self, limit: Option<u32>) -> Result<BackfillReport> {
		let limit = limit.unwrap_or(self.cfg.freshness.batch_size);
		let docs = self.index.documents_with_cook_data(limit).await?;
		let mut report = BackfillReport::default();

		for doc in &docs {
			report.scanned += 1;

			let entries = history_entries(&doc.cooked_history);
			let last_cooked_at = entries.iter().map(|(at, _)| *at).max();
			let ratings: Vec<f32> =
				entries.iter().filter_map(|(_, rating)| *rating).collect();
			let avg_rating = if ratings.is_empty() {
				None
			} else {
				Some(ratings.iter().sum::<f32>() / ratings.len() as f32)
			};

			if last_cooked_at == doc.last_cooked_at && avg_rating == doc.avg_rating {
				continue;
			}

			self.index.write_cooked_rollup(doc.id, last_cooked_at, avg_rating).await?;

			report.updated += 1;
		}

		tracing::info!(
			scanned = report.scanned,
			updated = report.updated,
			"Cooked rollup backfill finished."
		);

		Ok(report)
	}
}

fn history_entries(raw: &serde_json::Value) -> Vec<(OffsetDateTime, Option<f32>)> {
	let Some(entries) = raw.as_array() else {
		return Vec::new();
	};

	entries
		.iter()
		.filter_map(|entry| {
			let at = entry.get("at")?.as_str()?;
			let at = OffsetDateTime::parse(at, &Rfc3339).ok()?;
			let rating =
				entry.get("rating").and_then(serde_json::Value::as_f64).map(|value| value as f32);

			Some((at, rating))
		})
		.collect()
}
