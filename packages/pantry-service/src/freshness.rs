//! Embedding freshness maintenance.
//!
//! Staleness is decided by content hash, never timestamp alone: the stored
//! hash must equal the blake3 of the current embedding input for a row to
//! count as fresh. A fresh row only gets its checked-timestamp bumped, so
//! repeated runs over an unchanged catalog cost no provider calls.

use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use pantry_storage::models::{Document, PageSnapshot};

use crate::{EmbeddingWrite, PantryService, Result};

#[derive(Debug, Clone, Default)]
pub struct RefreshOptions {
	/// Stop after this many embedded rows; None runs to completion.
	pub limit: Option<u32>,
	/// Re-embed even when the stored hash matches.
	pub force: bool,
	/// Embed with this model instead of the configured one. Hashes are keyed
	/// by model, so switching re-embeds every row.
	pub model: Option<String>,
	/// Override the configured embedding-input prefix length.
	pub max_chars: Option<u32>,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshReport {
	pub scanned: u32,
	pub embedded: u32,
	pub skipped_fresh: u32,
	pub failed: u32,
	pub rate_limited: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub retry_after_secs: Option<u64>,
}
impl RefreshReport {
	fn absorb_rate_limit(&mut self, retry_after: Option<Duration>) {
		self.rate_limited = true;
		self.retry_after_secs = retry_after.map(|duration| duration.as_secs());
	}

	fn budget_left(&self, opts: &RefreshOptions) -> bool {
		opts.limit.map(|limit| self.embedded < limit).unwrap_or(true)
	}
}

impl PantryService {
	/// One maintenance run: documents missing an embedding, then documents
	/// whose embedding predates their last edit, then snapshots. A rate
	/// limit aborts the run and surfaces the provider's retry hint; other
	/// provider errors skip the row and keep going.
	pub async fn refresh_embeddings(&self, opts: &RefreshOptions) -> Result<RefreshReport> {
		let mut report = RefreshReport::default();
		let max_chars = opts.max_chars.unwrap_or(self.cfg.freshness.max_chars) as usize;
		let batch = self.cfg.freshness.batch_size;

		for pass in [DocumentPass::Missing, DocumentPass::Outdated] {
			let mut cursor: Option<Uuid> = None;

			while report.budget_left(opts) && !report.rate_limited {
				let docs = match pass {
					DocumentPass::Missing =>
						self.index.documents_missing_embedding(cursor, batch).await?,
					DocumentPass::Outdated =>
						self.index.documents_embedding_outdated(cursor, batch).await?,
				};
				let Some(last) = docs.last() else {
					break;
				};

				cursor = Some(last.id);

				for doc in &docs {
					if !report.budget_left(opts) || report.rate_limited {
						break;
					}

					self.refresh_document(doc, opts, max_chars, &mut report).await?;
				}
			}
		}

		let mut cursor: Option<Uuid> = None;

		while report.budget_left(opts) && !report.rate_limited {
			let snapshots = self.index.snapshots_needing_embedding(cursor, batch).await?;
			let Some(last) = snapshots.last() else {
				break;
			};

			cursor = Some(last.id);

			for snapshot in &snapshots {
				if !report.budget_left(opts) || report.rate_limited {
					break;
				}

				self.refresh_snapshot(snapshot, opts, max_chars, &mut report).await?;
			}
		}

		tracing::info!(
			scanned = report.scanned,
			embedded = report.embedded,
			skipped_fresh = report.skipped_fresh,
			failed = report.failed,
			rate_limited = report.rate_limited,
			"Embedding refresh run finished."
		);

		Ok(report)
	}

	async fn refresh_document(
		&self,
		doc: &Document,
		opts: &RefreshOptions,
		max_chars: usize,
		report: &mut RefreshReport,
	) -> Result<()> {
		report.scanned += 1;

		let model = opts.model.as_deref().unwrap_or_else(|| self.embedder.model());
		let body_input = document_embedding_input(doc, max_chars);
		let body_hash = embedding_input_hash(model, &body_input);
		let recipe_input =
			(doc.kind == "recipe").then(|| recipe_embedding_input(doc, max_chars));
		let recipe_hash =
			recipe_input.as_deref().map(|input| embedding_input_hash(model, input));
		let fresh = !opts.force
			&& doc.embedded_at.is_some()
			&& doc.embedding_model.as_deref() == Some(model)
			&& doc.embedding_hash.as_deref() == Some(body_hash.as_str())
			&& doc.recipe_embedding_hash.as_deref() == recipe_hash.as_deref();

		if fresh {
			report.skipped_fresh += 1;

			return self.index.mark_document_checked(doc.id, OffsetDateTime::now_utc()).await;
		}

		let mut texts = vec![body_input];

		if let Some(input) = recipe_input {
			texts.push(input);
		}

		let mut vectors = match self.embedder.embed(opts.model.as_deref(), &texts).await {
			Ok(vectors) if vectors.len() == texts.len() => vectors,
			Ok(_) => {
				report.failed += 1;
				tracing::warn!(document_id = %doc.id, "Embedding count mismatch; skipping row.");

				return Ok(());
			},
			Err(pantry_providers::Error::RateLimited { retry_after }) => {
				report.absorb_rate_limit(retry_after);

				return Ok(());
			},
			Err(err) => {
				report.failed += 1;
				tracing::warn!(document_id = %doc.id, error = %err, "Embedding failed; skipping row.");

				return Ok(());
			},
		};
		let recipe_vector = (vectors.len() == 2).then(|| vectors.remove(1));
		let write = EmbeddingWrite {
			body_vector: vectors.remove(0),
			recipe_vector,
			model: model.to_string(),
			body_hash,
			recipe_hash,
			now: OffsetDateTime::now_utc(),
		};

		self.index.store_document_embedding(doc, &write).await?;

		report.embedded += 1;

		Ok(())
	}

	async fn refresh_snapshot(
		&self,
		snapshot: &PageSnapshot,
		opts: &RefreshOptions,
		max_chars: usize,
		report: &mut RefreshReport,
	) -> Result<()> {
		report.scanned += 1;

		let model = opts.model.as_deref().unwrap_or_else(|| self.embedder.model());
		let input = truncate_chars(&snapshot.content, max_chars);
		let hash = embedding_input_hash(model, &input);
		let fresh = !opts.force
			&& snapshot.embedded_at.is_some()
			&& snapshot.embedding_model.as_deref() == Some(model)
			&& snapshot.embedding_hash.as_deref() == Some(hash.as_str());

		if fresh {
			report.skipped_fresh += 1;

			return self.index.mark_snapshot_checked(snapshot.id, OffsetDateTime::now_utc()).await;
		}

		let texts = [input];
		let mut vectors = match self.embedder.embed(opts.model.as_deref(), &texts).await {
			Ok(vectors) if !vectors.is_empty() => vectors,
			Ok(_) => {
				report.failed += 1;

				return Ok(());
			},
			Err(pantry_providers::Error::RateLimited { retry_after }) => {
				report.absorb_rate_limit(retry_after);

				return Ok(());
			},
			Err(err) => {
				report.failed += 1;
				tracing::warn!(snapshot_id = %snapshot.id, error = %err, "Embedding failed; skipping row.");

				return Ok(());
			},
		};
		let write = EmbeddingWrite {
			body_vector: vectors.remove(0),
			recipe_vector: None,
			model: model.to_string(),
			body_hash: hash,
			recipe_hash: None,
			now: OffsetDateTime::now_utc(),
		};

		self.index.store_snapshot_embedding(snapshot, &write).await?;

		report.embedded += 1;

		Ok(())
	}
}

#[derive(Debug, Clone, Copy)]
enum DocumentPass {
	Missing,
	Outdated,
}

/// Canonical embedding input for the body vector: title, then a bounded body
/// prefix. Both the maintainer and any backfill must build this identically
/// or hashes never match.
pub fn document_embedding_input(doc: &Document, max_chars: usize) -> String {
	let body = truncate_chars(&doc.body, max_chars);

	format!("{}\n\n{}", doc.title.trim(), body.trim())
}

/// Input for the recipe-tuned vector: title plus the ingredient display list,
/// then the body prefix.
pub fn recipe_embedding_input(doc: &Document, max_chars: usize) -> String {
	let body = truncate_chars(&doc.body, max_chars);

	format!("{}\n{}\n\n{}", doc.title.trim(), doc.ingredients.join("; "), body.trim())
}

pub fn embedding_input_hash(model: &str, input: &str) -> String {
	let mut hasher = blake3::Hasher::new();

	hasher.update(model.as_bytes());
	hasher.update(b"\0");
	hasher.update(input.as_bytes());

	hasher.finalize().to_hex().to_string()
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
	text.chars().take(max_chars).collect()
}
