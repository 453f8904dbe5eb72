//! Search orchestration: compile the request, fan the channels out, fuse,
//! post-filter, paginate, snippet.

pub mod filter;
pub mod fusion;

use std::{collections::HashMap, future::Future, time::Duration};

use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use uuid::Uuid;

use pantry_domain::{canonical, query::KeywordPlan, snippet};
use pantry_storage::models::{Document, PageSnapshot};

use crate::{
	ChannelHit, Error, PantryService, Result, SnapshotHit,
	request::{self, SearchHit, SearchMode, SearchRequest, SearchResponse, SearchSpec, TargetMode},
	search::fusion::{
		CHANNEL_INGREDIENT, CHANNEL_KEYWORD, CHANNEL_SEMANTIC, CHANNEL_SNAPSHOT_KEYWORD,
		CHANNEL_SNAPSHOT_SEMANTIC, ChannelRanking, DOCUMENT_CHANNEL_WEIGHT, FusedHit,
	},
};

impl PantryService {
	pub async fn search(&self, req: SearchRequest) -> Result<SearchResponse> {
		let spec = request::compile(&self.cfg.search, req)?;
		let fetch = fetch_cap(spec.offset, spec.limit);
		let vector = self.query_vector(&spec).await?;

		match spec.target {
			TargetMode::Documents => self.search_documents(&spec, vector.as_deref(), fetch).await,
			TargetMode::Snapshots => self.search_snapshots(&spec, vector.as_deref(), fetch).await,
		}
	}

	/// Embed the query once; document and snapshot semantic channels share
	/// the vector. Embedding failure only fails the request in semantic mode.
	async fn query_vector(&self, spec: &SearchSpec) -> Result<Option<Vec<f32>>> {
		if spec.mode == SearchMode::Keyword || spec.query_text.trim().is_empty() {
			return Ok(None);
		}

		let texts = [spec.query_text.clone()];

		match self.embedder.embed(None, &texts).await {
			Ok(mut vectors) if !vectors.is_empty() => Ok(Some(vectors.remove(0))),
			Ok(_) => {
				if spec.mode == SearchMode::Semantic {
					Err(Error::Provider {
						message: "Embedding provider returned no vector.".to_string(),
					})
				} else {
					tracing::warn!("Embedding provider returned no vector; degrading.");

					Ok(None)
				}
			},
			Err(err) => {
				if spec.mode == SearchMode::Semantic {
					Err(err.into())
				} else {
					tracing::warn!(error = %err, "Query embedding failed; semantic channels degrade.");

					Ok(None)
				}
			},
		}
	}

	async fn search_documents(
		&self,
		spec: &SearchSpec,
		vector: Option<&[f32]>,
		fetch: u32,
	) -> Result<SearchResponse> {
		let timeout = Duration::from_millis(self.cfg.search.channel_timeout_ms);
		let ingredient_tokens = ingredient_channel_tokens(spec);
		let run_semantic = spec.mode != SearchMode::Keyword && vector.is_some();
		let run_ingredient = spec.mode == SearchMode::Auto && !ingredient_tokens.is_empty();
		let run_snapshots = spec.mode == SearchMode::Auto && spec.include_snapshots;
		let (keyword, semantic, ingredient, snapshot_keyword, snapshot_semantic) = tokio::join!(
			run_channel(CHANNEL_KEYWORD, spec.mode != SearchMode::Semantic, timeout, async {
				if spec.mode == SearchMode::Semantic {
					Ok(Vec::new())
				} else {
					self.keyword_channel(spec, fetch).await
				}
			}),
			run_channel(CHANNEL_SEMANTIC, spec.mode == SearchMode::Semantic, timeout, async {
				match vector {
					Some(vector) if run_semantic =>
						self.index.semantic_documents(vector, &spec.pre, fetch).await,
					_ => Ok(Vec::new()),
				}
			}),
			run_channel(CHANNEL_INGREDIENT, false, timeout, async {
				if run_ingredient {
					self.index.ingredient_documents(&ingredient_tokens, &spec.pre, fetch).await
				} else {
					Ok(Vec::new())
				}
			}),
			run_channel(CHANNEL_SNAPSHOT_KEYWORD, false, timeout, async {
				match (run_snapshots, &spec.plan) {
					(true, Some(plan)) => self.snapshot_keyword_channel(plan, fetch).await,
					_ => Ok(Vec::new()),
				}
			}),
			run_channel(CHANNEL_SNAPSHOT_SEMANTIC, false, timeout, async {
				match (run_snapshots, vector) {
					(true, Some(vector)) => self.index.semantic_snapshots(vector, fetch).await,
					_ => Ok(Vec::new()),
				}
			}),
		);
		let keyword = keyword?;
		let mut semantic = semantic?;
		let ingredient = ingredient?;
		let snapshot_keyword = snapshot_keyword?;
		let snapshot_semantic = snapshot_semantic?;

		if spec.mode == SearchMode::Semantic {
			let floor = self.cfg.search.min_similarity;

			semantic.retain(|hit| hit.score >= floor);
		}

		let fused = match spec.mode {
			SearchMode::Keyword => bypass_ranking(CHANNEL_KEYWORD, &keyword),
			SearchMode::Semantic => bypass_ranking(CHANNEL_SEMANTIC, &semantic),
			SearchMode::Auto => {
				let rankings = [
					ChannelRanking {
						channel: CHANNEL_KEYWORD,
						weight: DOCUMENT_CHANNEL_WEIGHT,
						hits: keyword,
					},
					ChannelRanking {
						channel: CHANNEL_SEMANTIC,
						weight: DOCUMENT_CHANNEL_WEIGHT,
						hits: semantic,
					},
					ChannelRanking {
						channel: CHANNEL_INGREDIENT,
						weight: DOCUMENT_CHANNEL_WEIGHT,
						hits: ingredient,
					},
					ChannelRanking {
						channel: CHANNEL_SNAPSHOT_KEYWORD,
						weight: self.cfg.search.snapshot_weight,
						hits: owner_hits(&snapshot_keyword),
					},
					ChannelRanking {
						channel: CHANNEL_SNAPSHOT_SEMANTIC,
						weight: self.cfg.search.snapshot_weight,
						hits: owner_hits(&snapshot_semantic),
					},
				];

				fusion::fuse(&rankings, self.cfg.search.rrf_k)
			},
		};
		let ids: Vec<Uuid> = fused.iter().map(|hit| hit.id).collect();
		let docs = self.index.fetch_documents(&ids).await?;
		let docs: HashMap<Uuid, Document> = docs.into_iter().map(|doc| (doc.id, doc)).collect();
		let now = OffsetDateTime::now_utc();
		let mut drops: HashMap<&'static str, u32> = HashMap::new();
		let survivors: Vec<&FusedHit> = fused
			.iter()
			.filter(|hit| {
				let Some(doc) = docs.get(&hit.id) else {
					*drops.entry("missing_document").or_insert(0) += 1;

					return false;
				};

				// Snapshot-derived owners bypassed the stores' native
				// pre-filter; re-check everything in core.
				if !spec.pre.matches(doc) {
					*drops.entry("prefilter").or_insert(0) += 1;

					return false;
				}

				let (passed, reason) = spec.post.evaluate(doc, now);

				if let Some(reason) = reason {
					*drops.entry(reason).or_insert(0) += 1;
				}

				passed
			})
			.collect();

		if !drops.is_empty() {
			tracing::debug!(?drops, "Dropped fused candidates.");
		}

		let approximate_total = survivors.len() as u32;
		let hits = survivors
			.into_iter()
			.skip(spec.offset as usize)
			.take(spec.limit as usize)
			.map(|hit| {
				let doc = &docs[&hit.id];

				document_hit(doc, hit.score, spec, self.cfg.search.snippet_chars)
			})
			.collect();

		Ok(SearchResponse { version: request::WIRE_VERSION, approximate_total, hits })
	}

	/// Snapshot-only requests: fuse the snapshot channels over snapshot ids
	/// and keep owner documents around for metadata and filtering.
	async fn search_snapshots(
		&self,
		spec: &SearchSpec,
		vector: Option<&[f32]>,
		fetch: u32,
	) -> Result<SearchResponse> {
		let timeout = Duration::from_millis(self.cfg.search.channel_timeout_ms);
		let (keyword, semantic) = tokio::join!(
			run_channel(CHANNEL_SNAPSHOT_KEYWORD, spec.mode != SearchMode::Semantic, timeout, async {
				match &spec.plan {
					Some(plan) if spec.mode != SearchMode::Semantic =>
						self.snapshot_keyword_channel(plan, fetch).await,
					_ => Ok(Vec::new()),
				}
			}),
			run_channel(CHANNEL_SNAPSHOT_SEMANTIC, spec.mode == SearchMode::Semantic, timeout, async {
				match vector {
					Some(vector) if spec.mode != SearchMode::Keyword =>
						self.index.semantic_snapshots(vector, fetch).await,
					_ => Ok(Vec::new()),
				}
			}),
		);
		let keyword = keyword?;
		let mut semantic = semantic?;

		if spec.mode == SearchMode::Semantic {
			let floor = self.cfg.search.min_similarity;

			semantic.retain(|hit| hit.score >= floor);
		}

		let rankings = [
			ChannelRanking {
				channel: CHANNEL_SNAPSHOT_KEYWORD,
				weight: DOCUMENT_CHANNEL_WEIGHT,
				hits: snapshot_channel_hits(&keyword),
			},
			ChannelRanking {
				channel: CHANNEL_SNAPSHOT_SEMANTIC,
				weight: DOCUMENT_CHANNEL_WEIGHT,
				hits: snapshot_channel_hits(&semantic),
			},
		];
		let fused = fusion::fuse(&rankings, self.cfg.search.rrf_k);
		let snapshot_ids: Vec<Uuid> = fused.iter().map(|hit| hit.id).collect();
		let snapshots = self.index.fetch_snapshots(&snapshot_ids).await?;
		let snapshots: HashMap<Uuid, PageSnapshot> =
			snapshots.into_iter().map(|snapshot| (snapshot.id, snapshot)).collect();
		let owner_ids: Vec<Uuid> = {
			let mut ids: Vec<Uuid> =
				snapshots.values().map(|snapshot| snapshot.document_id).collect();

			ids.sort_unstable();
			ids.dedup();

			ids
		};
		let owners = self.index.fetch_documents(&owner_ids).await?;
		let owners: HashMap<Uuid, Document> =
			owners.into_iter().map(|doc| (doc.id, doc)).collect();
		let now = OffsetDateTime::now_utc();
		let survivors: Vec<&FusedHit> = fused
			.iter()
			.filter(|hit| {
				let Some(snapshot) = snapshots.get(&hit.id) else {
					return false;
				};
				let Some(owner) = owners.get(&snapshot.document_id) else {
					return false;
				};

				spec.pre.matches(owner) && spec.post.evaluate(owner, now).0
			})
			.collect();
		let approximate_total = survivors.len() as u32;
		let hits = survivors
			.into_iter()
			.skip(spec.offset as usize)
			.take(spec.limit as usize)
			.map(|hit| {
				let snapshot = &snapshots[&hit.id];
				let owner = &owners[&snapshot.document_id];

				snapshot_hit(snapshot, owner, hit.score, spec, self.cfg.search.snippet_chars)
			})
			.collect();

		Ok(SearchResponse { version: request::WIRE_VERSION, approximate_total, hits })
	}

	/// Keyword channel: the precise plan first, then deduplicated fallback
	/// results, so contiguous matches outrank scattered ones without losing
	/// recall.
	async fn keyword_channel(&self, spec: &SearchSpec, fetch: u32) -> Result<Vec<ChannelHit>> {
		let Some(plan) = &spec.plan else {
			return Ok(Vec::new());
		};
		let mut hits = self.index.keyword_documents(plan.primary(), &spec.pre, fetch).await?;

		if let Some(fallback) = plan.fallback() {
			let extra = self.index.keyword_documents(fallback, &spec.pre, fetch).await?;

			for hit in extra {
				if !hits.iter().any(|existing| existing.id == hit.id) {
					hits.push(hit);
				}
			}
		}

		hits.truncate(fetch as usize);

		Ok(hits)
	}

	/// Same primary-then-fallback strategy over the snapshot corpus.
	async fn snapshot_keyword_channel(
		&self,
		plan: &KeywordPlan,
		fetch: u32,
	) -> Result<Vec<SnapshotHit>> {
		let mut hits = self.index.keyword_snapshots(plan.primary(), fetch).await?;

		if let Some(fallback) = plan.fallback() {
			let extra = self.index.keyword_snapshots(fallback, fetch).await?;

			for hit in extra {
				if !hits.iter().any(|existing| existing.snapshot_id == hit.snapshot_id) {
					hits.push(hit);
				}
			}
		}

		hits.truncate(fetch as usize);

		Ok(hits)
	}
}

async fn run_channel<T, F>(
	name: &'static str,
	required: bool,
	timeout: Duration,
	fut: F,
) -> Result<Vec<T>>
where
	F: Future<Output = Result<Vec<T>>>,
{
	match tokio::time::timeout(timeout, fut).await {
		Ok(Ok(hits)) => Ok(hits),
		Ok(Err(err)) if required => Err(err),
		Ok(Err(err)) => {
			tracing::warn!(channel = name, error = %err, "Channel failed; degrading to empty.");

			Ok(Vec::new())
		},
		Err(_) if required => {
			Err(Error::Storage { message: format!("Channel {name} timed out.") })
		},
		Err(_) => {
			tracing::warn!(channel = name, "Channel timed out; degrading to empty.");

			Ok(Vec::new())
		},
	}
}

/// Candidate fetch depth: deep enough to survive post-filtering and
/// pagination, bounded so one request cannot scan the catalog.
fn fetch_cap(offset: u32, limit: u32) -> u32 {
	((offset.saturating_add(limit)).saturating_mul(5)).clamp(50, 500)
}

fn ingredient_channel_tokens(spec: &SearchSpec) -> Vec<String> {
	if !spec.post.include_tokens.is_empty() {
		return spec.post.include_tokens.clone();
	}

	canonical::canonical_phrase(&spec.query_text).into_iter().collect()
}

/// Map snapshot hits to their owning documents, first occurrence wins.
fn owner_hits(hits: &[SnapshotHit]) -> Vec<ChannelHit> {
	let mut out: Vec<ChannelHit> = Vec::with_capacity(hits.len());

	for hit in hits {
		if !out.iter().any(|existing| existing.id == hit.document_id) {
			out.push(ChannelHit { id: hit.document_id, score: hit.score });
		}
	}

	out
}

fn snapshot_channel_hits(hits: &[SnapshotHit]) -> Vec<ChannelHit> {
	hits.iter().map(|hit| ChannelHit { id: hit.snapshot_id, score: hit.score }).collect()
}

fn bypass_ranking(channel: &'static str, hits: &[ChannelHit]) -> Vec<FusedHit> {
	hits.iter()
		.map(|hit| FusedHit {
			id: hit.id,
			score: hit.score,
			best_channel_score: hit.score,
			channels: vec![channel],
		})
		.collect()
}

fn document_hit(doc: &Document, score: f32, spec: &SearchSpec, snippet_chars: u32) -> SearchHit {
	let preview = snippet::extract_snippet(&doc.body, &spec.snippet_terms, snippet_chars as usize);

	SearchHit {
		target_type: "document".to_string(),
		id: doc.id,
		subject_id: doc.subject_id,
		topic_id: doc.topic_id,
		title: doc.title.clone(),
		doc_kind: doc.kind.clone(),
		snippet: if preview.is_empty() { None } else { Some(preview) },
		score: Some(score),
		updated_at: doc.updated_at.format(&Rfc3339).ok(),
	}
}

fn snapshot_hit(
	snapshot: &PageSnapshot,
	owner: &Document,
	score: f32,
	spec: &SearchSpec,
	snippet_chars: u32,
) -> SearchHit {
	let preview =
		snippet::extract_snippet(&snapshot.content, &spec.snippet_terms, snippet_chars as usize);

	SearchHit {
		target_type: "linkedSnapshot".to_string(),
		id: snapshot.id,
		subject_id: owner.subject_id,
		topic_id: owner.topic_id,
		title: owner.title.clone(),
		doc_kind: owner.kind.clone(),
		snippet: if preview.is_empty() { None } else { Some(preview) },
		score: Some(score),
		updated_at: snapshot.fetched_at.format(&Rfc3339).ok(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fetch_cap_has_floor_and_ceiling() {
		assert_eq!(fetch_cap(0, 5), 50);
		assert_eq!(fetch_cap(0, 20), 100);
		assert_eq!(fetch_cap(400, 50), 500);
	}

	#[test]
	fn owner_hits_dedup_keeps_first() {
		let owner = Uuid::new_v4();
		let other = Uuid::new_v4();
		let hits = [
			SnapshotHit { snapshot_id: Uuid::new_v4(), document_id: owner, score: 0.9 },
			SnapshotHit { snapshot_id: Uuid::new_v4(), document_id: owner, score: 0.4 },
			SnapshotHit { snapshot_id: Uuid::new_v4(), document_id: other, score: 0.3 },
		];
		let mapped = owner_hits(&hits);

		assert_eq!(mapped.len(), 2);
		assert_eq!(mapped[0].id, owner);
		assert!((mapped[0].score - 0.9).abs() < f32::EPSILON);
	}
}
