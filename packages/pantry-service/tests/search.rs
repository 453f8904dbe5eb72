//! Service-level behavior over in-memory stores: channel orchestration,
//! fusion, post-filtering, pagination, and the freshness maintainer.

use std::sync::{Arc, Mutex};

use serde_json::json;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use pantry_service::{
	BoxFuture, ChannelHit, DocumentIndex, Embedder, EmbeddingWrite, Error, PantryService, Result,
	SnapshotHit,
	freshness::{self, RefreshOptions},
	request::{SearchFilters, SearchRequest},
	search::filter::PreFilter,
};
use pantry_storage::models::{Document, PageSnapshot};

const FAKE_MODEL: &str = "fake-embedding";

fn test_config() -> pantry_config::Config {
	toml::from_str(
		r#"
[service]
http_bind  = "127.0.0.1:0"
admin_bind = "127.0.0.1:0"
log_level  = "info"

[storage.postgres]
dsn            = "postgres://unused"
pool_max_conns = 1

[storage.qdrant]
url                 = "http://unused"
document_collection = "docs"
snapshot_collection = "snaps"
vector_dim          = 4

[providers.embedding]
api_base   = "http://unused"
api_key    = "unused"
path       = "/v1/embeddings"
model      = "fake-embedding"
dimensions = 4
timeout_ms = 1000

[search]

[freshness]
batch_size         = 4
max_chars          = 2000
poll_interval_secs = 60

[security]
"#,
	)
	.expect("Test config must parse.")
}

fn doc(id_byte: u8, kind: &str, title: &str, body: &str) -> Document {
	let now = OffsetDateTime::now_utc();

	Document {
		id: Uuid::from_bytes([id_byte; 16]),
		kind: kind.to_string(),
		title: title.to_string(),
		body: body.to_string(),
		subject_id: None,
		subject_label: None,
		topic_id: None,
		topic_label: None,
		tags: Vec::new(),
		ingredients: Vec::new(),
		ingredient_tokens: Vec::new(),
		imported: false,
		cooked_count: None,
		cooked_history: json!([]),
		last_cooked_at: None,
		avg_rating: None,
		embedding_model: None,
		embedding_hash: None,
		recipe_embedding_hash: None,
		embedded_at: None,
		embedding_checked_at: None,
		created_at: now,
		updated_at: now,
	}
}

fn snapshot(id_byte: u8, owner: Uuid, content: &str) -> PageSnapshot {
	let now = OffsetDateTime::now_utc();

	PageSnapshot {
		id: Uuid::from_bytes([id_byte; 16]),
		document_id: owner,
		url: "https://example.com/page".to_string(),
		fetch_status: "ok".to_string(),
		fetched_at: now,
		content: content.to_string(),
		content_hash: "unused".to_string(),
		embedding_model: None,
		embedding_hash: None,
		embedded_at: None,
		embedding_checked_at: None,
		created_at: now,
	}
}

#[derive(Default)]
struct FakeIndex {
	docs: Vec<Document>,
	snapshots: Vec<PageSnapshot>,
	semantic_hits: Vec<ChannelHit>,
	fail_semantic: bool,
	checked_documents: Mutex<Vec<Uuid>>,
	checked_snapshots: Mutex<Vec<Uuid>>,
	embedding_writes: Mutex<Vec<Uuid>>,
	token_writes: Mutex<Vec<(Uuid, Vec<String>)>>,
}
impl FakeIndex {
	/// Rough emulation of the store's keyword search: quoted input is a
	/// contiguous phrase match, `a OR b` matches any term, anything else
	/// requires every term; `-term` must be absent.
	fn keyword_match(query: &str, text: &str) -> Option<f32> {
		let haystack = text.to_lowercase();

		if let Some(stripped) = query.strip_prefix('"') {
			let phrase = stripped.split('"').next().unwrap_or("").to_lowercase();

			return haystack.contains(&phrase).then_some(2.0);
		}

		let mut matched = 0_u32;
		let any = query.contains(" OR ");

		for term in query.split_whitespace() {
			if term == "OR" {
				continue;
			}
			if let Some(negated) = term.strip_prefix('-') {
				if haystack.contains(&negated.to_lowercase()) {
					return None;
				}

				continue;
			}
			if haystack.contains(&term.to_lowercase()) {
				matched += 1;
			} else if !any {
				return None;
			}
		}

		(matched > 0).then_some(matched as f32)
	}

	fn page<T: Clone>(items: Vec<(Uuid, T)>, cursor: Option<Uuid>, batch: u32) -> Vec<T> {
		let mut items = items;

		items.sort_by_key(|(id, _)| *id);

		items
			.into_iter()
			.filter(|(id, _)| cursor.map(|cursor| *id > cursor).unwrap_or(true))
			.take(batch as usize)
			.map(|(_, item)| item)
			.collect()
	}
}
impl DocumentIndex for FakeIndex {
	fn keyword_documents<'a>(
		&'a self,
		query: &'a str,
		filter: &'a PreFilter,
		fetch: u32,
	) -> BoxFuture<'a, Result<Vec<ChannelHit>>> {
		Box::pin(async move {
			let mut hits: Vec<ChannelHit> = self
				.docs
				.iter()
				.filter(|doc| filter.matches(doc))
				.filter_map(|doc| {
					let text = format!("{} {}", doc.title, doc.body);

					Self::keyword_match(query, &text)
						.map(|score| ChannelHit { id: doc.id, score })
				})
				.collect();

			hits.sort_by(|left, right| {
				right.score.total_cmp(&left.score).then(left.id.cmp(&right.id))
			});
			hits.truncate(fetch as usize);

			Ok(hits)
		})
	}

	fn semantic_documents<'a>(
		&'a self,
		_vector: &'a [f32],
		filter: &'a PreFilter,
		fetch: u32,
	) -> BoxFuture<'a, Result<Vec<ChannelHit>>> {
		Box::pin(async move {
			if self.fail_semantic {
				return Err(Error::Qdrant { message: "vector index unavailable".to_string() });
			}

			let hits = self
				.semantic_hits
				.iter()
				.filter(|hit| {
					self.docs
						.iter()
						.find(|doc| doc.id == hit.id)
						.map(|doc| filter.matches(doc))
						.unwrap_or(false)
				})
				.take(fetch as usize)
				.copied()
				.collect();

			Ok(hits)
		})
	}

	fn ingredient_documents<'a>(
		&'a self,
		tokens: &'a [String],
		filter: &'a PreFilter,
		fetch: u32,
	) -> BoxFuture<'a, Result<Vec<ChannelHit>>> {
		Box::pin(async move {
			let hits = self
				.docs
				.iter()
				.filter(|doc| filter.matches(doc))
				.filter(|doc| {
					tokens.iter().all(|token| doc.ingredient_tokens.contains(token))
				})
				.take(fetch as usize)
				.map(|doc| ChannelHit { id: doc.id, score: 1.0 })
				.collect();

			Ok(hits)
		})
	}

	fn keyword_snapshots<'a>(
		&'a self,
		query: &'a str,
		fetch: u32,
	) -> BoxFuture<'a, Result<Vec<SnapshotHit>>> {
		Box::pin(async move {
			let hits = self
				.snapshots
				.iter()
				.filter_map(|snapshot| {
					Self::keyword_match(query, &snapshot.content).map(|score| SnapshotHit {
						snapshot_id: snapshot.id,
						document_id: snapshot.document_id,
						score,
					})
				})
				.take(fetch as usize)
				.collect();

			Ok(hits)
		})
	}

	fn semantic_snapshots<'a>(
		&'a self,
		_vector: &'a [f32],
		_fetch: u32,
	) -> BoxFuture<'a, Result<Vec<SnapshotHit>>> {
		Box::pin(async move { Ok(Vec::new()) })
	}

	fn fetch_documents<'a>(&'a self, ids: &'a [Uuid]) -> BoxFuture<'a, Result<Vec<Document>>> {
		Box::pin(async move {
			Ok(self.docs.iter().filter(|doc| ids.contains(&doc.id)).cloned().collect())
		})
	}

	fn fetch_snapshots<'a>(
		&'a self,
		ids: &'a [Uuid],
	) -> BoxFuture<'a, Result<Vec<PageSnapshot>>> {
		Box::pin(async move {
			Ok(self
				.snapshots
				.iter()
				.filter(|snapshot| ids.contains(&snapshot.id))
				.cloned()
				.collect())
		})
	}

	fn documents_missing_embedding<'a>(
		&'a self,
		cursor: Option<Uuid>,
		batch: u32,
	) -> BoxFuture<'a, Result<Vec<Document>>> {
		Box::pin(async move {
			let items = self
				.docs
				.iter()
				.filter(|doc| doc.embedding_hash.is_none())
				.map(|doc| (doc.id, doc.clone()))
				.collect();

			Ok(Self::page(items, cursor, batch))
		})
	}

	fn documents_embedding_outdated<'a>(
		&'a self,
		cursor: Option<Uuid>,
		batch: u32,
	) -> BoxFuture<'a, Result<Vec<Document>>> {
		Box::pin(async move {
			// A recorded check counts as checked-now, which is never earlier
			// than updated_at within a test.
			let checked = self.checked_documents.lock().expect("lock poisoned");
			let items = self
				.docs
				.iter()
				.filter(|doc| {
					doc.embedding_hash.is_some()
						&& doc.embedded_at.map(|at| at < doc.updated_at).unwrap_or(false)
						&& doc
							.embedding_checked_at
							.map(|at| at < doc.updated_at)
							.unwrap_or(true)
						&& !checked.contains(&doc.id)
				})
				.map(|doc| (doc.id, doc.clone()))
				.collect();

			Ok(Self::page(items, cursor, batch))
		})
	}

	fn snapshots_needing_embedding<'a>(
		&'a self,
		cursor: Option<Uuid>,
		batch: u32,
	) -> BoxFuture<'a, Result<Vec<PageSnapshot>>> {
		Box::pin(async move {
			let checked = self.checked_snapshots.lock().expect("lock poisoned");
			let items = self
				.snapshots
				.iter()
				.filter(|snapshot| {
					snapshot.embedding_hash.is_none()
						|| (snapshot
							.embedded_at
							.map(|at| at < snapshot.fetched_at)
							.unwrap_or(false)
							&& snapshot
								.embedding_checked_at
								.map(|at| at < snapshot.fetched_at)
								.unwrap_or(true)
							&& !checked.contains(&snapshot.id))
				})
				.map(|snapshot| (snapshot.id, snapshot.clone()))
				.collect();

			Ok(Self::page(items, cursor, batch))
		})
	}

	fn mark_document_checked<'a>(
		&'a self,
		id: Uuid,
		_now: OffsetDateTime,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			self.checked_documents.lock().expect("lock poisoned").push(id);

			Ok(())
		})
	}

	fn mark_snapshot_checked<'a>(
		&'a self,
		id: Uuid,
		_now: OffsetDateTime,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			self.checked_snapshots.lock().expect("lock poisoned").push(id);

			Ok(())
		})
	}

	fn store_document_embedding<'a>(
		&'a self,
		doc: &'a Document,
		_write: &'a EmbeddingWrite,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			self.embedding_writes.lock().expect("lock poisoned").push(doc.id);

			Ok(())
		})
	}

	fn store_snapshot_embedding<'a>(
		&'a self,
		snapshot: &'a PageSnapshot,
		_write: &'a EmbeddingWrite,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			self.embedding_writes.lock().expect("lock poisoned").push(snapshot.id);

			Ok(())
		})
	}

	fn documents_missing_ingredient_tokens<'a>(
		&'a self,
		limit: u32,
	) -> BoxFuture<'a, Result<Vec<Document>>> {
		Box::pin(async move {
			Ok(self
				.docs
				.iter()
				.filter(|doc| {
					doc.kind == "recipe"
						&& doc.ingredient_tokens.is_empty()
						&& !doc.ingredients.is_empty()
				})
				.take(limit as usize)
				.cloned()
				.collect())
		})
	}

	fn write_ingredient_tokens<'a>(
		&'a self,
		id: Uuid,
		tokens: &'a [String],
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			self.token_writes.lock().expect("lock poisoned").push((id, tokens.to_vec()));

			Ok(())
		})
	}

	fn documents_with_cook_data<'a>(&'a self, limit: u32) -> BoxFuture<'a, Result<Vec<Document>>> {
		Box::pin(async move {
			Ok(self
				.docs
				.iter()
				.filter(|doc| {
					doc.cooked_history.as_array().map(|list| !list.is_empty()).unwrap_or(false)
				})
				.take(limit as usize)
				.cloned()
				.collect())
		})
	}

	fn write_cooked_rollup<'a>(
		&'a self,
		_id: Uuid,
		_last_cooked_at: Option<OffsetDateTime>,
		_avg_rating: Option<f32>,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move { Ok(()) })
	}
}

enum EmbedBehavior {
	Ok,
	RateLimited,
}

struct FakeEmbedder {
	behavior: EmbedBehavior,
	calls: Mutex<u32>,
}
impl FakeEmbedder {
	fn new(behavior: EmbedBehavior) -> Self {
		Self { behavior, calls: Mutex::new(0) }
	}

	fn call_count(&self) -> u32 {
		*self.calls.lock().expect("lock poisoned")
	}
}
impl Embedder for FakeEmbedder {
	fn embed<'a>(
		&'a self,
		_model: Option<&'a str>,
		texts: &'a [String],
	) -> BoxFuture<'a, pantry_providers::Result<Vec<Vec<f32>>>> {
		Box::pin(async move {
			*self.calls.lock().expect("lock poisoned") += 1;

			match self.behavior {
				EmbedBehavior::Ok => Ok(texts.iter().map(|_| vec![0.1, 0.2, 0.3, 0.4]).collect()),
				EmbedBehavior::RateLimited => Err(pantry_providers::Error::RateLimited {
					retry_after: Some(std::time::Duration::from_secs(30)),
				}),
			}
		})
	}

	fn model(&self) -> &str {
		FAKE_MODEL
	}
}

fn service(index: FakeIndex, embedder: FakeEmbedder) -> PantryService {
	PantryService { cfg: test_config(), index: Arc::new(index), embedder: Arc::new(embedder) }
}

fn request(q: &str) -> SearchRequest {
	SearchRequest { q: q.to_string(), ..Default::default() }
}

#[tokio::test]
async fn contiguous_phrase_outranks_scattered_terms() {
	let contiguous = doc(1, "note", "Winter warmers", "Hearty chicken soup for cold nights.");
	let scattered = doc(2, "note", "Meal notes", "Chicken with rice. Freeze the soup stock.");
	let svc = service(
		FakeIndex { docs: vec![contiguous.clone(), scattered], ..Default::default() },
		FakeEmbedder::new(EmbedBehavior::Ok),
	);
	let response = svc.search(request("chicken soup")).await.expect("search failed");

	assert_eq!(response.hits[0].id, contiguous.id);
	assert_eq!(response.approximate_total, 2, "fallback results must still be reachable");
}

#[tokio::test]
async fn semantic_failure_degrades_instead_of_failing() {
	let matching = doc(1, "note", "Pasta night", "Quick pasta with garlic.");
	let svc = service(
		FakeIndex { docs: vec![matching.clone()], fail_semantic: true, ..Default::default() },
		FakeEmbedder::new(EmbedBehavior::Ok),
	);
	let response = svc.search(request("pasta")).await.expect("search must not fail");

	assert_eq!(response.hits.len(), 1);
	assert_eq!(response.hits[0].id, matching.id);
}

#[tokio::test]
async fn semantic_mode_propagates_channel_errors() {
	let svc = service(
		FakeIndex { docs: vec![doc(1, "note", "A", "pasta")], fail_semantic: true, ..Default::default() },
		FakeEmbedder::new(EmbedBehavior::Ok),
	);
	let mut req = request("pasta");

	req.mode = Some("semantic".to_string());

	assert!(matches!(svc.search(req).await, Err(Error::Qdrant { .. })));
}

#[tokio::test]
async fn pagination_is_consistent_across_pages() {
	let docs: Vec<Document> = (1..=12)
		.map(|byte| doc(byte, "note", &format!("Note {byte}"), "pasta every single day"))
		.collect();
	let svc = service(
		FakeIndex { docs, ..Default::default() },
		FakeEmbedder::new(EmbedBehavior::Ok),
	);
	let page = |offset: u32, limit: u32| {
		let mut req = request("pasta");

		req.offset = Some(offset);
		req.limit = Some(limit);

		req
	};
	let first = svc.search(page(0, 4)).await.expect("search failed");
	let second = svc.search(page(4, 4)).await.expect("search failed");
	let combined = svc.search(page(0, 8)).await.expect("search failed");
	let stitched: Vec<Uuid> =
		first.hits.iter().chain(second.hits.iter()).map(|hit| hit.id).collect();
	let whole: Vec<Uuid> = combined.hits.iter().map(|hit| hit.id).collect();

	assert_eq!(stitched, whole);
	assert_eq!(first.approximate_total, combined.approximate_total);
}

#[tokio::test]
async fn ingredient_include_and_exclude_filters_apply() {
	let mut with_oil = doc(1, "recipe", "Roast vegetables", "Toss with olive oil and salt.");
	let mut with_butter = doc(2, "recipe", "Butter pasta", "Melt butter over pasta.");

	with_oil.ingredient_tokens =
		vec!["olive oil".to_string(), "olive".to_string(), "oil".to_string()];
	with_butter.ingredient_tokens = vec!["butter".to_string(), "pasta".to_string()];

	let svc = service(
		FakeIndex { docs: vec![with_oil.clone(), with_butter], ..Default::default() },
		FakeEmbedder::new(EmbedBehavior::Ok),
	);
	let mut req = request("pasta OR vegetables OR salt OR butter");

	req.scope = Some("recipes".to_string());
	req.filters = SearchFilters {
		include_ingredients: vec!["olive oil".to_string()],
		exclude_ingredients: vec!["butter".to_string()],
		..Default::default()
	};

	let response = svc.search(req).await.expect("search failed");

	assert_eq!(response.hits.len(), 1);
	assert_eq!(response.hits[0].id, with_oil.id);
}

#[tokio::test]
async fn never_cooked_filter_keeps_untouched_rows() {
	let untouched = doc(1, "recipe", "New idea", "A pasta experiment.");
	let mut counted = doc(2, "recipe", "Old favorite", "The usual pasta.");

	counted.cooked_count = Some(5);

	let svc = service(
		FakeIndex { docs: vec![untouched.clone(), counted], ..Default::default() },
		FakeEmbedder::new(EmbedBehavior::Ok),
	);
	let mut req = request("pasta");

	req.scope = Some("recipes".to_string());
	req.filters = SearchFilters {
		cooked: Some(pantry_service::request::CookedRequest {
			state: Some("never".to_string()),
			within_days: None,
			min_avg_rating: None,
		}),
		..Default::default()
	};

	let response = svc.search(req).await.expect("search failed");

	assert_eq!(response.hits.len(), 1);
	assert_eq!(response.hits[0].id, untouched.id);
}

#[tokio::test]
async fn snapshot_evidence_folds_into_owner_documents() {
	let owner = doc(1, "note", "Sourdough link", "Saved from the bakery blog.");
	let page = snapshot(9, owner.id, "Long levain fermentation schedule for sourdough.");
	let svc = service(
		FakeIndex { docs: vec![owner.clone()], snapshots: vec![page], ..Default::default() },
		FakeEmbedder::new(EmbedBehavior::Ok),
	);
	let response = svc.search(request("levain")).await.expect("search failed");

	assert_eq!(response.hits.len(), 1);
	assert_eq!(response.hits[0].id, owner.id);
	assert_eq!(response.hits[0].target_type, "document");
}

#[tokio::test]
async fn fresh_rows_skip_the_provider_and_bump_checked_at() {
	let mut fresh = doc(1, "note", "Stable note", "Nothing changed here.");
	let cfg = test_config();
	let input = freshness::document_embedding_input(&fresh, cfg.freshness.max_chars as usize);

	fresh.embedding_model = Some(FAKE_MODEL.to_string());
	fresh.embedding_hash = Some(freshness::embedding_input_hash(FAKE_MODEL, &input));
	fresh.embedded_at = Some(fresh.updated_at - Duration::hours(1));

	let index = Arc::new(FakeIndex { docs: vec![fresh.clone()], ..Default::default() });
	let embedder = Arc::new(FakeEmbedder::new(EmbedBehavior::Ok));
	let svc = PantryService { cfg, index: index.clone(), embedder: embedder.clone() };
	let report = svc.refresh_embeddings(&RefreshOptions::default()).await.expect("refresh failed");

	assert_eq!(report.skipped_fresh, 1);
	assert_eq!(report.embedded, 0);
	assert_eq!(embedder.call_count(), 0, "a fresh row must not reach the provider");
	assert_eq!(
		*index.checked_documents.lock().expect("lock poisoned"),
		vec![fresh.id],
		"a fresh row still gets its checked timestamp bumped"
	);
	assert!(index.embedding_writes.lock().expect("lock poisoned").is_empty());
}

#[tokio::test]
async fn zero_snapshot_weight_silences_snapshot_evidence() {
	let owner = doc(1, "note", "Sourdough link", "Saved from the bakery blog.");
	let page = snapshot(9, owner.id, "Long levain fermentation schedule for sourdough.");
	let index = FakeIndex { docs: vec![owner], snapshots: vec![page], ..Default::default() };
	let mut cfg = test_config();

	cfg.search.snapshot_weight = 0.0;

	let svc = PantryService {
		cfg,
		index: Arc::new(index),
		embedder: Arc::new(FakeEmbedder::new(EmbedBehavior::Ok)),
	};
	let response = svc.search(request("levain")).await.expect("search failed");

	assert!(response.hits.is_empty(), "a weightless snapshot channel must contribute nothing");
	assert_eq!(response.approximate_total, 0);
}

#[tokio::test]
async fn scattered_snapshot_terms_survive_via_fallback() {
	let owner = doc(1, "note", "Stock notes", "Saved from a cooking forum.");
	let page =
		snapshot(9, owner.id, "Chicken stock first. Strain, then season the soup to taste.");
	let svc = service(
		FakeIndex { docs: vec![owner.clone()], snapshots: vec![page], ..Default::default() },
		FakeEmbedder::new(EmbedBehavior::Ok),
	);
	let response = svc.search(request("chicken soup")).await.expect("search failed");

	assert_eq!(response.hits.len(), 1, "non-contiguous snapshot matches must still be found");
	assert_eq!(response.hits[0].id, owner.id);
}

#[tokio::test]
async fn checked_rows_are_not_reselected_by_later_runs() {
	let mut fresh = doc(1, "note", "Bulk import", "Imported long before embedding ran.");
	let cfg = test_config();
	let input = freshness::document_embedding_input(&fresh, cfg.freshness.max_chars as usize);

	fresh.embedding_model = Some(FAKE_MODEL.to_string());
	fresh.embedding_hash = Some(freshness::embedding_input_hash(FAKE_MODEL, &input));
	fresh.embedded_at = Some(fresh.updated_at - Duration::hours(1));

	let index = Arc::new(FakeIndex { docs: vec![fresh], ..Default::default() });
	let embedder = Arc::new(FakeEmbedder::new(EmbedBehavior::Ok));
	let svc = PantryService { cfg, index: index.clone(), embedder };
	let first = svc.refresh_embeddings(&RefreshOptions::default()).await.expect("refresh failed");

	assert_eq!(first.scanned, 1);
	assert_eq!(first.skipped_fresh, 1);

	let second = svc.refresh_embeddings(&RefreshOptions::default()).await.expect("refresh failed");

	assert_eq!(second.scanned, 0, "a checked fresh row must not be re-selected");
	assert_eq!(
		index.checked_documents.lock().expect("lock poisoned").len(),
		1,
		"the checked timestamp is bumped once, not on every run"
	);
}

#[tokio::test]
async fn rate_limit_aborts_the_run_and_surfaces_retry_hint() {
	let stale_one = doc(1, "note", "Edited", "New text one.");
	let stale_two = doc(2, "note", "Edited", "New text two.");
	let svc = service(
		FakeIndex { docs: vec![stale_one, stale_two], ..Default::default() },
		FakeEmbedder::new(EmbedBehavior::RateLimited),
	);
	let report = svc.refresh_embeddings(&RefreshOptions::default()).await.expect("refresh failed");

	assert!(report.rate_limited);
	assert_eq!(report.retry_after_secs, Some(30));
	assert_eq!(report.embedded, 0);
	assert_eq!(report.scanned, 1, "the run must abort on the first rate-limited row");
}
