pub mod admin;
pub mod freshness;
pub mod index;
pub mod request;
pub mod search;

mod error;

pub use error::{Error, Result};
pub use request::{
	CookedRequest, SearchFilters, SearchHit, SearchRequest, SearchResponse,
};

use std::{future::Future, pin::Pin, sync::Arc};

use time::OffsetDateTime;
use uuid::Uuid;

use pantry_storage::models::{Document, PageSnapshot};
use search::filter::PreFilter;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One candidate from a document-level retrieval channel, ordered best first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelHit {
	pub id: Uuid,
	pub score: f32,
}

/// One candidate from a snapshot-level channel; owning document resolved by
/// the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapshotHit {
	pub snapshot_id: Uuid,
	pub document_id: Uuid,
	pub score: f32,
}

/// Everything written back for one refreshed document embedding: the body
/// vector, the recipe-tuned vector for recipe rows, and the hash bookkeeping
/// that makes the next run skip the row.
#[derive(Debug, Clone)]
pub struct EmbeddingWrite {
	pub body_vector: Vec<f32>,
	pub recipe_vector: Option<Vec<f32>>,
	pub model: String,
	pub body_hash: String,
	pub recipe_hash: Option<String>,
	pub now: OffsetDateTime,
}

/// The retrieval surface of the two stores. Production lives in
/// [`index::CatalogIndex`]; tests substitute in-memory fakes.
pub trait DocumentIndex
where
	Self: Send + Sync,
{
	fn keyword_documents<'a>(
		&'a self,
		query: &'a str,
		filter: &'a PreFilter,
		fetch: u32,
	) -> BoxFuture<'a, Result<Vec<ChannelHit>>>;

	fn semantic_documents<'a>(
		&'a self,
		vector: &'a [f32],
		filter: &'a PreFilter,
		fetch: u32,
	) -> BoxFuture<'a, Result<Vec<ChannelHit>>>;

	fn ingredient_documents<'a>(
		&'a self,
		tokens: &'a [String],
		filter: &'a PreFilter,
		fetch: u32,
	) -> BoxFuture<'a, Result<Vec<ChannelHit>>>;

	fn keyword_snapshots<'a>(
		&'a self,
		query: &'a str,
		fetch: u32,
	) -> BoxFuture<'a, Result<Vec<SnapshotHit>>>;

	fn semantic_snapshots<'a>(
		&'a self,
		vector: &'a [f32],
		fetch: u32,
	) -> BoxFuture<'a, Result<Vec<SnapshotHit>>>;

	fn fetch_documents<'a>(&'a self, ids: &'a [Uuid]) -> BoxFuture<'a, Result<Vec<Document>>>;

	fn fetch_snapshots<'a>(&'a self, ids: &'a [Uuid])
	-> BoxFuture<'a, Result<Vec<PageSnapshot>>>;

	fn documents_missing_embedding<'a>(
		&'a self,
		cursor: Option<Uuid>,
		batch: u32,
	) -> BoxFuture<'a, Result<Vec<Document>>>;

	fn documents_embedding_outdated<'a>(
		&'a self,
		cursor: Option<Uuid>,
		batch: u32,
	) -> BoxFuture<'a, Result<Vec<Document>>>;

	fn snapshots_needing_embedding<'a>(
		&'a self,
		cursor: Option<Uuid>,
		batch: u32,
	) -> BoxFuture<'a, Result<Vec<PageSnapshot>>>;

	fn mark_document_checked<'a>(
		&'a self,
		id: Uuid,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<()>>;

	fn mark_snapshot_checked<'a>(
		&'a self,
		id: Uuid,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<()>>;

	fn store_document_embedding<'a>(
		&'a self,
		doc: &'a Document,
		write: &'a EmbeddingWrite,
	) -> BoxFuture<'a, Result<()>>;

	fn store_snapshot_embedding<'a>(
		&'a self,
		snapshot: &'a PageSnapshot,
		write: &'a EmbeddingWrite,
	) -> BoxFuture<'a, Result<()>>;

	fn documents_missing_ingredient_tokens<'a>(
		&'a self,
		limit: u32,
	) -> BoxFuture<'a, Result<Vec<Document>>>;

	fn write_ingredient_tokens<'a>(
		&'a self,
		id: Uuid,
		tokens: &'a [String],
	) -> BoxFuture<'a, Result<()>>;

	fn documents_with_cook_data<'a>(&'a self, limit: u32) -> BoxFuture<'a, Result<Vec<Document>>>;

	fn write_cooked_rollup<'a>(
		&'a self,
		id: Uuid,
		last_cooked_at: Option<OffsetDateTime>,
		avg_rating: Option<f32>,
	) -> BoxFuture<'a, Result<()>>;
}

pub trait Embedder
where
	Self: Send + Sync,
{
	/// `model` overrides the configured model for this call; `None` uses
	/// [`Embedder::model`].
	fn embed<'a>(
		&'a self,
		model: Option<&'a str>,
		texts: &'a [String],
	) -> BoxFuture<'a, pantry_providers::Result<Vec<Vec<f32>>>>;

	fn model(&self) -> &str;
}

/// Production [`Embedder`] over the HTTP provider client.
pub struct ProviderEmbedder {
	pub cfg: pantry_config::EmbeddingProviderConfig,
}
impl Embedder for ProviderEmbedder {
	fn embed<'a>(
		&'a self,
		model: Option<&'a str>,
		texts: &'a [String],
	) -> BoxFuture<'a, pantry_providers::Result<Vec<Vec<f32>>>> {
		match model {
			None => Box::pin(pantry_providers::embedding::embed(&self.cfg, texts)),
			Some(model) => {
				let mut cfg = self.cfg.clone();

				cfg.model = model.to_string();

				Box::pin(async move { pantry_providers::embedding::embed(&cfg, texts).await })
			},
		}
	}

	fn model(&self) -> &str {
		&self.cfg.model
	}
}

pub struct PantryService {
	pub cfg: pantry_config::Config,
	pub index: Arc<dyn DocumentIndex>,
	pub embedder: Arc<dyn Embedder>,
}
