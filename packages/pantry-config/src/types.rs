use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub providers: Providers,
	pub search: Search,
	pub freshness: Freshness,
	pub security: Security,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub admin_bind: String,
	pub log_level: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Storage {
	pub postgres: Postgres,
	pub qdrant: Qdrant,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Qdrant {
	pub url: String,
	/// Collection holding one point per catalog document.
	pub document_collection: String,
	/// Collection holding one point per imported page snapshot.
	pub snapshot_collection: String,
	pub vector_dim: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Providers {
	pub embedding: EmbeddingProviderConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	pub timeout_ms: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Search {
	/// Rank-smoothing constant of the reciprocal-rank fusion formula.
	#[serde(default = "default_rrf_k")]
	pub rrf_k: u32,
	/// Contribution weight of snapshot-channel ranks relative to document
	/// channels.
	#[serde(default = "default_snapshot_weight")]
	pub snapshot_weight: f32,
	#[serde(default = "default_max_limit")]
	pub max_limit: u32,
	/// Similarity floor below which semantic hits are discarded.
	#[serde(default = "default_min_similarity")]
	pub min_similarity: f32,
	#[serde(default = "default_channel_timeout_ms")]
	pub channel_timeout_ms: u64,
	#[serde(default = "default_snippet_chars")]
	pub snippet_chars: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Freshness {
	pub batch_size: u32,
	/// Body prefix length, in characters, that feeds the embedding input.
	pub max_chars: u32,
	pub poll_interval_secs: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Security {
	pub admin_auth_token: Option<String>,
}

fn default_rrf_k() -> u32 {
	60
}

fn default_snapshot_weight() -> f32 {
	0.6
}

fn default_max_limit() -> u32 {
	50
}

fn default_min_similarity() -> f32 {
	0.25
}

fn default_channel_timeout_ms() -> u64 {
	2_000
}

fn default_snippet_chars() -> u32 {
	200
}
