use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Document {
	pub id: Uuid,
	pub kind: String,
	pub title: String,
	pub body: String,
	pub subject_id: Option<Uuid>,
	pub subject_label: Option<String>,
	pub topic_id: Option<Uuid>,
	pub topic_label: Option<String>,
	pub tags: Vec<String>,
	pub ingredients: Vec<String>,
	pub ingredient_tokens: Vec<String>,
	pub imported: bool,
	/// Pre-migration cook counter. NULL on rows written after the history
	/// migration; consult together with `cooked_history`.
	pub cooked_count: Option<i32>,
	/// JSON list of `{at, rating?}` entries.
	pub cooked_history: Value,
	pub last_cooked_at: Option<OffsetDateTime>,
	pub avg_rating: Option<f32>,
	pub embedding_model: Option<String>,
	pub embedding_hash: Option<String>,
	pub recipe_embedding_hash: Option<String>,
	pub embedded_at: Option<OffsetDateTime>,
	pub embedding_checked_at: Option<OffsetDateTime>,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PageSnapshot {
	pub id: Uuid,
	pub document_id: Uuid,
	pub url: String,
	pub fetch_status: String,
	pub fetched_at: OffsetDateTime,
	pub content: String,
	pub content_hash: String,
	pub embedding_model: Option<String>,
	pub embedding_hash: Option<String>,
	pub embedded_at: Option<OffsetDateTime>,
	pub embedding_checked_at: Option<OffsetDateTime>,
	pub created_at: OffsetDateTime,
}
