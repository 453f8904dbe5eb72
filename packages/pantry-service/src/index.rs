//! Production [`DocumentIndex`] over Postgres and Qdrant.

use std::collections::HashMap;

use qdrant_client::qdrant::{
	Condition, DatetimeRange, Filter, PointId, PointStruct, Query, QueryPointsBuilder,
	ScoredPoint, Timestamp, UpsertPointsBuilder, Vector, point_id::PointIdOptions, value::Kind,
};
use qdrant_client::Payload;
use sqlx::{Postgres, QueryBuilder};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use uuid::Uuid;

use pantry_storage::{
	db::Db,
	models::{Document, PageSnapshot},
	qdrant::{BODY_VECTOR_NAME, QdrantStore, RECIPE_VECTOR_NAME},
};

use crate::{
	BoxFuture, ChannelHit, DocumentIndex, EmbeddingWrite, Error, Result, SnapshotHit,
	search::filter::PreFilter,
};

const DOCUMENT_COLUMNS: &str = "\
id, kind, title, body, subject_id, subject_label, topic_id, topic_label, tags, ingredients, \
ingredient_tokens, imported, cooked_count, cooked_history, last_cooked_at, avg_rating, \
embedding_model, embedding_hash, recipe_embedding_hash, embedded_at, embedding_checked_at, \
created_at, updated_at";
const SNAPSHOT_COLUMNS: &str = "\
id, document_id, url, fetch_status, fetched_at, content, content_hash, embedding_model, \
embedding_hash, embedded_at, embedding_checked_at, created_at";

pub struct CatalogIndex {
	pub db: Db,
	pub qdrant: QdrantStore,
}
impl CatalogIndex {
	pub fn new(db: Db, qdrant: QdrantStore) -> Self {
		Self { db, qdrant }
	}

	async fn query_points(
		&self,
		collection: &str,
		vector_name: &str,
		vector: &[f32],
		filter: Option<Filter>,
		fetch: u32,
		with_payload: bool,
	) -> Result<Vec<ScoredPoint>> {
		let mut search = QueryPointsBuilder::new(collection.to_string())
			.query(Query::new_nearest(vector.to_vec()))
			.using(vector_name.to_string())
			.limit(fetch as u64)
			.with_payload(with_payload);

		if let Some(filter) = filter {
			search = search.filter(filter);
		}

		let response = self
			.qdrant
			.client
			.query(search)
			.await
			.map_err(|err| Error::Qdrant { message: err.to_string() })?;

		Ok(response.result)
	}
}

impl DocumentIndex for CatalogIndex {
	fn keyword_documents<'a>(
		&'a self,
		query: &'a str,
		filter: &'a PreFilter,
		fetch: u32,
	) -> BoxFuture<'a, Result<Vec<ChannelHit>>> {
		Box::pin(async move {
			let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
				"SELECT id, ts_rank_cd(search_tsv, websearch_to_tsquery('english', ",
			);

			builder.push_bind(query);
			builder.push(
				")) AS score FROM documents WHERE search_tsv @@ websearch_to_tsquery('english', ",
			);
			builder.push_bind(query);
			builder.push(")");
			push_prefilter_sql(&mut builder, filter);
			builder.push(" ORDER BY score DESC, updated_at DESC LIMIT ");
			builder.push_bind(fetch as i64);

			let rows: Vec<(Uuid, f32)> =
				builder.build_query_as().fetch_all(&self.db.pool).await?;

			Ok(rows.into_iter().map(|(id, score)| ChannelHit { id, score }).collect())
		})
	}

	fn semantic_documents<'a>(
		&'a self,
		vector: &'a [f32],
		filter: &'a PreFilter,
		fetch: u32,
	) -> BoxFuture<'a, Result<Vec<ChannelHit>>> {
		Box::pin(async move {
			// Recipe-only scopes search the recipe-tuned vector.
			let vector_name = if filter.kinds == ["recipe".to_string()] {
				RECIPE_VECTOR_NAME
			} else {
				BODY_VECTOR_NAME
			};
			let points = self
				.query_points(
					&self.qdrant.document_collection,
					vector_name,
					vector,
					Some(qdrant_prefilter(filter)),
					fetch,
					false,
				)
				.await?;

			Ok(points
				.iter()
				.filter_map(|point| {
					let id = point.id.as_ref().and_then(point_uuid)?;

					Some(ChannelHit { id, score: point.score })
				})
				.collect())
		})
	}

	fn ingredient_documents<'a>(
		&'a self,
		tokens: &'a [String],
		filter: &'a PreFilter,
		fetch: u32,
	) -> BoxFuture<'a, Result<Vec<ChannelHit>>> {
		Box::pin(async move {
			let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
				"SELECT id, 1.0::real AS score FROM documents WHERE ingredient_tokens @> ",
			);

			builder.push_bind(tokens.to_vec());
			push_prefilter_sql(&mut builder, filter);
			builder.push(" ORDER BY updated_at DESC LIMIT ");
			builder.push_bind(fetch as i64);

			let rows: Vec<(Uuid, f32)> =
				builder.build_query_as().fetch_all(&self.db.pool).await?;

			Ok(rows.into_iter().map(|(id, score)| ChannelHit { id, score }).collect())
		})
	}

	fn keyword_snapshots<'a>(
		&'a self,
		query: &'a str,
		fetch: u32,
	) -> BoxFuture<'a, Result<Vec<SnapshotHit>>> {
		Box::pin(async move {
			let rows: Vec<(Uuid, Uuid, f32)> = sqlx::query_as(
				"\
SELECT id, document_id, ts_rank_cd(search_tsv, websearch_to_tsquery('english', $1)) AS score
FROM page_snapshots
WHERE search_tsv @@ websearch_to_tsquery('english', $1)
	AND fetch_status = 'ok'
ORDER BY score DESC, fetched_at DESC
LIMIT $2",
			)
			.bind(query)
			.bind(fetch as i64)
			.fetch_all(&self.db.pool)
			.await?;

			Ok(rows
				.into_iter()
				.map(|(snapshot_id, document_id, score)| SnapshotHit {
					snapshot_id,
					document_id,
					score,
				})
				.collect())
		})
	}

	fn semantic_snapshots<'a>(
		&'a self,
		vector: &'a [f32],
		fetch: u32,
	) -> BoxFuture<'a, Result<Vec<SnapshotHit>>> {
		Box::pin(async move {
			let points = self
				.query_points(
					&self.qdrant.snapshot_collection,
					BODY_VECTOR_NAME,
					vector,
					None,
					fetch,
					true,
				)
				.await?;

			Ok(points
				.iter()
				.filter_map(|point| {
					let snapshot_id = point.id.as_ref().and_then(point_uuid)?;
					let document_id = payload_uuid(point, "document_id")?;

					Some(SnapshotHit { snapshot_id, document_id, score: point.score })
				})
				.collect())
		})
	}

	fn fetch_documents<'a>(&'a self, ids: &'a [Uuid]) -> BoxFuture<'a, Result<Vec<Document>>> {
		Box::pin(async move {
			if ids.is_empty() {
				return Ok(Vec::new());
			}

			let docs = sqlx::query_as::<_, Document>(&format!(
				"SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ANY($1)"
			))
			.bind(ids.to_vec())
			.fetch_all(&self.db.pool)
			.await?;

			Ok(docs)
		})
	}

	fn fetch_snapshots<'a>(
		&'a self,
		ids: &'a [Uuid],
	) -> BoxFuture<'a, Result<Vec<PageSnapshot>>> {
		Box::pin(async move {
			if ids.is_empty() {
				return Ok(Vec::new());
			}

			let snapshots = sqlx::query_as::<_, PageSnapshot>(&format!(
				"SELECT {SNAPSHOT_COLUMNS} FROM page_snapshots WHERE id = ANY($1)"
			))
			.bind(ids.to_vec())
			.fetch_all(&self.db.pool)
			.await?;

			Ok(snapshots)
		})
	}

	fn documents_missing_embedding<'a>(
		&'a self,
		cursor: Option<Uuid>,
		batch: u32,
	) -> BoxFuture<'a, Result<Vec<Document>>> {
		Box::pin(async move {
			let docs = sqlx::query_as::<_, Document>(&format!(
				"\
SELECT {DOCUMENT_COLUMNS} FROM documents
WHERE embedding_hash IS NULL AND ($1::uuid IS NULL OR id > $1)
ORDER BY id
LIMIT $2"
			))
			.bind(cursor)
			.bind(batch as i64)
			.fetch_all(&self.db.pool)
			.await?;

			Ok(docs)
		})
	}

	fn documents_embedding_outdated<'a>(
		&'a self,
		cursor: Option<Uuid>,
		batch: u32,
	) -> BoxFuture<'a, Result<Vec<Document>>> {
		Box::pin(async move {
			let docs = sqlx::query_as::<_, Document>(&format!(
				"\
SELECT {DOCUMENT_COLUMNS} FROM documents
WHERE embedding_hash IS NOT NULL
	AND embedded_at < updated_at
	AND (embedding_checked_at IS NULL OR embedding_checked_at < updated_at)
	AND ($1::uuid IS NULL OR id > $1)
ORDER BY id
LIMIT $2"
			))
			.bind(cursor)
			.bind(batch as i64)
			.fetch_all(&self.db.pool)
			.await?;

			Ok(docs)
		})
	}

	fn snapshots_needing_embedding<'a>(
		&'a self,
		cursor: Option<Uuid>,
		batch: u32,
	) -> BoxFuture<'a, Result<Vec<PageSnapshot>>> {
		Box::pin(async move {
			let snapshots = sqlx::query_as::<_, PageSnapshot>(&format!(
				"\
SELECT {SNAPSHOT_COLUMNS} FROM page_snapshots
WHERE fetch_status = 'ok'
	AND (embedding_hash IS NULL
		OR (embedded_at < fetched_at
			AND (embedding_checked_at IS NULL OR embedding_checked_at < fetched_at)))
	AND ($1::uuid IS NULL OR id > $1)
ORDER BY id
LIMIT $2"
			))
			.bind(cursor)
			.bind(batch as i64)
			.fetch_all(&self.db.pool)
			.await?;

			Ok(snapshots)
		})
	}

	fn mark_document_checked<'a>(
		&'a self,
		id: Uuid,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			sqlx::query("UPDATE documents SET embedding_checked_at = $2 WHERE id = $1")
				.bind(id)
				.bind(now)
				.execute(&self.db.pool)
				.await?;

			Ok(())
		})
	}

	fn mark_snapshot_checked<'a>(
		&'a self,
		id: Uuid,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			sqlx::query("UPDATE page_snapshots SET embedding_checked_at = $2 WHERE id = $1")
				.bind(id)
				.bind(now)
				.execute(&self.db.pool)
				.await?;

			Ok(())
		})
	}

	fn store_document_embedding<'a>(
		&'a self,
		doc: &'a Document,
		write: &'a EmbeddingWrite,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let payload = document_payload(doc)?;
			let mut vectors = HashMap::new();

			vectors
				.insert(BODY_VECTOR_NAME.to_string(), Vector::from(write.body_vector.clone()));

			if let Some(recipe_vector) = &write.recipe_vector {
				vectors
					.insert(RECIPE_VECTOR_NAME.to_string(), Vector::from(recipe_vector.clone()));
			}

			let point = PointStruct::new(doc.id.to_string(), vectors, payload);

			self.qdrant
				.client
				.upsert_points(
					UpsertPointsBuilder::new(self.qdrant.document_collection.clone(), vec![
						point,
					])
					.wait(true),
				)
				.await
				.map_err(|err| Error::Qdrant { message: err.to_string() })?;

			// Metadata lands in one statement only after the point exists, so
			// a crash in between re-embeds instead of serving a stale vector.
			sqlx::query(
				"\
UPDATE documents
SET embedding_model = $2,
	embedding_hash = $3,
	recipe_embedding_hash = $4,
	embedded_at = $5,
	embedding_checked_at = $5
WHERE id = $1",
			)
			.bind(doc.id)
			.bind(&write.model)
			.bind(&write.body_hash)
			.bind(&write.recipe_hash)
			.bind(write.now)
			.execute(&self.db.pool)
			.await?;

			Ok(())
		})
	}

	fn store_snapshot_embedding<'a>(
		&'a self,
		snapshot: &'a PageSnapshot,
		write: &'a EmbeddingWrite,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let mut payload = Payload::new();

			payload.insert("document_id", snapshot.document_id.to_string());
			payload.insert("url", snapshot.url.clone());

			let mut vectors = HashMap::new();

			vectors
				.insert(BODY_VECTOR_NAME.to_string(), Vector::from(write.body_vector.clone()));

			let point = PointStruct::new(snapshot.id.to_string(), vectors, payload);

			self.qdrant
				.client
				.upsert_points(
					UpsertPointsBuilder::new(self.qdrant.snapshot_collection.clone(), vec![
						point,
					])
					.wait(true),
				)
				.await
				.map_err(|err| Error::Qdrant { message: err.to_string() })?;

			sqlx::query(
				"\
UPDATE page_snapshots
SET embedding_model = $2,
	embedding_hash = $3,
	embedded_at = $4,
	embedding_checked_at = $4
WHERE id = $1",
			)
			.bind(snapshot.id)
			.bind(&write.model)
			.bind(&write.body_hash)
			.bind(write.now)
			.execute(&self.db.pool)
			.await?;

			Ok(())
		})
	}

	fn documents_missing_ingredient_tokens<'a>(
		&'a self,
		limit: u32,
	) -> BoxFuture<'a, Result<Vec<Document>>> {
		Box::pin(async move {
			let docs = sqlx::query_as::<_, Document>(&format!(
				"\
SELECT {DOCUMENT_COLUMNS} FROM documents
WHERE kind = 'recipe'
	AND cardinality(ingredient_tokens) = 0
	AND cardinality(ingredients) > 0
ORDER BY id
LIMIT $1"
			))
			.bind(limit as i64)
			.fetch_all(&self.db.pool)
			.await?;

			Ok(docs)
		})
	}

	fn write_ingredient_tokens<'a>(
		&'a self,
		id: Uuid,
		tokens: &'a [String],
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			sqlx::query("UPDATE documents SET ingredient_tokens = $2 WHERE id = $1")
				.bind(id)
				.bind(tokens.to_vec())
				.execute(&self.db.pool)
				.await?;

			Ok(())
		})
	}

	fn documents_with_cook_data<'a>(&'a self, limit: u32) -> BoxFuture<'a, Result<Vec<Document>>> {
		Box::pin(async move {
			let docs = sqlx::query_as::<_, Document>(&format!(
				"\
SELECT {DOCUMENT_COLUMNS} FROM documents
WHERE jsonb_array_length(cooked_history) > 0
ORDER BY id
LIMIT $1"
			))
			.bind(limit as i64)
			.fetch_all(&self.db.pool)
			.await?;

			Ok(docs)
		})
	}

	fn write_cooked_rollup<'a>(
		&'a self,
		id: Uuid,
		last_cooked_at: Option<OffsetDateTime>,
		avg_rating: Option<f32>,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			sqlx::query(
				"UPDATE documents SET last_cooked_at = $2, avg_rating = $3 WHERE id = $1",
			)
			.bind(id)
			.bind(last_cooked_at)
			.bind(avg_rating)
			.execute(&self.db.pool)
			.await?;

			Ok(())
		})
	}
}

fn push_prefilter_sql(builder: &mut QueryBuilder<'_, Postgres>, filter: &PreFilter) {
	if !filter.kinds.is_empty() {
		builder.push(" AND kind = ANY(");
		builder.push_bind(filter.kinds.clone());
		builder.push(")");
	}
	if let Some(subject_id) = filter.subject_id {
		builder.push(" AND subject_id = ");
		builder.push_bind(subject_id);
	}
	if let Some(label) = &filter.subject_label {
		builder.push(" AND lower(subject_label) = lower(");
		builder.push_bind(label.clone());
		builder.push(")");
	}
	if let Some(topic_id) = filter.topic_id {
		builder.push(" AND topic_id = ");
		builder.push_bind(topic_id);
	}
	if let Some(label) = &filter.topic_label {
		builder.push(" AND lower(topic_label) = lower(");
		builder.push_bind(label.clone());
		builder.push(")");
	}
	if !filter.tags.is_empty() {
		builder.push(" AND tags @> ");
		builder.push_bind(filter.tags.clone());
	}
	if let Some(imported) = filter.imported {
		builder.push(" AND imported = ");
		builder.push_bind(imported);
	}
	if let Some(after) = filter.updated_after {
		builder.push(" AND updated_at >= ");
		builder.push_bind(after);
	}
	if let Some(before) = filter.updated_before {
		builder.push(" AND updated_at <= ");
		builder.push_bind(before);
	}
}

fn qdrant_prefilter(filter: &PreFilter) -> Filter {
	let mut must = Vec::new();

	if !filter.kinds.is_empty() {
		must.push(Condition::matches("kind", filter.kinds.clone()));
	}
	if let Some(subject_id) = filter.subject_id {
		must.push(Condition::matches("subject_id", subject_id.to_string()));
	}
	if let Some(label) = &filter.subject_label {
		must.push(Condition::matches("subject_label", label.to_lowercase()));
	}
	if let Some(topic_id) = filter.topic_id {
		must.push(Condition::matches("topic_id", topic_id.to_string()));
	}
	if let Some(label) = &filter.topic_label {
		must.push(Condition::matches("topic_label", label.to_lowercase()));
	}
	for tag in &filter.tags {
		must.push(Condition::matches("tags", tag.clone()));
	}
	if let Some(imported) = filter.imported {
		must.push(Condition::matches("imported", imported));
	}
	if let Some(condition) = datetime_filter_range(filter.updated_after, filter.updated_before) {
		must.push(condition);
	}

	Filter { must, should: Vec::new(), must_not: Vec::new(), min_should: None }
}

fn datetime_filter_range(
	updated_after: Option<OffsetDateTime>,
	updated_before: Option<OffsetDateTime>,
) -> Option<Condition> {
	let gte = updated_after.map(|after| Timestamp {
		seconds: after.unix_timestamp(),
		nanos: after.nanosecond() as i32,
	});
	let lte = updated_before.map(|before| Timestamp {
		seconds: before.unix_timestamp(),
		nanos: before.nanosecond() as i32,
	});

	if gte.is_none() && lte.is_none() {
		return None;
	}

	Some(Condition::datetime_range("updated_at", DatetimeRange { lt: None, gt: None, gte, lte }))
}

fn document_payload(doc: &Document) -> Result<Payload> {
	let mut payload = Payload::new();

	payload.insert("kind", doc.kind.clone());

	// Absent attributes stay out of the payload; a filter on them then
	// matches nothing, same as the SQL rendering.
	if let Some(subject_id) = doc.subject_id {
		payload.insert("subject_id", subject_id.to_string());
	}
	if let Some(label) = doc.subject_label.as_deref() {
		payload.insert("subject_label", label.to_lowercase());
	}
	if let Some(topic_id) = doc.topic_id {
		payload.insert("topic_id", topic_id.to_string());
	}
	if let Some(label) = doc.topic_label.as_deref() {
		payload.insert("topic_label", label.to_lowercase());
	}

	payload.insert(
		"tags",
		qdrant_client::qdrant::Value::from(
			doc.tags
				.iter()
				.map(|tag| qdrant_client::qdrant::Value::from(tag.clone()))
				.collect::<Vec<_>>(),
		),
	);
	payload.insert("imported", doc.imported);
	payload.insert("updated_at", format_timestamp(doc.updated_at)?);

	Ok(payload)
}

fn format_timestamp(ts: OffsetDateTime) -> Result<String> {
	ts.format(&Rfc3339)
		.map_err(|err| Error::Storage { message: format!("Timestamp format failed: {err}") })
}

fn point_uuid(point_id: &PointId) -> Option<Uuid> {
	match &point_id.point_id_options {
		Some(PointIdOptions::Uuid(id)) => Uuid::parse_str(id).ok(),
		_ => None,
	}
}

fn payload_uuid(point: &ScoredPoint, key: &str) -> Option<Uuid> {
	match point.payload.get(key).and_then(|value| value.kind.as_ref()) {
		Some(Kind::StringValue(raw)) => Uuid::parse_str(raw).ok(),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use qdrant_client::qdrant::{condition::ConditionOneOf, r#match::MatchValue};

	use super::*;

	#[test]
	fn prefilter_renders_every_constraint() {
		let filter = PreFilter {
			kinds: vec!["recipe".to_string()],
			subject_id: Some(Uuid::new_v4()),
			subject_label: Some("Dinners".to_string()),
			topic_id: None,
			topic_label: None,
			tags: vec!["weeknight".to_string(), "quick".to_string()],
			imported: Some(false),
			updated_after: Some(OffsetDateTime::now_utc()),
			updated_before: None,
		};
		let rendered = qdrant_prefilter(&filter);

		// kind + subject_id + subject_label + two tags + imported + range.
		assert_eq!(rendered.must.len(), 7);

		let labels: Vec<String> = rendered
			.must
			.iter()
			.filter_map(|condition| match &condition.condition_one_of {
				Some(ConditionOneOf::Field(field)) => {
					let value = field.r#match.as_ref()?.match_value.as_ref()?;

					match value {
						MatchValue::Keyword(keyword) if field.key == "subject_label" =>
							Some(keyword.clone()),
						_ => None,
					}
				},
				_ => None,
			})
			.collect();

		assert_eq!(labels, vec!["dinners".to_string()], "labels must be folded to lowercase");
	}

	#[test]
	fn point_uuid_rejects_numeric_ids() {
		let id = Uuid::new_v4();
		let uuid_point = PointId { point_id_options: Some(PointIdOptions::Uuid(id.to_string())) };
		let numeric_point = PointId { point_id_options: Some(PointIdOptions::Num(7)) };

		assert_eq!(point_uuid(&uuid_point), Some(id));
		assert_eq!(point_uuid(&numeric_point), None);
	}
}
