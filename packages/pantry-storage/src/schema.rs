//! Catalog DDL. Vectors live in Qdrant; Postgres keeps the documents, their
//! imported page snapshots, and per-row embedding bookkeeping.
//!
//! `cooked_count` predates `cooked_history` and still holds the only cook
//! data for rows the migration never touched. Filters must consult both.

pub const SCHEMA_SQL: &str = "\
CREATE TABLE IF NOT EXISTS documents (
	id                   UUID PRIMARY KEY,
	kind                 TEXT NOT NULL CHECK (kind IN ('recipe', 'note')),
	title                TEXT NOT NULL,
	body                 TEXT NOT NULL,
	subject_id           UUID,
	subject_label        TEXT,
	topic_id             UUID,
	topic_label          TEXT,
	tags                 TEXT[] NOT NULL DEFAULT '{}',
	ingredients          TEXT[] NOT NULL DEFAULT '{}',
	ingredient_tokens    TEXT[] NOT NULL DEFAULT '{}',
	imported             BOOLEAN NOT NULL DEFAULT FALSE,
	cooked_count         INTEGER,
	cooked_history       JSONB NOT NULL DEFAULT '[]',
	last_cooked_at       TIMESTAMPTZ,
	avg_rating           REAL,
	embedding_model      TEXT,
	embedding_hash       TEXT,
	recipe_embedding_hash TEXT,
	embedded_at          TIMESTAMPTZ,
	embedding_checked_at TIMESTAMPTZ,
	created_at           TIMESTAMPTZ NOT NULL DEFAULT now(),
	updated_at           TIMESTAMPTZ NOT NULL DEFAULT now(),
	search_tsv           TSVECTOR GENERATED ALWAYS AS (
		setweight(to_tsvector('english', coalesce(title, '')), 'A')
			|| setweight(to_tsvector('english', coalesce(body, '')), 'B')
	) STORED
);

CREATE INDEX IF NOT EXISTS idx_documents_search_tsv
	ON documents USING GIN (search_tsv);

CREATE INDEX IF NOT EXISTS idx_documents_ingredient_tokens
	ON documents USING GIN (ingredient_tokens);

CREATE INDEX IF NOT EXISTS idx_documents_tags
	ON documents USING GIN (tags);

CREATE INDEX IF NOT EXISTS idx_documents_kind
	ON documents (kind);

CREATE INDEX IF NOT EXISTS idx_documents_embedding_stale
	ON documents (id)
	WHERE embedding_hash IS NULL
		OR (embedded_at < updated_at
			AND (embedding_checked_at IS NULL OR embedding_checked_at < updated_at));

CREATE TABLE IF NOT EXISTS page_snapshots (
	id                   UUID PRIMARY KEY,
	document_id          UUID NOT NULL REFERENCES documents (id) ON DELETE CASCADE,
	url                  TEXT NOT NULL,
	fetch_status         TEXT NOT NULL DEFAULT 'ok',
	fetched_at           TIMESTAMPTZ NOT NULL,
	content              TEXT NOT NULL,
	content_hash         TEXT NOT NULL,
	embedding_model      TEXT,
	embedding_hash       TEXT,
	embedded_at          TIMESTAMPTZ,
	embedding_checked_at TIMESTAMPTZ,
	created_at           TIMESTAMPTZ NOT NULL DEFAULT now(),
	search_tsv           TSVECTOR GENERATED ALWAYS AS (
		to_tsvector('english', coalesce(content, ''))
	) STORED
);

CREATE INDEX IF NOT EXISTS idx_page_snapshots_search_tsv
	ON page_snapshots USING GIN (search_tsv);

CREATE INDEX IF NOT EXISTS idx_page_snapshots_document_id
	ON page_snapshots (document_id);
";

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn statements_split_cleanly() {
		let statements: Vec<&str> = SCHEMA_SQL
			.split(';')
			.map(str::trim)
			.filter(|statement| !statement.is_empty())
			.collect();

		assert!(statements.len() >= 8);
		assert!(statements.iter().all(|statement| {
			statement.starts_with("CREATE TABLE") || statement.starts_with("CREATE INDEX")
		}));
	}
}
