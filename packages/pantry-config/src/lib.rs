mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Config, EmbeddingProviderConfig, Freshness, Postgres, Providers, Qdrant, Search, Security,
	Service, Storage,
};

use std::{fs, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	for (label, value) in [
		("service.http_bind", &cfg.service.http_bind),
		("service.admin_bind", &cfg.service.admin_bind),
		("storage.postgres.dsn", &cfg.storage.postgres.dsn),
		("storage.qdrant.url", &cfg.storage.qdrant.url),
		("storage.qdrant.document_collection", &cfg.storage.qdrant.document_collection),
		("storage.qdrant.snapshot_collection", &cfg.storage.qdrant.snapshot_collection),
		("providers.embedding.api_key", &cfg.providers.embedding.api_key),
		("providers.embedding.model", &cfg.providers.embedding.model),
	] {
		if value.trim().is_empty() {
			return Err(Error::Validation { message: format!("{label} must be non-empty.") });
		}
	}

	if cfg.storage.postgres.pool_max_conns == 0 {
		return Err(Error::Validation {
			message: "storage.postgres.pool_max_conns must be greater than zero.".to_string(),
		});
	}
	if cfg.storage.qdrant.document_collection == cfg.storage.qdrant.snapshot_collection {
		return Err(Error::Validation {
			message: "storage.qdrant collections must have distinct names.".to_string(),
		});
	}
	if cfg.providers.embedding.dimensions == 0 {
		return Err(Error::Validation {
			message: "providers.embedding.dimensions must be greater than zero.".to_string(),
		});
	}
	if cfg.providers.embedding.dimensions != cfg.storage.qdrant.vector_dim {
		return Err(Error::Validation {
			message: "providers.embedding.dimensions must match storage.qdrant.vector_dim."
				.to_string(),
		});
	}
	if cfg.providers.embedding.timeout_ms == 0 {
		return Err(Error::Validation {
			message: "providers.embedding.timeout_ms must be greater than zero.".to_string(),
		});
	}
	if cfg.search.rrf_k == 0 {
		return Err(Error::Validation {
			message: "search.rrf_k must be greater than zero.".to_string(),
		});
	}
	if !cfg.search.snapshot_weight.is_finite()
		|| !(0.0..=1.0).contains(&cfg.search.snapshot_weight)
	{
		return Err(Error::Validation {
			message: "search.snapshot_weight must be in the range 0.0-1.0.".to_string(),
		});
	}
	if cfg.search.max_limit == 0 {
		return Err(Error::Validation {
			message: "search.max_limit must be greater than zero.".to_string(),
		});
	}
	if !cfg.search.min_similarity.is_finite()
		|| !(0.0..=1.0).contains(&cfg.search.min_similarity)
	{
		return Err(Error::Validation {
			message: "search.min_similarity must be in the range 0.0-1.0.".to_string(),
		});
	}
	if cfg.search.channel_timeout_ms == 0 {
		return Err(Error::Validation {
			message: "search.channel_timeout_ms must be greater than zero.".to_string(),
		});
	}
	if cfg.search.snippet_chars == 0 {
		return Err(Error::Validation {
			message: "search.snippet_chars must be greater than zero.".to_string(),
		});
	}
	if cfg.freshness.batch_size == 0 {
		return Err(Error::Validation {
			message: "freshness.batch_size must be greater than zero.".to_string(),
		});
	}
	if cfg.freshness.max_chars == 0 {
		return Err(Error::Validation {
			message: "freshness.max_chars must be greater than zero.".to_string(),
		});
	}
	if cfg.freshness.poll_interval_secs == 0 {
		return Err(Error::Validation {
			message: "freshness.poll_interval_secs must be greater than zero.".to_string(),
		});
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	if cfg
		.security
		.admin_auth_token
		.as_deref()
		.map(|token| token.trim().is_empty())
		.unwrap_or(false)
	{
		cfg.security.admin_auth_token = None;
	}
}
