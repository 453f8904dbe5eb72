use std::time::Duration;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Unauthorized: {message}")]
	Unauthorized { message: String },
	#[error("Embedding provider rate limit hit.")]
	RateLimited { retry_after: Option<Duration> },
	#[error("Provider error: {message}")]
	Provider { message: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
	#[error("Qdrant error: {message}")]
	Qdrant { message: String },
}
impl From<sqlx::Error> for Error {
	fn from(err: sqlx::Error) -> Self {
		Self::Storage { message: err.to_string() }
	}
}
impl From<pantry_storage::Error> for Error {
	fn from(err: pantry_storage::Error) -> Self {
		match err {
			pantry_storage::Error::Sqlx(inner) => Self::Storage { message: inner.to_string() },
			pantry_storage::Error::InvalidArgument(message) => Self::InvalidRequest { message },
			pantry_storage::Error::NotFound(message) => Self::Storage { message },
			pantry_storage::Error::Qdrant(inner) => Self::Qdrant { message: inner.to_string() },
		}
	}
}
impl From<pantry_providers::Error> for Error {
	fn from(err: pantry_providers::Error) -> Self {
		match err {
			pantry_providers::Error::RateLimited { retry_after } => Self::RateLimited { retry_after },
			other => Self::Provider { message: other.to_string() },
		}
	}
}
