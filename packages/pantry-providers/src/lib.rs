pub mod embedding;
mod error;

pub use error::{Error, Result};

use reqwest::header::{AUTHORIZATION, HeaderMap};

pub fn auth_headers(api_key: &str) -> Result<HeaderMap> {
	let mut headers = HeaderMap::new();

	headers.insert(AUTHORIZATION, format!("Bearer {api_key}").parse()?);

	Ok(headers)
}
