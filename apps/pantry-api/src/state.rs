use std::sync::Arc;

use pantry_service::{PantryService, ProviderEmbedder, index::CatalogIndex};
use pantry_storage::{db::Db, qdrant::QdrantStore};

#[derive(Clone)]
pub struct AppState {
	pub service: Arc<PantryService>,
	pub admin_token: Option<String>,
}
impl AppState {
	pub async fn new(config: pantry_config::Config) -> color_eyre::Result<Self> {
		let db = Db::connect(&config.storage.postgres).await?;

		db.ensure_schema().await?;

		let qdrant = QdrantStore::new(&config.storage.qdrant)?;

		qdrant.ensure_collections().await?;

		let admin_token = config.security.admin_auth_token.clone();
		let embedder = ProviderEmbedder { cfg: config.providers.embedding.clone() };
		let service = PantryService {
			cfg: config,
			index: Arc::new(CatalogIndex::new(db, qdrant)),
			embedder: Arc::new(embedder),
		};

		Ok(Self { service: Arc::new(service), admin_token })
	}
}
