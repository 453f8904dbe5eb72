use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use pantry_service::{PantryService, ProviderEmbedder, index::CatalogIndex};
use pantry_storage::{db::Db, qdrant::QdrantStore};

pub mod worker;

#[derive(Debug, Parser)]
#[command(
	version = pantry_cli::VERSION,
	rename_all = "kebab",
	styles = pantry_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: std::path::PathBuf,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = pantry_config::load(&args.config)?;
	let filter = EnvFilter::try_new(&config.service.log_level)
		.unwrap_or_else(|_| EnvFilter::new("info"));
	tracing_subscriber::fmt().with_env_filter(filter).init();

	let db = Db::connect(&config.storage.postgres).await?;

	db.ensure_schema().await?;

	let qdrant = QdrantStore::new(&config.storage.qdrant)?;

	qdrant.ensure_collections().await?;

	let embedder = ProviderEmbedder { cfg: config.providers.embedding.clone() };
	let service = PantryService {
		cfg: config,
		index: Arc::new(CatalogIndex::new(db, qdrant)),
		embedder: Arc::new(embedder),
	};

	worker::run_worker(service).await
}
