pub const BODY_VECTOR_NAME: &str = "body";
pub const RECIPE_VECTOR_NAME: &str = "recipe";

use qdrant_client::qdrant::{
	CreateCollectionBuilder, Distance, VectorParamsBuilder, VectorsConfigBuilder,
};

use crate::Result;

pub struct QdrantStore {
	pub client: qdrant_client::Qdrant,
	pub document_collection: String,
	pub snapshot_collection: String,
	pub vector_dim: u32,
}
impl QdrantStore {
	pub fn new(cfg: &pantry_config::Qdrant) -> Result<Self> {
		let client = qdrant_client::Qdrant::from_url(&cfg.url).build()?;

		Ok(Self {
			client,
			document_collection: cfg.document_collection.clone(),
			snapshot_collection: cfg.snapshot_collection.clone(),
			vector_dim: cfg.vector_dim,
		})
	}

	pub async fn ensure_collections(&self) -> Result<()> {
		if !self.client.collection_exists(&self.document_collection).await? {
			let mut vectors = VectorsConfigBuilder::default();

			vectors.add_named_vector_params(
				BODY_VECTOR_NAME,
				VectorParamsBuilder::new(self.vector_dim as u64, Distance::Cosine),
			);
			vectors.add_named_vector_params(
				RECIPE_VECTOR_NAME,
				VectorParamsBuilder::new(self.vector_dim as u64, Distance::Cosine),
			);

			self.client
				.create_collection(
					CreateCollectionBuilder::new(&self.document_collection)
						.vectors_config(vectors),
				)
				.await?;
		}
		if !self.client.collection_exists(&self.snapshot_collection).await? {
			let mut vectors = VectorsConfigBuilder::default();

			vectors.add_named_vector_params(
				BODY_VECTOR_NAME,
				VectorParamsBuilder::new(self.vector_dim as u64, Distance::Cosine),
			);

			self.client
				.create_collection(
					CreateCollectionBuilder::new(&self.snapshot_collection)
						.vectors_config(vectors),
				)
				.await?;
		}

		Ok(())
	}
}
