//! Weighted reciprocal-rank fusion.
//!
//! Rank r (0-based) in channel c contributes `w_c / (k + r + 1)` to the
//! fused score of its id. Rank-based fusion keeps incomparable channel
//! scores (ts_rank_cd vs cosine similarity) from leaking into each other.

use std::collections::HashMap;

use uuid::Uuid;

use crate::ChannelHit;

pub const CHANNEL_KEYWORD: &str = "keyword";
pub const CHANNEL_SEMANTIC: &str = "semantic";
pub const CHANNEL_INGREDIENT: &str = "ingredient";
pub const CHANNEL_SNAPSHOT_KEYWORD: &str = "snapshotKeyword";
pub const CHANNEL_SNAPSHOT_SEMANTIC: &str = "snapshotSemantic";

pub const DOCUMENT_CHANNEL_WEIGHT: f32 = 1.0;

/// One channel's ordered candidates, best first.
#[derive(Debug)]
pub struct ChannelRanking {
	pub channel: &'static str,
	pub weight: f32,
	pub hits: Vec<ChannelHit>,
}

#[derive(Debug, Clone)]
pub struct FusedHit {
	pub id: Uuid,
	pub score: f32,
	/// Best raw score any contributing channel reported.
	pub best_channel_score: f32,
	pub channels: Vec<&'static str>,
}

/// Fuse channel rankings into one ordered candidate list. Ties in fused
/// score break by best raw channel score, then by first-seen order, so the
/// output is deterministic for identical inputs.
pub fn fuse(rankings: &[ChannelRanking], k: u32) -> Vec<FusedHit> {
	let mut order: Vec<FusedHit> = Vec::new();
	let mut by_id: HashMap<Uuid, usize> = HashMap::new();

	for ranking in rankings {
		// A weightless channel must not even nominate candidates.
		if ranking.weight <= 0.0 {
			continue;
		}

		for (rank, hit) in ranking.hits.iter().enumerate() {
			let contribution = ranking.weight / (k as f32 + rank as f32 + 1.0);
			let slot = *by_id.entry(hit.id).or_insert_with(|| {
				order.push(FusedHit {
					id: hit.id,
					score: 0.0,
					best_channel_score: f32::MIN,
					channels: Vec::new(),
				});

				order.len() - 1
			});
			let fused = &mut order[slot];

			fused.score += contribution;
			fused.best_channel_score = fused.best_channel_score.max(hit.score);

			if !fused.channels.contains(&ranking.channel) {
				fused.channels.push(ranking.channel);
			}
		}
	}

	let mut indexed: Vec<(usize, FusedHit)> = order.into_iter().enumerate().collect();

	indexed.sort_by(|(left_seen, left), (right_seen, right)| {
		right
			.score
			.total_cmp(&left.score)
			.then(right.best_channel_score.total_cmp(&left.best_channel_score))
			.then(left_seen.cmp(right_seen))
	});

	indexed.into_iter().map(|(_, hit)| hit).collect()
}
