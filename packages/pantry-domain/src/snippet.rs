//! Bounded result previews.

/// Produce a preview of `body` at most `max_chars` characters long, centered
/// on the first case-insensitive occurrence of any of `terms`. Falls back to
/// the head of the body when nothing matches. Ellipses mark truncated edges.
pub fn extract_snippet(body: &str, terms: &[String], max_chars: usize) -> String {
	let trimmed = body.trim();

	if trimmed.is_empty() || max_chars == 0 {
		return String::new();
	}

	let chars: Vec<char> = trimmed.chars().collect();

	if chars.len() <= max_chars {
		return trimmed.to_string();
	}

	let match_at = first_match(&chars, terms);
	let window = window_around(match_at, chars.len(), max_chars);
	let mut out = String::with_capacity(max_chars + 2);

	if window.start > 0 {
		out.push('\u{2026}');
	}

	out.extend(&chars[window.clone()]);

	if window.end < chars.len() {
		out.push('\u{2026}');
	}

	out
}

fn first_match(chars: &[char], terms: &[String]) -> Option<usize> {
	let lowered: String = chars.iter().flat_map(|ch| ch.to_lowercase()).collect();
	let mut best: Option<usize> = None;

	for term in terms {
		let needle = term.to_lowercase();

		if needle.is_empty() {
			continue;
		}
		if let Some(byte_idx) = lowered.find(&needle) {
			let char_idx = lowered[..byte_idx].chars().count();

			if best.map(|current| char_idx < current).unwrap_or(true) {
				best = Some(char_idx);
			}
		}
	}

	best
}

fn window_around(
	match_at: Option<usize>,
	total: usize,
	max_chars: usize,
) -> std::ops::Range<usize> {
	let center = match match_at {
		Some(idx) => idx,
		None => return 0..max_chars.min(total),
	};
	let half = max_chars / 2;
	let start = center.saturating_sub(half);
	let end = (start + max_chars).min(total);
	let start = end.saturating_sub(max_chars);

	start..end
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn short_body_passes_through() {
		assert_eq!(extract_snippet("A short note.", &["short".to_string()], 80), "A short note.");
	}

	#[test]
	fn centers_on_first_matched_term() {
		let body = format!("{}simmer the broth gently{}", "x".repeat(300), "y".repeat(300));
		let snippet = extract_snippet(&body, &["broth".to_string()], 60);

		assert!(snippet.contains("broth"));
		assert!(snippet.starts_with('\u{2026}'));
		assert!(snippet.ends_with('\u{2026}'));
		assert!(snippet.chars().count() <= 62);
	}

	#[test]
	fn falls_back_to_head_without_match() {
		let body = "a".repeat(500);
		let snippet = extract_snippet(&body, &["zucchini".to_string()], 50);

		assert_eq!(snippet.chars().count(), 51);
		assert!(snippet.ends_with('\u{2026}'));
	}

	#[test]
	fn match_is_case_insensitive() {
		let body = format!("{}Chicken Soup rules{}", "pad ".repeat(100), " pad".repeat(100));
		let snippet = extract_snippet(&body, &["chicken".to_string()], 40);

		assert!(snippet.contains("Chicken"));
	}

	#[test]
	fn handles_multibyte_text() {
		let body = "héllo ".repeat(100);
		let snippet = extract_snippet(&body, &["héllo".to_string()], 30);

		assert!(snippet.chars().count() <= 32);
	}
}
