//! Free-text query parsing.
//!
//! Splits raw query text into quoted phrases, must/any/not term sets, and an
//! explicit-OR flag, then renders a keyword search plan in
//! `websearch_to_tsquery` syntax. `field:value` operators are stripped by
//! [`extract_operators`] before parsing.

// crates.io
use serde::Serialize;

/// Structured operators pulled out of raw query text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractedOperators {
	pub subject: Option<String>,
	pub topic: Option<String>,
	pub tags: Vec<String>,
	pub imported: Option<bool>,
	/// The query text with all recognized operators removed.
	pub remainder: String,
}

/// Strip `subject:`, `topic:`, `tag:`, and `imported:` operators from raw
/// text. Values may be bare (`tag:dinner`) or quoted (`subject:"meal prep"`).
/// Unrecognized `field:` prefixes are left in place as ordinary text.
pub fn extract_operators(raw: &str) -> ExtractedOperators {
	let mut out = ExtractedOperators::default();
	let mut remainder = String::with_capacity(raw.len());
	let mut rest = raw;
	let mut at_word_start = true;

	while !rest.is_empty() {
		let operator = if at_word_start { leading_operator(rest) } else { None };
		let Some((field, after_colon)) = operator else {
			let ch = rest.chars().next().expect("non-empty remainder");

			remainder.push(ch);
			at_word_start = ch.is_whitespace();
			rest = &rest[ch.len_utf8()..];

			continue;
		};
		let (value, after_value) = take_operator_value(after_colon);

		if value.is_empty() {
			remainder.push_str(&rest[..rest.len() - after_colon.len()]);
			at_word_start = false;
			rest = after_colon;

			continue;
		}

		match field {
			"subject" => out.subject = Some(value),
			"topic" => out.topic = Some(value),
			"tag" => out.tags.push(value),
			"imported" => out.imported = parse_bool(&value),
			_ => unreachable!("leading_operator only yields known fields"),
		}

		at_word_start = false;
		rest = after_value;
	}

	out.remainder = remainder.split_whitespace().collect::<Vec<_>>().join(" ");

	out
}

fn leading_operator(text: &str) -> Option<(&'static str, &str)> {
	// Operators only count at a word boundary.
	if !text
		.as_bytes()
		.first()
		.map(|byte| byte.is_ascii_alphabetic())
		.unwrap_or(false)
	{
		return None;
	}

	for field in ["subject", "topic", "tag", "imported"] {
		if let Some(after) = text.strip_prefix(field)
			&& let Some(after_colon) = after.strip_prefix(':')
		{
			return Some((field, after_colon));
		}
	}

	None
}

fn take_operator_value(text: &str) -> (String, &str) {
	if let Some(quoted) = text.strip_prefix('"') {
		match quoted.find('"') {
			Some(end) => return (quoted[..end].trim().to_string(), &quoted[end + 1..]),
			None => return (quoted.trim().to_string(), ""),
		}
	}

	let end = text.find(char::is_whitespace).unwrap_or(text.len());

	(text[..end].to_string(), &text[end..])
}

fn parse_bool(value: &str) -> Option<bool> {
	match value.to_ascii_lowercase().as_str() {
		"true" | "yes" | "1" => Some(true),
		"false" | "no" | "0" => Some(false),
		_ => None,
	}
}

/// A parsed free-text query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParsedQuery {
	pub phrases: Vec<String>,
	pub must: Vec<String>,
	pub any: Vec<String>,
	pub not: Vec<String>,
	/// All non-negated bare terms in original order.
	pub terms: Vec<String>,
	pub explicit_or: bool,
}

impl ParsedQuery {
	pub fn is_empty(&self) -> bool {
		self.phrases.is_empty() && self.must.is_empty() && self.any.is_empty()
	}
}

/// Parse operator-free query text into phrase and term sets.
///
/// `"exact phrase"` segments become phrases, `-term` negates, and a bare
/// `OR` between terms moves its neighbors into the any-group and sets the
/// explicit-OR flag.
pub fn parse_query(text: &str) -> ParsedQuery {
	let mut parsed = ParsedQuery::default();
	let tokens = tokenize(text);
	let mut index = 0;

	while index < tokens.len() {
		let token = &tokens[index];
		let followed_by_or = tokens.get(index + 1).map(|next| is_or(next)).unwrap_or(false);

		match token {
			Token::Phrase(phrase) => {
				if !phrase.is_empty() {
					parsed.phrases.push(phrase.clone());
				}
			},
			Token::Negated(term) => {
				if !term.is_empty() {
					parsed.not.push(term.clone());
				}
			},
			Token::Word(word) if is_or(token) && word == "OR" => {
				// Handled by neighbors; a dangling OR is ignored.
			},
			Token::Word(word) => {
				parsed.terms.push(word.clone());

				let preceded_by_or =
					index > 0 && tokens.get(index - 1).map(|prev| is_or(prev)).unwrap_or(false);

				if followed_by_or || preceded_by_or {
					parsed.any.push(word.clone());
					parsed.explicit_or = true;
				} else {
					parsed.must.push(word.clone());
				}
			},
		}

		index += 1;
	}

	parsed
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
	Phrase(String),
	Word(String),
	Negated(String),
}

fn is_or(token: &Token) -> bool {
	matches!(token, Token::Word(word) if word == "OR")
}

fn tokenize(text: &str) -> Vec<Token> {
	let mut tokens = Vec::new();
	let mut rest = text.trim();

	while !rest.is_empty() {
		if let Some(after) = rest.strip_prefix('"') {
			let (phrase, remainder) = match after.find('"') {
				Some(end) => (&after[..end], &after[end + 1..]),
				None => (after, ""),
			};

			tokens.push(Token::Phrase(phrase.trim().to_string()));
			rest = remainder.trim_start();

			continue;
		}

		let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
		let word = &rest[..end];

		rest = rest[end..].trim_start();

		if let Some(negated) = word.strip_prefix('-') {
			tokens.push(Token::Negated(negated.to_string()));
		} else if word == "OR" {
			tokens.push(Token::Word("OR".to_string()));
		} else if !word.is_empty() {
			tokens.push(Token::Word(word.to_string()));
		}
	}

	// Filter OR markers that survived as words.
	tokens
		.into_iter()
		.filter(|token| !matches!(token, Token::Word(word) if word.is_empty()))
		.collect()
}

/// A keyword search plan in store-native (`websearch_to_tsquery`) syntax.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum KeywordPlan {
	/// One precise query; no fallback needed.
	Single { query: String },
	/// An implicit-phrase primary with a broader OR fallback. An exact
	/// contiguous match should outrank scattered terms, but the query must
	/// still return results when no contiguous match exists.
	WithFallback { primary: String, fallback: String },
}

impl KeywordPlan {
	pub fn primary(&self) -> &str {
		match self {
			Self::Single { query } => query,
			Self::WithFallback { primary, .. } => primary,
		}
	}

	pub fn fallback(&self) -> Option<&str> {
		match self {
			Self::Single { .. } => None,
			Self::WithFallback { fallback, .. } => Some(fallback),
		}
	}
}

/// Build the keyword plan for a parsed query. Returns `None` when there is
/// nothing searchable (only negations, or empty input).
pub fn keyword_plan(parsed: &ParsedQuery) -> Option<KeywordPlan> {
	if parsed.is_empty() {
		return None;
	}

	let negations = render_negations(&parsed.not);

	// Precision first: an explicit quoted phrase wins outright.
	if let Some(phrase) = parsed.phrases.first() {
		let query = join_clauses(&format!("\"{phrase}\""), &negations);

		return Some(KeywordPlan::Single { query });
	}

	// Two or more bare terms with no OR and no negations: try them as an
	// implicit contiguous phrase, falling back to a broad OR search.
	if parsed.terms.len() >= 2 && !parsed.explicit_or && parsed.not.is_empty() {
		let primary = format!("\"{}\"", parsed.terms.join(" "));
		let fallback = parsed.terms.join(" OR ");

		return Some(KeywordPlan::WithFallback { primary, fallback });
	}

	let mut clauses = Vec::new();

	if !parsed.must.is_empty() {
		clauses.push(parsed.must.join(" "));
	}
	if !parsed.any.is_empty() {
		clauses.push(parsed.any.join(" OR "));
	}

	let query = join_clauses(&clauses.join(" "), &negations);

	if query.trim().is_empty() { None } else { Some(KeywordPlan::Single { query }) }
}

fn render_negations(not: &[String]) -> String {
	not.iter().map(|term| format!("-{term}")).collect::<Vec<_>>().join(" ")
}

fn join_clauses(base: &str, negations: &str) -> String {
	if negations.is_empty() {
		base.to_string()
	} else if base.is_empty() {
		negations.to_string()
	} else {
		format!("{base} {negations}")
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn extracts_bare_and_quoted_operators() {
		let out = extract_operators("tag:dinner subject:\"meal prep\" chicken soup");

		assert_eq!(out.tags, vec!["dinner".to_string()]);
		assert_eq!(out.subject.as_deref(), Some("meal prep"));
		assert_eq!(out.remainder, "chicken soup");
	}

	#[test]
	fn extracts_imported_flag_and_repeated_tags() {
		let out = extract_operators("imported:true tag:quick tag:weeknight stew");

		assert_eq!(out.imported, Some(true));
		assert_eq!(out.tags, vec!["quick".to_string(), "weeknight".to_string()]);
		assert_eq!(out.remainder, "stew");
	}

	#[test]
	fn unknown_field_prefix_stays_in_text() {
		let out = extract_operators("serves:4 pasta");

		assert_eq!(out.remainder, "serves:4 pasta");
		assert!(out.tags.is_empty());
	}

	#[test]
	fn parses_phrases_terms_and_negations() {
		let parsed = parse_query("\"chicken soup\" hearty -cream");

		assert_eq!(parsed.phrases, vec!["chicken soup".to_string()]);
		assert_eq!(parsed.must, vec!["hearty".to_string()]);
		assert_eq!(parsed.not, vec!["cream".to_string()]);
		assert!(!parsed.explicit_or);
	}

	#[test]
	fn explicit_or_moves_terms_to_any_group() {
		let parsed = parse_query("chicken OR turkey");

		assert_eq!(parsed.any, vec!["chicken".to_string(), "turkey".to_string()]);
		assert!(parsed.must.is_empty());
		assert!(parsed.explicit_or);
	}

	#[test]
	fn quoted_phrase_plan_appends_negations() {
		let parsed = parse_query("\"beef stew\" -mushroom");
		let plan = keyword_plan(&parsed).expect("plan expected");

		assert_eq!(plan.primary(), "\"beef stew\" -mushroom");
		assert!(plan.fallback().is_none());
	}

	#[test]
	fn bare_terms_get_phrase_primary_and_or_fallback() {
		let parsed = parse_query("chicken soup");
		let plan = keyword_plan(&parsed).expect("plan expected");

		assert_eq!(plan.primary(), "\"chicken soup\"");
		assert_eq!(plan.fallback(), Some("chicken OR soup"));
	}

	#[test]
	fn negation_disables_implicit_phrase_fallback() {
		let parsed = parse_query("chicken soup -noodle");
		let plan = keyword_plan(&parsed).expect("plan expected");

		assert_eq!(plan.primary(), "chicken soup -noodle");
		assert!(plan.fallback().is_none());
	}

	#[test]
	fn single_term_is_a_single_plan() {
		let parsed = parse_query("gnocchi");
		let plan = keyword_plan(&parsed).expect("plan expected");

		assert_eq!(plan.primary(), "gnocchi");
		assert!(plan.fallback().is_none());
	}

	#[test]
	fn only_negations_yields_no_plan() {
		let parsed = parse_query("-cilantro");

		assert!(keyword_plan(&parsed).is_none());
	}
}
