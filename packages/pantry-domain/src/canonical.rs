//! Ingredient and keyword phrase canonicalization.
//!
//! The same normalization runs at index time and at query time so canonical
//! tokens compare exactly. A phrase that reduces to nothing (pure units or
//! descriptors, e.g. "for serving") yields no tokens; callers treat an empty
//! token set as "no constraint".

/// Measurement and quantity words stripped from phrases before tokenization.
const UNIT_WORDS: &[&str] = &[
	"cup", "cups", "tablespoon", "tablespoons", "tbsp", "tbsps", "teaspoon", "teaspoons", "tsp",
	"tsps", "ounce", "ounces", "oz", "pound", "pounds", "lb", "lbs", "gram", "grams", "kilogram",
	"kilograms", "kg", "milliliter", "milliliters", "ml", "liter", "liters", "litre", "litres",
	"pinch", "pinches", "dash", "dashes", "clove", "cloves", "slice", "slices", "piece", "pieces",
	"can", "cans", "jar", "jars", "stick", "sticks", "bunch", "bunches", "handful", "handfuls",
	"package", "packages", "pkg", "quart", "quarts", "pint", "pints", "gallon", "gallons",
];

/// Preparation words that carry no ingredient identity and are dropped outright.
const DESCRIPTOR_WORDS: &[&str] = &[
	"fresh", "freshly", "chopped", "minced", "diced", "sliced", "grated", "shredded", "crushed",
	"peeled", "seeded", "trimmed", "halved", "quartered", "cubed", "melted", "softened", "beaten",
	"divided", "optional", "large", "medium", "small", "extra", "finely", "coarsely", "thinly",
	"roughly", "lightly", "about", "approximately", "plus", "more", "taste", "serving", "garnish",
	"needed", "room", "temperature", "for", "to", "of", "and", "or", "the", "a", "an", "with",
	"into", "each", "your",
];

/// Modifiers kept inside the canonical phrase but never emitted as standalone
/// tokens; "dried oregano" must not also match a bare "dried".
const MODIFIER_WORDS: &[&str] = &[
	"dried", "ground", "smoked", "roasted", "toasted", "raw", "whole", "baby", "frozen", "canned",
	"cooked", "unsalted", "salted", "sweet", "hot", "mild", "dark", "light", "white", "red",
	"green", "yellow", "black", "brown",
];

/// Per-word spelling folds applied after singularization.
const WORD_SYNONYMS: &[(&str, &str)] = &[
	("aubergine", "eggplant"),
	("courgette", "zucchini"),
	("capsicum", "pepper"),
	("coriander", "cilantro"),
	("garbanzo", "chickpea"),
	("scallion", "green onion"),
	("beetroot", "beet"),
	("rocket", "arugula"),
	("chilli", "chili"),
	("chile", "chili"),
	("yoghurt", "yogurt"),
];

/// Whole-phrase folds applied to the rejoined phrase.
const PHRASE_SYNONYMS: &[(&str, &str)] = &[
	("green onion", "scallion"),
	("spring onion", "scallion"),
	("corn starch", "cornstarch"),
	("all purpose flour", "flour"),
	("plain flour", "flour"),
	("confectioners sugar", "powdered sugar"),
	("icing sugar", "powdered sugar"),
	("bell pepper", "pepper"),
	("extra virgin olive oil", "olive oil"),
];

/// Produce the canonical token set for a raw ingredient or keyword phrase.
///
/// Output order is deterministic: the canonical phrase first, then each
/// surviving word of a multi-word phrase. Duplicates are removed. Returns an
/// empty vector when the phrase reduces to nothing.
pub fn canonical_tokens(raw: &str) -> Vec<String> {
	let words = canonical_words(raw);

	if words.is_empty() {
		return Vec::new();
	}

	let phrase = fold_phrase(&words.join(" "));
	let mut tokens = vec![phrase.clone()];

	if words.len() > 1 {
		for word in &words {
			if word.chars().count() < 3 {
				continue;
			}
			if MODIFIER_WORDS.contains(&word.as_str()) {
				continue;
			}
			if !tokens.contains(word) {
				tokens.push(word.clone());
			}
		}

		// The folded phrase may itself be multi-word ("green onion" ->
		// "scallion" is not); re-expose its words when folding changed them.
		for word in phrase.split_whitespace() {
			let word = word.to_string();

			if word.chars().count() >= 3
				&& !MODIFIER_WORDS.contains(&word.as_str())
				&& !tokens.contains(&word)
			{
				tokens.push(word);
			}
		}
	}

	tokens
}

/// Canonicalize a phrase down to its single phrase token, if any.
pub fn canonical_phrase(raw: &str) -> Option<String> {
	let words = canonical_words(raw);

	if words.is_empty() { None } else { Some(fold_phrase(&words.join(" "))) }
}

fn canonical_words(raw: &str) -> Vec<String> {
	let mut normalized = String::with_capacity(raw.len());

	for ch in raw.chars() {
		if ch.is_alphanumeric() {
			normalized.extend(ch.to_lowercase());
		} else {
			normalized.push(' ');
		}
	}

	let mut words = Vec::new();

	for word in normalized.split_whitespace() {
		if word.chars().all(|ch| ch.is_ascii_digit()) {
			continue;
		}
		if UNIT_WORDS.contains(&word) || DESCRIPTOR_WORDS.contains(&word) {
			continue;
		}

		let singular = singularize(word);
		let folded = fold_word(&singular);

		for part in folded.split_whitespace() {
			words.push(part.to_string());
		}
	}

	words
}

/// Length-guarded suffix stripping; short words are left alone so "gas" or
/// "its" never lose their trailing "s".
fn singularize(word: &str) -> String {
	let len = word.len();

	if len > 4 && word.ends_with("ies") {
		return format!("{}y", &word[..len - 3]);
	}
	if len > 4
		&& ["ches", "shes", "sses", "xes", "zes", "oes"].iter().any(|suffix| word.ends_with(suffix))
	{
		return word[..len - 2].to_string();
	}
	if len > 3 && word.ends_with('s') && !word.ends_with("ss") && !word.ends_with("us") && !word.ends_with("is") {
		return word[..len - 1].to_string();
	}

	word.to_string()
}

fn fold_word(word: &str) -> String {
	for (from, to) in WORD_SYNONYMS {
		if word == *from {
			return (*to).to_string();
		}
	}

	word.to_string()
}

fn fold_phrase(phrase: &str) -> String {
	for (from, to) in PHRASE_SYNONYMS {
		if phrase == *from {
			return (*to).to_string();
		}
	}

	phrase.to_string()
}
