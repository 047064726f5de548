// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

// Grouping keys for co-constructed stations.
//
// Operators brand the same interchange differently ("JR Shinjuku Station",
// "Shinjuku", "都営新宿駅"), so the key drops station-type suffixes and operator
// prefixes before folding case, whitespace and punctuation. This is a
// heuristic: two distinct stations with the same generic name ("Central") end up
// in one name group and are only kept apart by the spatial clustering step, and
// brandings missing from the token lists will not collapse.

use std::collections::BTreeMap;

pub const DEFAULT_SUFFIX_TOKENS: &[&str] = &[
    "バスターミナル",
    "停留所",
    "バス停",
    "駅",
    "Bus Terminal",
    "Bus Stop",
    "Station",
    "Sta.",
    "Stop",
];

pub const DEFAULT_PREFIX_TOKENS: &[&str] = &[
    "東京メトロ",
    "都営地下鉄",
    "都営",
    "JR東日本",
    "JR",
    "Tokyo Metro",
    "Toei",
    "Metro",
    "JR East",
];

const STRIPPED_PUNCTUATION: &[char] = &[
    '.', ',', '\'', '"', '-', '_', '/', '(', ')', '[', ']', '&', ':', '・', '･', '‐', '－',
    '（', '）', '「', '」', '〈', '〉', '、', '。', '’', '‘',
];

#[derive(Clone, Debug)]
pub struct NameKeyGenerator {
    locale_order: Vec<String>,
    suffix_tokens: Vec<String>,
    prefix_tokens: Vec<String>,
}

impl Default for NameKeyGenerator {
    fn default() -> Self {
        Self::new(
            vec!["ja".to_string(), "en".to_string()],
            DEFAULT_SUFFIX_TOKENS.iter().map(|s| s.to_string()).collect(),
            DEFAULT_PREFIX_TOKENS.iter().map(|s| s.to_string()).collect(),
        )
    }
}

impl NameKeyGenerator {
    pub fn new(
        locale_order: Vec<String>,
        mut suffix_tokens: Vec<String>,
        mut prefix_tokens: Vec<String>,
    ) -> Self {
        // longest token first so "JR東日本" is not cut down to "東日本"
        suffix_tokens.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()));
        prefix_tokens.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()));

        Self {
            locale_order,
            suffix_tokens,
            prefix_tokens,
        }
    }

    /// Returns None when the record has no usable name at all.
    pub fn key_for(&self, name: &BTreeMap<String, String>) -> Option<String> {
        let display = self.first_name(name)?;
        let key = self.normalise(display);

        match key.is_empty() {
            true => None,
            false => Some(key),
        }
    }

    fn first_name<'a>(&self, name: &'a BTreeMap<String, String>) -> Option<&'a str> {
        self.locale_order
            .iter()
            .filter_map(|locale| name.get(locale))
            .chain(name.values())
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
    }

    pub fn normalise(&self, display: &str) -> String {
        let mut working = display.trim().to_string();

        while let Some(stripped) = strip_token_suffix(&working, &self.suffix_tokens) {
            working = stripped;
        }

        while let Some(stripped) = strip_token_prefix(&working, &self.prefix_tokens) {
            working = stripped;
        }

        working
            .to_lowercase()
            .chars()
            .filter(|c| !c.is_whitespace() && !STRIPPED_PUNCTUATION.contains(c))
            .collect()
    }
}

// Stripping never empties the name: "Station" on its own stays "Station".
fn strip_token_suffix(name: &str, tokens: &[String]) -> Option<String> {
    for token in tokens {
        if name.len() > token.len() && ends_with_ignore_ascii_case(name, token) {
            let rest = name[..name.len() - token.len()].trim_end();
            if !rest.is_empty() {
                return Some(rest.to_string());
            }
        }
    }
    None
}

fn strip_token_prefix(name: &str, tokens: &[String]) -> Option<String> {
    for token in tokens {
        if name.len() > token.len() && starts_with_ignore_ascii_case(name, token) {
            let rest = name[token.len()..].trim_start();
            if !rest.is_empty() {
                return Some(rest.to_string());
            }
        }
    }
    None
}

// Latin tokens only match on a word boundary, so "Metro" does not eat the
// front of "Metropolitan".
fn ends_with_ignore_ascii_case(name: &str, token: &str) -> bool {
    let split = name.len() - token.len();
    if !name.is_char_boundary(split) || !name[split..].eq_ignore_ascii_case(token) {
        return false;
    }

    let before = name[..split].chars().next_back();
    let token_start = token.chars().next();
    !matches!((before, token_start), (Some(b), Some(t)) if b.is_ascii_alphanumeric() && t.is_ascii_alphanumeric())
}

fn starts_with_ignore_ascii_case(name: &str, token: &str) -> bool {
    let split = token.len();
    if !name.is_char_boundary(split) || !name[..split].eq_ignore_ascii_case(token) {
        return false;
    }

    let after = name[split..].chars().next();
    let token_end = token.chars().next_back();
    !matches!((token_end, after), (Some(t), Some(a)) if t.is_ascii_alphanumeric() && a.is_ascii_alphanumeric())
}
