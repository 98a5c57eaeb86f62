//! Named parameters embedded in action text.
//!
//! `SendReport @user = 42, @title = "Q1, Q2"` yields `user = 42` and
//! `title = Q1, Q2`. Segments start at `@` and split on the first `=`.
//! A segment without `=` or with an empty name is skipped.

use std::collections::HashMap;

/// Parameters parsed from an action's text, looked up case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionParameters {
    // lowercase key -> (key as written, value)
    entries: HashMap<String, (String, String)>,
}

impl ActionParameters {
    /// Parse every `@name = value` segment of `text`.
    ///
    /// When a name appears twice the later value wins.
    pub fn parse(text: &str) -> Self {
        let mut params = Self::default();

        for segment in text.split('@').skip(1) {
            let Some((raw_key, raw_value)) = segment.split_once('=') else {
                continue;
            };
            let key = raw_key.trim();
            if key.is_empty() {
                continue;
            }
            params.insert(key, parse_value(raw_value));
        }

        params
    }

    pub fn insert(&mut self, key: &str, value: String) {
        self.entries
            .insert(key.to_lowercase(), (key.to_string(), value));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(&key.to_lowercase())
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(&key.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(name as written, value)` pairs in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .values()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }
}

fn parse_value(raw: &str) -> String {
    // The separator before the next parameter belongs to this segment.
    let value = raw.trim().trim_end_matches(',').trim_end();

    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        return value[1..value.len() - 1].to_string();
    }

    let value = value.replace(',', "");
    let value = value.trim();
    let unquoted = value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .or_else(|| value.strip_prefix('"').and_then(|v| v.strip_suffix('"')))
        .unwrap_or(value);
    unquoted.trim().to_string()
}
