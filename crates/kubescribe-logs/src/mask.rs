use std::collections::HashMap;

use k8s_openapi::api::core::v1::Secret;
use regex::{Regex, RegexBuilder};
use thiserror::Error;

/// Replacement written in place of secret values
pub const MASK: &str = "****";

/// Secret values shorter than this are not masked
pub const MIN_SECRET_LEN: usize = 4;

#[derive(Debug, Error)]
pub enum MaskError {
    #[error("failed to compile mask pattern")]
    Pattern(#[from] regex::Error),
}

/// Replaces known secret values in log lines.
///
/// Immutable once built, so a single instance is shared by every tail.
#[derive(Debug, Default)]
pub struct Masker {
    /// Alternation of every word, longest first
    pattern: Option<Regex>,
    replacements: HashMap<String, String>,
}

impl Masker {
    /// Build from an explicit word -> replacement table
    pub fn new<I, K, V>(table: I) -> Result<Self, MaskError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let replacements: HashMap<String, String> = table
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(k, _)| !k.is_empty())
            .collect();

        if replacements.is_empty() {
            return Ok(Self::default());
        }

        let mut words: Vec<&str> = replacements.keys().map(String::as_str).collect();
        // Leftmost-first alternation: longer words must come first to win
        words.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        let alternation = words
            .iter()
            .map(|w| regex::escape(w))
            .collect::<Vec<_>>()
            .join("|");

        let pattern = RegexBuilder::new(&alternation)
            .size_limit(64 * (1 << 20))
            .build()?;

        Ok(Self {
            pattern: Some(pattern),
            replacements,
        })
    }

    /// Build from the values stored in Kubernetes secrets
    pub fn from_secrets(secrets: &[Secret]) -> Result<Self, MaskError> {
        let mut words = Vec::new();
        for secret in secrets {
            let binary = secret
                .data
                .iter()
                .flatten()
                .filter_map(|(_, v)| std::str::from_utf8(&v.0).ok());
            let plain = secret.string_data.iter().flatten().map(|(_, v)| v.as_str());

            words.extend(
                binary
                    .chain(plain)
                    .map(str::trim)
                    .filter(|w| w.len() >= MIN_SECRET_LEN)
                    .map(|w| (w.to_string(), MASK)),
            );
        }
        Self::new(words)
    }

    /// Replace every known secret in a line
    pub fn mask(&self, line: &str) -> String {
        match &self.pattern {
            Some(re) => re
                .replace_all(line, |caps: &regex::Captures<'_>| {
                    self.replacements
                        .get(&caps[0])
                        .cloned()
                        .unwrap_or_else(|| MASK.to_string())
                })
                .into_owned(),
            None => line.to_string(),
        }
    }

    /// The secret words being masked, sorted
    pub fn words(&self) -> Vec<&str> {
        let mut words: Vec<&str> = self.replacements.keys().map(String::as_str).collect();
        words.sort_unstable();
        words
    }

    pub fn is_empty(&self) -> bool {
        self.replacements.is_empty()
    }
}
