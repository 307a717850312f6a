//! Fixed Item Catalogue
//!
//! The immutable segment of the pool. Every peer in a room must load the
//! same catalogue, since ordinals `1..=len` index straight into it.

use std::path::Path;
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::hash::{StateHash, StateHasher};
use crate::game::state::Ordinal;

/// A labelled group of fixed items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    /// Category label shown next to each item.
    pub label: String,
    /// Item texts, in ordinal order.
    pub items: Vec<String>,
}

impl Category {
    /// Create a category from a label and item texts.
    pub fn new(label: impl Into<String>, items: &[&str]) -> Self {
        Self {
            label: label.into(),
            items: items.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Catalogue load errors.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// File could not be read.
    #[error("Failed to read catalogue: {0}")]
    Io(#[from] std::io::Error),

    /// File is not a valid catalogue document.
    #[error("Invalid catalogue: {0}")]
    Parse(#[from] serde_json::Error),
}

/// The fixed catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog {
    categories: Vec<Category>,
}

impl Catalog {
    /// Create a catalogue from categories.
    pub fn new(categories: Vec<Category>) -> Self {
        Self { categories }
    }

    /// The catalogue compiled into the binary.
    pub fn builtin() -> Self {
        Self::new(vec![
            Category::new("Warm-up", &[
                "What is the best thing that happened to you this week?",
                "Which song do you know all the words to?",
                "What would you cook to impress a guest?",
                "Where would you go on a free weekend trip?",
                "What was your first job?",
            ]),
            Category::new("Living together", &[
                "Which chore do you secretly enjoy?",
                "What time does your ideal evening end?",
                "How do you feel about guests staying over?",
                "What is one house rule you would add?",
                "Which shared item do you always run out of?",
            ]),
            Category::new("Deeper", &[
                "What are you proud of but rarely talk about?",
                "Who taught you the most about friendship?",
                "What would you change about how you grew up?",
                "When did you last change your mind about something big?",
                "What does a good day look like for you?",
            ]),
        ])
    }

    /// Parse a catalogue from a JSON array of categories.
    pub fn from_json(s: &str) -> Result<Self, CatalogError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Load a catalogue from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Number of fixed items.
    pub fn len(&self) -> usize {
        self.categories.iter().map(|c| c.items.len()).sum()
    }

    /// Whether the catalogue has no items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Categories in order.
    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    /// Look up `(category label, item text)` by ordinal.
    pub fn get(&self, ordinal: Ordinal) -> Option<(&str, &str)> {
        self.iter()
            .find(|(o, _, _)| *o == ordinal)
            .map(|(_, label, text)| (label, text))
    }

    /// Iterate `(ordinal, category label, item text)` in order.
    pub fn iter(&self) -> impl Iterator<Item = (Ordinal, &str, &str)> {
        self.categories
            .iter()
            .flat_map(|c| c.items.iter().map(move |item| (c.label.as_str(), item.as_str())))
            .enumerate()
            .map(|(i, (label, text))| (i as Ordinal + 1, label, text))
    }

    /// Fingerprint of the catalogue contents.
    pub fn fingerprint(&self) -> StateHash {
        let mut hasher = StateHasher::for_catalog();
        hasher.update_len(self.categories.len());
        for category in &self.categories {
            hasher.update_str(&category.label);
            hasher.update_len(category.items.len());
            for item in &category.items {
                hasher.update_str(item);
            }
        }
        hasher.finalize()
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::builtin()
    }
}
