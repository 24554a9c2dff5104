//! Raw extraction types - what the LLM client hands back before the
//! fragment builder enforces graph invariants.

use serde::{Deserialize, Serialize};

/// A positioned piece of document text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// Owning document
    pub document_id: String,

    /// Position inside the document (ascending = reading order)
    pub position: usize,

    /// Chunk text
    pub content: String,
}

impl DocumentChunk {
    pub fn new(document_id: impl Into<String>, position: usize, content: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            position,
            content: content.into(),
        }
    }
}

/// One call to the extraction client.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionRequest<'a> {
    /// Document the text belongs to
    pub document_id: &'a str,

    /// Text to extract from (one or more packed chunks)
    pub text: &'a str,

    /// Output language hint
    pub language: &'a str,

    /// Allowed entity types; empty = unrestricted
    pub entity_types: &'a [String],
}

/// An entity candidate as returned by the extraction client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEntity {
    pub name: String,

    #[serde(default)]
    pub entity_type: String,

    #[serde(default)]
    pub description: String,
}

impl RawEntity {
    pub fn new(
        name: impl Into<String>,
        entity_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
            description: description.into(),
        }
    }
}

/// A relation candidate as returned by the extraction client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRelation {
    pub source: String,

    pub target: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub keywords: Vec<String>,

    #[serde(default = "default_strength")]
    pub weight: f64,
}

fn default_strength() -> f64 {
    1.0
}

impl RawRelation {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            description: description.into(),
            keywords: Vec::new(),
            weight: default_strength(),
        }
    }

    /// Set weight.
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Set keywords.
    pub fn with_keywords(mut self, keywords: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }
}

/// Entities and relations extracted from one piece of text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawExtraction {
    #[serde(default)]
    pub entities: Vec<RawEntity>,

    #[serde(default)]
    pub relations: Vec<RawRelation>,
}

impl RawExtraction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity: RawEntity) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn with_relation(mut self, relation: RawRelation) -> Self {
        self.relations.push(relation);
        self
    }

    /// Append another extraction (e.g. the next chunk batch).
    pub fn extend(&mut self, other: RawExtraction) {
        self.entities.extend(other.entities);
        self.relations.extend(other.relations);
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty()
    }
}
