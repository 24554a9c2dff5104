//! Community types: detected clusters, LLM reports, and the searchable
//! records that replace the collection's community index on every run.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::graph::{Entity, Relationship};

/// A detected cluster of entities at one hierarchy level.
#[derive(Debug, Clone, PartialEq)]
pub struct Community {
    /// 0 = finest partition; higher levels aggregate lower ones
    pub level: usize,

    /// Member entity names, sorted
    pub members: BTreeSet<String>,
}

/// What the LLM sees when summarizing a community.
#[derive(Debug, Clone, Serialize)]
pub struct CommunityContext {
    pub level: usize,

    /// Member entities (highest centrality first)
    pub entities: Vec<Entity>,

    /// Relationships among members
    pub relationships: Vec<Relationship>,
}

/// A supporting finding inside a community report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub summary: String,

    #[serde(default)]
    pub explanation: String,
}

/// LLM-generated summary of one community.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityReport {
    pub title: String,

    pub summary: String,

    #[serde(default)]
    pub findings: Vec<Finding>,

    /// Impact rating 0-10
    #[serde(default)]
    pub rating: f64,

    #[serde(default)]
    pub rating_explanation: String,
}

impl CommunityReport {
    pub fn new(title: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            summary: summary.into(),
            findings: Vec::new(),
            rating: 0.0,
            rating_explanation: String::new(),
        }
    }

    pub fn with_finding(mut self, summary: impl Into<String>, explanation: impl Into<String>) -> Self {
        self.findings.push(Finding {
            summary: summary.into(),
            explanation: explanation.into(),
        });
        self
    }

    pub fn with_rating(mut self, rating: f64, explanation: impl Into<String>) -> Self {
        self.rating = rating;
        self.rating_explanation = explanation.into();
        self
    }

    /// Render as markdown for full-text search.
    pub fn to_markdown(&self) -> String {
        let mut out = format!("# {}\n\n{}\n", self.title, self.summary);
        for finding in &self.findings {
            out.push_str(&format!("\n## {}\n\n{}\n", finding.summary, finding.explanation));
        }
        out
    }

    /// Findings' explanations, one per line.
    pub fn evidences(&self) -> String {
        self.findings
            .iter()
            .map(|f| f.explanation.as_str())
            .filter(|e| !e.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// One persisted, searchable community record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityRecord {
    pub id: Uuid,

    pub collection_id: String,

    pub level: usize,

    pub title: String,

    /// Rendered report text
    pub report: String,

    pub evidences: String,

    /// Member entity names
    pub entities: Vec<String>,

    /// Normalized summed centrality of the members (0..=1)
    pub weight: f64,

    pub rating: f64,

    /// Documents the member entities were extracted from
    pub source_ids: Vec<String>,

    pub created_at: DateTime<Utc>,
}

impl CommunityRecord {
    /// Build a record from a report.
    pub fn from_report(
        collection_id: impl Into<String>,
        community: &Community,
        report: &CommunityReport,
        weight: f64,
        source_ids: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            collection_id: collection_id.into(),
            level: community.level,
            title: report.title.clone(),
            report: report.to_markdown(),
            evidences: report.evidences(),
            entities: community.members.iter().cloned().collect(),
            weight,
            rating: report.rating,
            source_ids: source_ids.into_iter().collect(),
            created_at: Utc::now(),
        }
    }
}
