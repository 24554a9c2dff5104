//! Knowledge graph model: entities, relationships and change tracking.
//!
//! The graph is an explicit adjacency structure (name -> entity, edge key ->
//! relationship). Mutations report what they touched through [`GraphChange`]
//! so downstream re-embedding never has to diff whole graphs.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

/// Separator between independent description fragments.
pub const FIELD_SEP: &str = "<SEP>";

/// Normalize an entity name into its node identity.
///
/// NFKC, trimmed, surrounding quotes stripped, whitespace collapsed, upper-cased.
/// The steps repeat until the name stops changing, so normalizing an
/// already normalized name is a no-op.
pub fn normalize_entity_name(raw: &str) -> String {
    let mut current = normalize_pass(raw);
    loop {
        let next = normalize_pass(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn normalize_pass(raw: &str) -> String {
    let nfkc: String = raw.nfkc().collect();
    nfkc.trim()
        .trim_matches(|c: char| c == '"' || c == '\'')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// Normalize an entity type label (same rules as names).
pub fn normalize_entity_type(raw: &str) -> String {
    normalize_entity_name(raw)
}

/// Split a stored description into its parts.
pub fn description_parts(description: &str) -> impl Iterator<Item = &str> {
    description
        .split(FIELD_SEP)
        .map(str::trim)
        .filter(|p| !p.is_empty())
}

/// Union two descriptions part-wise.
///
/// Parts are de-duplicated and sorted, so the result does not depend on
/// which side was merged first.
pub fn merge_descriptions(a: &str, b: &str) -> String {
    let parts: BTreeSet<&str> = description_parts(a).chain(description_parts(b)).collect();
    parts.into_iter().collect::<Vec<_>>().join(FIELD_SEP)
}

/// A graph node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Normalized name, unique within a graph
    pub name: String,

    /// Normalized entity type (may be empty when unknown)
    #[serde(rename = "entity_type", default)]
    pub entity_type: String,

    /// `FIELD_SEP`-joined description parts
    #[serde(default)]
    pub description: String,

    /// Documents that contributed this entity
    #[serde(default)]
    pub source_ids: BTreeSet<String>,

    /// PageRank score, recomputed after every mutation
    #[serde(rename = "pagerank", default)]
    pub centrality: f64,
}

impl Entity {
    /// Create a new entity; name and type are normalized.
    pub fn new(name: &str, entity_type: &str, description: impl Into<String>) -> Self {
        let description: String = description.into();
        Self {
            name: normalize_entity_name(name),
            entity_type: normalize_entity_type(entity_type),
            description: description.trim().to_string(),
            source_ids: BTreeSet::new(),
            centrality: 0.0,
        }
    }

    /// Tag with a contributing document.
    pub fn with_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_ids.insert(source_id.into());
        self
    }

    /// Fold another contribution of the same entity into this one.
    ///
    /// Returns true when anything observable changed. Conflicting non-empty
    /// types resolve to the lexicographically smaller label so the outcome is
    /// order independent.
    pub fn absorb(&mut self, other: &Entity) -> bool {
        let mut changed = false;

        let description = merge_descriptions(&self.description, &other.description);
        if description != self.description {
            self.description = description;
            changed = true;
        }

        for id in &other.source_ids {
            changed |= self.source_ids.insert(id.clone());
        }

        let merged_type = match (self.entity_type.is_empty(), other.entity_type.is_empty()) {
            (true, false) => Some(other.entity_type.clone()),
            (false, false) if other.entity_type < self.entity_type => {
                Some(other.entity_type.clone())
            }
            _ => None,
        };
        if let Some(t) = merged_type {
            self.entity_type = t;
            changed = true;
        }

        changed
    }
}

/// Undirected edge identity: the endpoint names in sorted order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeKey {
    pub source: String,
    pub target: String,
}

impl EdgeKey {
    /// Build a key; endpoint order does not matter.
    pub fn new(a: impl Into<String>, b: impl Into<String>) -> Self {
        let (a, b) = (a.into(), b.into());
        if a <= b {
            Self { source: a, target: b }
        } else {
            Self { source: b, target: a }
        }
    }

    /// Whether `name` is one of the endpoints.
    pub fn touches(&self, name: &str) -> bool {
        self.source == name || self.target == name
    }

    /// The endpoint opposite to `name`.
    pub fn other(&self, name: &str) -> Option<&str> {
        if self.source == name {
            Some(&self.target)
        } else if self.target == name {
            Some(&self.source)
        } else {
            None
        }
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -- {}", self.source, self.target)
    }
}

/// A graph edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// Smaller endpoint name
    pub source: String,

    /// Larger endpoint name
    pub target: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub keywords: BTreeSet<String>,

    /// Strength; summed across documents
    #[serde(default = "default_weight")]
    pub weight: f64,

    #[serde(default)]
    pub source_ids: BTreeSet<String>,
}

fn default_weight() -> f64 {
    1.0
}

impl Relationship {
    /// Create a relationship; endpoint names are normalized and ordered.
    pub fn new(a: &str, b: &str, description: impl Into<String>) -> Self {
        let key = EdgeKey::new(normalize_entity_name(a), normalize_entity_name(b));
        let description: String = description.into();
        Self {
            source: key.source,
            target: key.target,
            description: description.trim().to_string(),
            keywords: BTreeSet::new(),
            weight: default_weight(),
            source_ids: BTreeSet::new(),
        }
    }

    /// Tag with a contributing document.
    pub fn with_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_ids.insert(source_id.into());
        self
    }

    /// Set weight.
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Add keywords.
    pub fn with_keywords(mut self, keywords: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.keywords.extend(keywords.into_iter().map(Into::into));
        self
    }

    /// The identity of this edge.
    pub fn key(&self) -> EdgeKey {
        EdgeKey::new(self.source.clone(), self.target.clone())
    }

    /// Fold another contribution of the same edge into this one.
    ///
    /// Weight only accumulates for documents not seen before, which keeps
    /// re-applying a fragment a no-op.
    pub fn absorb(&mut self, other: &Relationship) -> bool {
        let mut changed = false;

        let fresh: Vec<&String> = other
            .source_ids
            .iter()
            .filter(|id| !self.source_ids.contains(*id))
            .collect();
        if !fresh.is_empty() {
            self.weight += other.weight;
            self.source_ids.extend(fresh.into_iter().cloned());
            changed = true;
        }

        let description = merge_descriptions(&self.description, &other.description);
        if description != self.description {
            self.description = description;
            changed = true;
        }

        for keyword in &other.keywords {
            changed |= self.keywords.insert(keyword.clone());
        }

        changed
    }
}

/// Outcome of inserting a node or edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
    Unchanged,
}

impl Upsert {
    pub fn changed(self) -> bool {
        !matches!(self, Upsert::Unchanged)
    }
}

/// What one mutation added, updated or removed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphChange {
    pub added_updated_nodes: BTreeSet<String>,
    pub added_updated_edges: BTreeSet<EdgeKey>,
    pub removed_nodes: BTreeSet<String>,
    pub removed_edges: BTreeSet<EdgeKey>,
}

impl GraphChange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.added_updated_nodes.is_empty()
            && self.added_updated_edges.is_empty()
            && self.removed_nodes.is_empty()
            && self.removed_edges.is_empty()
    }

    pub fn node_upserted(&mut self, name: &str) {
        self.removed_nodes.remove(name);
        self.added_updated_nodes.insert(name.to_string());
    }

    pub fn node_removed(&mut self, name: &str) {
        self.added_updated_nodes.remove(name);
        self.removed_nodes.insert(name.to_string());
    }

    pub fn edge_upserted(&mut self, key: EdgeKey) {
        self.removed_edges.remove(&key);
        self.added_updated_edges.insert(key);
    }

    pub fn edge_removed(&mut self, key: EdgeKey) {
        self.added_updated_edges.remove(&key);
        self.removed_edges.insert(key);
    }

    /// Apply a later change on top of this one.
    pub fn extend(&mut self, later: GraphChange) {
        for name in later.removed_nodes {
            self.node_removed(&name);
        }
        for key in later.removed_edges {
            self.edge_removed(key);
        }
        for name in later.added_updated_nodes {
            self.node_upserted(&name);
        }
        for key in later.added_updated_edges {
            self.edge_upserted(key);
        }
    }
}

/// An undirected, attributed knowledge graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KnowledgeGraph {
    nodes: BTreeMap<String, Entity>,
    edges: BTreeMap<EdgeKey, Relationship>,
    adjacency: BTreeMap<String, BTreeSet<String>>,
    source_ids: BTreeSet<String>,
}

impl KnowledgeGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a graph from loose parts, dropping edges with a missing endpoint.
    ///
    /// Returns the graph and the number of dropped edges.
    pub fn from_parts(
        nodes: impl IntoIterator<Item = Entity>,
        edges: impl IntoIterator<Item = Relationship>,
        source_ids: impl IntoIterator<Item = String>,
    ) -> (Self, usize) {
        let mut graph = Self::new();
        for node in nodes {
            graph.upsert_entity(node);
        }
        let mut dropped = 0;
        for edge in edges {
            if graph.upsert_relationship(edge).is_none() {
                dropped += 1;
            }
        }
        graph.source_ids.extend(source_ids);
        (graph, dropped)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn has_node(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn has_edge(&self, a: &str, b: &str) -> bool {
        self.edges.contains_key(&EdgeKey::new(a, b))
    }

    pub fn node(&self, name: &str) -> Option<&Entity> {
        self.nodes.get(name)
    }

    pub fn node_mut(&mut self, name: &str) -> Option<&mut Entity> {
        self.nodes.get_mut(name)
    }

    pub fn edge(&self, a: &str, b: &str) -> Option<&Relationship> {
        self.edges.get(&EdgeKey::new(a, b))
    }

    /// Nodes in name order.
    pub fn nodes(&self) -> impl Iterator<Item = &Entity> {
        self.nodes.values()
    }

    /// Node names in sorted order.
    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Edges in key order.
    pub fn edges(&self) -> impl Iterator<Item = &Relationship> {
        self.edges.values()
    }

    pub fn edge_keys(&self) -> impl Iterator<Item = &EdgeKey> {
        self.edges.keys()
    }

    /// Neighbors of a node in name order.
    pub fn neighbors(&self, name: &str) -> impl Iterator<Item = &str> {
        self.adjacency
            .get(name)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    pub fn degree(&self, name: &str) -> usize {
        self.adjacency.get(name).map_or(0, BTreeSet::len)
    }

    /// Documents merged into this graph.
    pub fn source_ids(&self) -> &BTreeSet<String> {
        &self.source_ids
    }

    pub fn contains_source(&self, document_id: &str) -> bool {
        self.source_ids.contains(document_id)
    }

    pub fn add_source_id(&mut self, document_id: impl Into<String>) -> bool {
        self.source_ids.insert(document_id.into())
    }

    /// Insert a node or fold it into the existing node of the same name.
    pub fn upsert_entity(&mut self, entity: Entity) -> Upsert {
        match self.nodes.get_mut(&entity.name) {
            Some(existing) => {
                if existing.absorb(&entity) {
                    Upsert::Updated
                } else {
                    Upsert::Unchanged
                }
            }
            None => {
                self.adjacency.entry(entity.name.clone()).or_default();
                self.nodes.insert(entity.name.clone(), entity);
                Upsert::Inserted
            }
        }
    }

    /// Insert an edge or fold it into the existing one.
    ///
    /// Returns `None` (and leaves the graph untouched) when either endpoint
    /// is not a node of this graph.
    pub fn upsert_relationship(&mut self, relationship: Relationship) -> Option<Upsert> {
        if !self.has_node(&relationship.source) || !self.has_node(&relationship.target) {
            return None;
        }
        if relationship.source == relationship.target {
            return None;
        }
        let key = relationship.key();
        match self.edges.get_mut(&key) {
            Some(existing) => Some(if existing.absorb(&relationship) {
                Upsert::Updated
            } else {
                Upsert::Unchanged
            }),
            None => {
                self.adjacency
                    .entry(key.source.clone())
                    .or_default()
                    .insert(key.target.clone());
                self.adjacency
                    .entry(key.target.clone())
                    .or_default()
                    .insert(key.source.clone());
                self.edges.insert(key, relationship);
                Some(Upsert::Inserted)
            }
        }
    }

    /// Remove an edge.
    pub fn remove_edge(&mut self, key: &EdgeKey) -> Option<Relationship> {
        let removed = self.edges.remove(key)?;
        if let Some(set) = self.adjacency.get_mut(&key.source) {
            set.remove(&key.target);
        }
        if let Some(set) = self.adjacency.get_mut(&key.target) {
            set.remove(&key.source);
        }
        Some(removed)
    }

    /// Remove a node together with its incident edges.
    pub fn remove_node(&mut self, name: &str) -> Option<(Entity, Vec<Relationship>)> {
        let entity = self.nodes.remove(name)?;
        let neighbors: Vec<String> = self
            .adjacency
            .remove(name)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        let mut edges = Vec::with_capacity(neighbors.len());
        for neighbor in neighbors {
            let key = EdgeKey::new(name, neighbor.as_str());
            if let Some(rel) = self.edges.remove(&key) {
                edges.push(rel);
            }
            if let Some(set) = self.adjacency.get_mut(&neighbor) {
                set.remove(name);
            }
        }
        Some((entity, edges))
    }

    /// Merge another graph into this one, recording every touched item.
    ///
    /// Same-name nodes converge regardless of application order.
    pub fn merge(&mut self, other: &KnowledgeGraph, change: &mut GraphChange) {
        for entity in other.nodes() {
            if self.upsert_entity(entity.clone()).changed() {
                change.node_upserted(&entity.name);
            }
        }
        for relationship in other.edges() {
            if let Some(outcome) = self.upsert_relationship(relationship.clone()) {
                if outcome.changed() {
                    change.edge_upserted(relationship.key());
                }
            }
        }
        self.source_ids.extend(other.source_ids.iter().cloned());
    }

    /// Repair a graph loaded from storage.
    ///
    /// Empty descriptions are filled with the entity name. Returns how many
    /// nodes were repaired.
    pub fn tidy(&mut self) -> usize {
        let mut repaired = 0;
        for entity in self.nodes.values_mut() {
            if entity.description.trim().is_empty() {
                entity.description = entity.name.clone();
                repaired += 1;
            }
        }
        repaired
    }

    /// Nodes within `radius` hops of any seed (seeds included).
    ///
    /// Seeds that are not in the graph are ignored.
    pub fn neighborhood(&self, seeds: &BTreeSet<String>, radius: usize) -> BTreeSet<String> {
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        for seed in seeds.iter().filter(|s| self.has_node(s)) {
            if seen.insert(seed.clone()) {
                queue.push_back((seed.clone(), 0));
            }
        }
        while let Some((name, depth)) = queue.pop_front() {
            if depth >= radius {
                continue;
            }
            for neighbor in self.neighbors(&name) {
                if seen.insert(neighbor.to_string()) {
                    queue.push_back((neighbor.to_string(), depth + 1));
                }
            }
        }
        seen
    }
}

/// A single document's extracted graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    /// The owning document
    pub document_id: String,

    /// Nodes and edges, all tagged with `document_id`
    pub graph: KnowledgeGraph,

    /// When extraction finished
    pub built_at: DateTime<Utc>,
}

impl Fragment {
    /// Wrap a graph as the fragment of `document_id`.
    pub fn new(document_id: impl Into<String>, mut graph: KnowledgeGraph) -> Self {
        let document_id = document_id.into();
        graph.add_source_id(document_id.clone());
        Self {
            document_id,
            graph,
            built_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(name: &str, doc: &str) -> Entity {
        Entity::new(name, "organization", format!("{name} from {doc}")).with_source(doc)
    }

    #[test]
    fn test_normalize_entity_name() {
        assert_eq!(normalize_entity_name("  \"acme   corp\" "), "ACME CORP");
        assert_eq!(normalize_entity_name("ｆｏｏ"), "FOO");
    }

    #[test]
    fn test_normalize_entity_name_is_idempotent() {
        for raw in ["\" 'acme\"", "' \"Bolt  Inc\" '", "  ' ", "Straße"] {
            let once = normalize_entity_name(raw);
            assert_eq!(normalize_entity_name(&once), once, "{raw:?}");
        }
        assert_eq!(normalize_entity_name("\" 'acme\""), "ACME");
    }

    #[test]
    fn test_merge_descriptions_is_order_independent() {
        let ab = merge_descriptions("beta", "alpha<SEP>beta");
        let ba = merge_descriptions("alpha<SEP>beta", "beta");
        assert_eq!(ab, ba);
        assert_eq!(ab, "alpha<SEP>beta");
    }

    #[test]
    fn test_upsert_merges_same_name() {
        let mut graph = KnowledgeGraph::new();
        assert_eq!(graph.upsert_entity(entity("Acme", "d1")), Upsert::Inserted);
        assert_eq!(graph.upsert_entity(entity("acme", "d2")), Upsert::Updated);
        assert_eq!(graph.upsert_entity(entity("acme", "d2")), Upsert::Unchanged);

        let node = graph.node("ACME").unwrap();
        assert_eq!(graph.node_count(), 1);
        assert_eq!(
            node.source_ids.iter().cloned().collect::<Vec<_>>(),
            vec!["d1".to_string(), "d2".to_string()]
        );
        assert_eq!(description_parts(&node.description).count(), 2);
    }

    #[test]
    fn test_relationship_requires_both_endpoints() {
        let mut graph = KnowledgeGraph::new();
        graph.upsert_entity(entity("A", "d1"));
        let rel = Relationship::new("A", "B", "A works with B").with_source("d1");
        assert!(graph.upsert_relationship(rel).is_none());
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_relationship_weight_only_grows_for_new_documents() {
        let mut graph = KnowledgeGraph::new();
        graph.upsert_entity(entity("A", "d1"));
        graph.upsert_entity(entity("B", "d1"));
        let rel = Relationship::new("A", "B", "linked").with_source("d1");
        graph.upsert_relationship(rel.clone());
        assert_eq!(graph.upsert_relationship(rel), Some(Upsert::Unchanged));
        assert_eq!(graph.edge("B", "A").unwrap().weight, 1.0);

        graph.upsert_relationship(Relationship::new("B", "A", "linked").with_source("d2"));
        assert_eq!(graph.edge("A", "B").unwrap().weight, 2.0);
    }

    #[test]
    fn test_remove_node_drops_incident_edges() {
        let mut graph = KnowledgeGraph::new();
        for name in ["A", "B", "C"] {
            graph.upsert_entity(entity(name, "d1"));
        }
        graph.upsert_relationship(Relationship::new("A", "B", "ab"));
        graph.upsert_relationship(Relationship::new("B", "C", "bc"));

        let (_, edges) = graph.remove_node("B").unwrap();
        assert_eq!(edges.len(), 2);
        assert_eq!(graph.edge_count(), 0);
        assert_eq!(graph.degree("A"), 0);
        assert_eq!(graph.neighbors("C").count(), 0);
    }

    #[test]
    fn test_merge_records_changes() {
        let mut base = KnowledgeGraph::new();
        base.upsert_entity(entity("A", "d1"));

        let mut other = KnowledgeGraph::new();
        other.upsert_entity(entity("A", "d1"));
        other.upsert_entity(entity("B", "d2"));
        other.upsert_relationship(Relationship::new("A", "B", "ab").with_source("d2"));

        let mut change = GraphChange::new();
        base.merge(&other, &mut change);

        // A was identical, so only B and the edge count as changed.
        assert_eq!(
            change.added_updated_nodes,
            BTreeSet::from(["B".to_string()])
        );
        assert_eq!(change.added_updated_edges.len(), 1);
    }

    #[test]
    fn test_neighborhood_radius() {
        let mut graph = KnowledgeGraph::new();
        for name in ["A", "B", "C", "D"] {
            graph.upsert_entity(entity(name, "d1"));
        }
        graph.upsert_relationship(Relationship::new("A", "B", ""));
        graph.upsert_relationship(Relationship::new("B", "C", ""));
        graph.upsert_relationship(Relationship::new("C", "D", ""));

        let seeds = BTreeSet::from(["A".to_string()]);
        assert_eq!(graph.neighborhood(&seeds, 0).len(), 1);
        assert_eq!(graph.neighborhood(&seeds, 1).len(), 2);
        assert_eq!(graph.neighborhood(&seeds, 2).len(), 3);
    }

    #[test]
    fn test_change_extend_removal_wins_over_earlier_upsert() {
        let mut change = GraphChange::new();
        change.node_upserted("A");
        let mut later = GraphChange::new();
        later.node_removed("A");
        change.extend(later);
        assert!(change.added_updated_nodes.is_empty());
        assert!(change.removed_nodes.contains("A"));
    }
}
