//! Graph codec: typed artifact keys and the node-link JSON layout used to
//! persist fragments, collection graphs and community records.
//!
//! # Layout
//!
//! | Key | Payload |
//! |-----|---------|
//! | `subgraph:<document_id>` | one document's fragment |
//! | `graph:<collection_id>` | the collection graph |
//! | `community:<collection_id>:<n>` | one community record |

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::{GraphError, Result};
use crate::traits::store::ArtifactStore;
use crate::types::community::CommunityRecord;
use crate::types::graph::{EdgeKey, Entity, Fragment, KnowledgeGraph, Relationship};

/// Artifact families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactKind {
    Subgraph,
    Graph,
    Community,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subgraph => "subgraph",
            Self::Graph => "graph",
            Self::Community => "community",
        }
    }
}

/// Typed artifact address within a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactKey {
    Subgraph { document_id: String },
    Graph { collection_id: String },
    Community { collection_id: String, index: usize },
}

impl ArtifactKey {
    pub fn subgraph(document_id: impl Into<String>) -> Self {
        Self::Subgraph {
            document_id: document_id.into(),
        }
    }

    pub fn graph(collection_id: impl Into<String>) -> Self {
        Self::Graph {
            collection_id: collection_id.into(),
        }
    }

    pub fn community(collection_id: impl Into<String>, index: usize) -> Self {
        Self::Community {
            collection_id: collection_id.into(),
            index,
        }
    }

    pub fn kind(&self) -> ArtifactKind {
        match self {
            Self::Subgraph { .. } => ArtifactKind::Subgraph,
            Self::Graph { .. } => ArtifactKind::Graph,
            Self::Community { .. } => ArtifactKind::Community,
        }
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subgraph { document_id } => write!(f, "subgraph:{document_id}"),
            Self::Graph { collection_id } => write!(f, "graph:{collection_id}"),
            Self::Community {
                collection_id,
                index,
            } => write!(f, "community:{collection_id}:{index}"),
        }
    }
}

impl FromStr for ArtifactKey {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || GraphError::InvalidArtifactKey { key: s.to_string() };
        let (kind, rest) = s.split_once(':').ok_or_else(invalid)?;
        if rest.is_empty() {
            return Err(invalid());
        }
        match kind {
            "subgraph" => Ok(Self::subgraph(rest)),
            "graph" => Ok(Self::graph(rest)),
            "community" => {
                // collection ids may contain ':', the index never does
                let (collection_id, index) = rest.rsplit_once(':').ok_or_else(invalid)?;
                let index = index.parse().map_err(|_| invalid())?;
                Ok(Self::community(collection_id, index))
            }
            _ => Err(invalid()),
        }
    }
}

/// Selects artifacts for listing and deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactFilter {
    All,
    Kind(ArtifactKind),
    /// The fragment of one document
    Fragment(String),
}

impl ArtifactFilter {
    pub fn matches(&self, key: &ArtifactKey) -> bool {
        match self {
            Self::All => true,
            Self::Kind(kind) => key.kind() == *kind,
            Self::Fragment(doc) => {
                matches!(key, ArtifactKey::Subgraph { document_id } if document_id == doc)
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct GraphDocument {
    #[serde(default)]
    directed: bool,
    #[serde(default)]
    graph: GraphAttributes,
    #[serde(default)]
    nodes: Vec<NodeRecord>,
    #[serde(default)]
    links: Vec<LinkRecord>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct GraphAttributes {
    #[serde(default)]
    source_id: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NodeRecord {
    id: String,
    #[serde(default)]
    entity_type: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    source_id: Vec<String>,
    #[serde(default)]
    pagerank: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct LinkRecord {
    source: String,
    target: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default = "default_link_weight")]
    weight: f64,
    #[serde(default)]
    source_id: Vec<String>,
}

fn default_link_weight() -> f64 {
    1.0
}

#[derive(Debug, Serialize, Deserialize)]
struct FragmentDocument {
    document_id: String,
    built_at: DateTime<Utc>,
    graph: GraphDocument,
}

fn to_document(graph: &KnowledgeGraph) -> GraphDocument {
    GraphDocument {
        directed: false,
        graph: GraphAttributes {
            source_id: graph.source_ids().iter().cloned().collect(),
        },
        nodes: graph
            .nodes()
            .map(|n| NodeRecord {
                id: n.name.clone(),
                entity_type: n.entity_type.clone(),
                description: n.description.clone(),
                source_id: n.source_ids.iter().cloned().collect(),
                pagerank: n.centrality,
            })
            .collect(),
        links: graph
            .edges()
            .map(|e| LinkRecord {
                source: e.source.clone(),
                target: e.target.clone(),
                description: e.description.clone(),
                keywords: e.keywords.iter().cloned().collect(),
                weight: e.weight,
                source_id: e.source_ids.iter().cloned().collect(),
            })
            .collect(),
    }
}

fn from_document(doc: GraphDocument) -> KnowledgeGraph {
    let nodes = doc.nodes.into_iter().map(|n| Entity {
        name: n.id,
        entity_type: n.entity_type,
        description: n.description,
        source_ids: n.source_id.into_iter().collect::<BTreeSet<_>>(),
        centrality: n.pagerank,
    });
    // stored names are already node ids; normalizing them again could
    // detach the edge from its nodes
    let edges = doc.links.into_iter().map(|l| {
        let key = EdgeKey::new(l.source, l.target);
        Relationship {
            source: key.source,
            target: key.target,
            description: l.description,
            keywords: l.keywords.into_iter().collect(),
            weight: l.weight,
            source_ids: l.source_id.into_iter().collect(),
        }
    });

    let (mut graph, dropped) = KnowledgeGraph::from_parts(nodes, edges, doc.graph.source_id);
    let repaired = graph.tidy();
    if dropped > 0 || repaired > 0 {
        warn!(dropped_edges = dropped, repaired_nodes = repaired, "Tidied stored graph");
    }
    graph
}

/// Encode a graph as node-link JSON.
pub fn encode_graph(graph: &KnowledgeGraph) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&to_document(graph))?)
}

/// Decode node-link JSON into a tidied graph.
pub fn decode_graph(bytes: &[u8]) -> Result<KnowledgeGraph> {
    let doc: GraphDocument = serde_json::from_slice(bytes)?;
    Ok(from_document(doc))
}

pub fn encode_fragment(fragment: &Fragment) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&FragmentDocument {
        document_id: fragment.document_id.clone(),
        built_at: fragment.built_at,
        graph: to_document(&fragment.graph),
    })?)
}

pub fn decode_fragment(bytes: &[u8]) -> Result<Fragment> {
    let doc: FragmentDocument = serde_json::from_slice(bytes)?;
    let mut graph = from_document(doc.graph);
    graph.add_source_id(doc.document_id.clone());
    Ok(Fragment {
        document_id: doc.document_id,
        graph,
        built_at: doc.built_at,
    })
}

/// Reads and writes graph artifacts through an [`ArtifactStore`].
#[derive(Clone)]
pub struct GraphCodec {
    store: Arc<dyn ArtifactStore>,
}

impl GraphCodec {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    /// Load the collection graph, `None` before the first merge.
    pub async fn load_graph(&self, collection_id: &str) -> Result<Option<KnowledgeGraph>> {
        let key = ArtifactKey::graph(collection_id);
        match self.store.get_artifact(collection_id, &key).await? {
            Some(bytes) => {
                let graph = decode_graph(&bytes)?;
                debug!(
                    collection_id = %collection_id,
                    nodes = graph.node_count(),
                    edges = graph.edge_count(),
                    "Loaded collection graph"
                );
                Ok(Some(graph))
            }
            None => Ok(None),
        }
    }

    pub async fn save_graph(&self, collection_id: &str, graph: &KnowledgeGraph) -> Result<()> {
        let bytes = encode_graph(graph)?;
        self.store
            .put_artifact(collection_id, &ArtifactKey::graph(collection_id), bytes)
            .await
    }

    /// Whether a fragment is already persisted for the document.
    pub async fn fragment_exists(&self, collection_id: &str, document_id: &str) -> Result<bool> {
        self.store
            .has_artifact(collection_id, &ArtifactKey::subgraph(document_id))
            .await
    }

    pub async fn load_fragment(&self, collection_id: &str, document_id: &str) -> Result<Option<Fragment>> {
        let key = ArtifactKey::subgraph(document_id);
        match self.store.get_artifact(collection_id, &key).await? {
            Some(bytes) => Ok(Some(decode_fragment(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn save_fragment(&self, collection_id: &str, fragment: &Fragment) -> Result<()> {
        let bytes = encode_fragment(fragment)?;
        self.store
            .put_artifact(
                collection_id,
                &ArtifactKey::subgraph(fragment.document_id.as_str()),
                bytes,
            )
            .await
    }

    /// Replace every community record of the collection.
    ///
    /// Deletes the old set, then writes the new one. Any failure is returned
    /// as-is; the caller must rerun the whole extraction.
    pub async fn replace_communities(
        &self,
        collection_id: &str,
        records: &[CommunityRecord],
    ) -> Result<usize> {
        let encoded = records
            .iter()
            .map(serde_json::to_vec)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let deleted = self
            .store
            .delete_artifacts(collection_id, &ArtifactFilter::Kind(ArtifactKind::Community))
            .await?;
        debug!(collection_id = %collection_id, deleted, "Deleted previous community records");

        for (index, bytes) in encoded.into_iter().enumerate() {
            let key = ArtifactKey::community(collection_id, index);
            if let Err(e) = self.store.put_artifact(collection_id, &key, bytes).await {
                error!(
                    collection_id = %collection_id,
                    key = %key,
                    error = %e,
                    "Community write failed after delete; index incomplete"
                );
                return Err(e);
            }
        }
        Ok(records.len())
    }

    /// Load community records, ordered by key index.
    pub async fn load_communities(&self, collection_id: &str) -> Result<Vec<CommunityRecord>> {
        let mut keys = self
            .store
            .list_artifacts(collection_id, &ArtifactFilter::Kind(ArtifactKind::Community))
            .await?;
        keys.sort_by_key(|k| match k {
            ArtifactKey::Community { index, .. } => *index,
            _ => usize::MAX,
        });

        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(bytes) = self.store.get_artifact(collection_id, &key).await? {
                records.push(serde_json::from_slice(&bytes)?);
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display_and_parse() {
        let key = ArtifactKey::community("kb:1", 7);
        assert_eq!(key.to_string(), "community:kb:1:7");
        assert_eq!("community:kb:1:7".parse::<ArtifactKey>().unwrap(), key);
        assert_eq!(
            "subgraph:d1".parse::<ArtifactKey>().unwrap(),
            ArtifactKey::subgraph("d1")
        );
        assert!("subgraph:".parse::<ArtifactKey>().is_err());
        assert!("vector:x".parse::<ArtifactKey>().is_err());
    }

    #[test]
    fn test_filter_matches() {
        let frag = ArtifactKey::subgraph("d1");
        assert!(ArtifactFilter::Fragment("d1".into()).matches(&frag));
        assert!(!ArtifactFilter::Fragment("d2".into()).matches(&frag));
        assert!(!ArtifactFilter::Kind(ArtifactKind::Community).matches(&frag));
        assert!(ArtifactFilter::All.matches(&frag));
    }

    #[test]
    fn test_decode_drops_dangling_links_and_fills_descriptions() {
        let raw = br#"{
            "directed": false,
            "graph": {"source_id": ["d1"]},
            "nodes": [
                {"id": "A", "entity_type": "ORGANIZATION", "description": "", "source_id": ["d1"]},
                {"id": "B", "entity_type": "PERSON", "description": "b", "source_id": ["d1"]}
            ],
            "links": [
                {"source": "A", "target": "B", "description": "ab", "source_id": ["d1"]},
                {"source": "A", "target": "GHOST", "description": "x", "source_id": ["d1"]}
            ]
        }"#;

        let graph = decode_graph(raw).unwrap();
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.node("A").unwrap().description, "A");
        assert!(graph.contains_source("d1"));
    }

    #[test]
    fn test_stored_endpoints_are_not_renormalized() {
        let raw = br#"{
            "graph": {"source_id": ["d1"]},
            "nodes": [
                {"id": "'ACME", "entity_type": "ORGANIZATION", "description": "a", "source_id": ["d1"]},
                {"id": "BOLT", "entity_type": "ORGANIZATION", "description": "b", "source_id": ["d1"]}
            ],
            "links": [
                {"source": "BOLT", "target": "'ACME", "description": "ab", "source_id": ["d1"]}
            ]
        }"#;

        let graph = decode_graph(raw).unwrap();
        assert_eq!(graph.edge_count(), 1);
        assert!(graph.edge("'ACME", "BOLT").is_some());

        let again = decode_graph(&encode_graph(&graph).unwrap()).unwrap();
        assert_eq!(again, graph);
    }

    #[test]
    fn test_fragment_keeps_document_id() {
        let mut graph = KnowledgeGraph::new();
        graph.upsert_entity(Entity::new("acme", "organization", "maker").with_source("d9"));
        let fragment = Fragment::new("d9", graph);

        let decoded = decode_fragment(&encode_fragment(&fragment).unwrap()).unwrap();
        assert_eq!(decoded.document_id, "d9");
        assert_eq!(decoded.built_at, fragment.built_at);
        assert_eq!(decoded.graph, fragment.graph);
    }
}
