use crate::{Predicate, ValidationError, Value};
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

pub type GraphId = Uuid;
pub type NodeId = String;

/// Graph definition as submitted by a caller.
///
/// An entry of `edges` may carry an inline `condition`; such edges are
/// moved to `conditional_edges` after the explicitly declared ones.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "DefinitionRepr")]
pub struct GraphDefinition {
    pub name: String,
    pub description: Option<String>,
    pub nodes: Vec<NodeSpec>,
    pub edges: Vec<Edge>,
    pub conditional_edges: Vec<ConditionalEdge>,
    pub loops: Vec<LoopSpec>,
    pub entry: NodeId,
}

#[derive(Deserialize)]
struct DefinitionRepr {
    name: String,
    #[serde(default)]
    description: Option<String>,
    nodes: Vec<NodeSpec>,
    #[serde(default)]
    edges: Vec<EdgeRepr>,
    #[serde(default)]
    conditional_edges: Vec<ConditionalEdge>,
    #[serde(default)]
    loops: Vec<LoopSpec>,
    #[serde(alias = "entry_point")]
    entry: NodeId,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct EdgeRepr {
    #[serde(alias = "from_node")]
    from: NodeId,
    #[serde(alias = "to_node")]
    to: NodeId,
    #[serde(default)]
    condition: Option<Predicate>,
}

impl From<DefinitionRepr> for GraphDefinition {
    fn from(repr: DefinitionRepr) -> Self {
        let mut edges = Vec::new();
        let mut conditional_edges = repr.conditional_edges;
        for edge in repr.edges {
            match edge.condition {
                Some(when) => conditional_edges.push(ConditionalEdge {
                    from: edge.from,
                    when,
                    to: edge.to,
                }),
                None => edges.push(Edge {
                    from: edge.from,
                    to: edge.to,
                }),
            }
        }

        Self {
            name: repr.name,
            description: repr.description,
            nodes: repr.nodes,
            edges,
            conditional_edges,
            loops: repr.loops,
            entry: repr.entry,
        }
    }
}

impl GraphDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn add_node(&mut self, node: NodeSpec) -> NodeId {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    pub fn connect(&mut self, from: impl Into<NodeId>, to: impl Into<NodeId>) {
        self.edges.push(Edge {
            from: from.into(),
            to: to.into(),
        });
    }

    /// Add a conditional edge. Conditional edges of a node are tried in the
    /// order they were added.
    pub fn connect_if(&mut self, from: impl Into<NodeId>, when: Predicate, to: impl Into<NodeId>) {
        self.conditional_edges.push(ConditionalEdge {
            from: from.into(),
            when,
            to: to.into(),
        });
    }

    pub fn add_loop(&mut self, spec: LoopSpec) {
        self.loops.push(spec);
    }

    pub fn set_entry(&mut self, entry: impl Into<NodeId>) {
        self.entry = entry.into();
    }

    pub fn find_node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// A node: one tool plus static parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    #[serde(alias = "name")]
    pub id: NodeId,
    pub tool: String,
    #[serde(default, alias = "config")]
    pub params: HashMap<String, Value>,
}

impl NodeSpec {
    pub fn new(id: impl Into<NodeId>, tool: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tool: tool.into(),
            params: HashMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Edge {
    #[serde(alias = "from_node")]
    pub from: NodeId,
    #[serde(alias = "to_node")]
    pub to: NodeId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionalEdge {
    #[serde(alias = "from_node")]
    pub from: NodeId,
    #[serde(alias = "condition")]
    pub when: Predicate,
    #[serde(alias = "to_node")]
    pub to: NodeId,
}

/// Bounded loop attached to a loop-entry node.
///
/// After the entry node runs, `body` runs in order, then `continue_while`
/// is evaluated. The body repeats while it holds, at most `max_iterations`
/// times.
///
/// In JSON the condition is given either as `continue_while` or as an exit
/// `condition`, which is stored negated. A `body` is always required.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "LoopRepr")]
pub struct LoopSpec {
    pub node: NodeId,
    pub body: LoopBody,
    pub continue_while: Predicate,
    pub max_iterations: u32,
    pub exit: Option<NodeId>,
}

#[derive(Deserialize)]
struct LoopRepr {
    node: NodeId,
    #[serde(default)]
    body: Option<LoopBody>,
    #[serde(default)]
    continue_while: Option<Predicate>,
    #[serde(default)]
    condition: Option<Predicate>,
    #[serde(default = "default_max_iterations")]
    max_iterations: u32,
    #[serde(default)]
    exit: Option<NodeId>,
}

impl TryFrom<LoopRepr> for LoopSpec {
    type Error = String;

    fn try_from(repr: LoopRepr) -> Result<Self, Self::Error> {
        let body = repr.body.ok_or_else(|| {
            format!("loop on `{}` needs a `body` listing the nodes it repeats", repr.node)
        })?;
        let continue_while = match (repr.continue_while, repr.condition) {
            (Some(predicate), None) => predicate,
            (None, Some(exit_when)) => exit_when.negate(),
            (Some(_), Some(_)) => {
                return Err(format!(
                    "loop on `{}` sets both `continue_while` and `condition`",
                    repr.node
                ))
            }
            (None, None) => {
                return Err(format!(
                    "loop on `{}` needs `continue_while` or an exit `condition`",
                    repr.node
                ))
            }
        };

        Ok(Self {
            node: repr.node,
            body,
            continue_while,
            max_iterations: repr.max_iterations,
            exit: repr.exit,
        })
    }
}

fn default_max_iterations() -> u32 {
    10
}

impl LoopSpec {
    pub fn new(node: impl Into<NodeId>, body: impl Into<LoopBody>, continue_while: Predicate) -> Self {
        Self {
            node: node.into(),
            body: body.into(),
            continue_while,
            max_iterations: default_max_iterations(),
            exit: None,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_exit(mut self, exit: impl Into<NodeId>) -> Self {
        self.exit = Some(exit.into());
        self
    }
}

/// A single body node or a sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LoopBody {
    Single(NodeId),
    Sequence(Vec<NodeId>),
}

impl LoopBody {
    pub fn nodes(&self) -> &[NodeId] {
        match self {
            LoopBody::Single(id) => std::slice::from_ref(id),
            LoopBody::Sequence(ids) => ids,
        }
    }
}

impl From<&str> for LoopBody {
    fn from(id: &str) -> Self {
        LoopBody::Single(id.to_string())
    }
}

impl From<String> for LoopBody {
    fn from(id: String) -> Self {
        LoopBody::Single(id)
    }
}

impl From<Vec<&str>> for LoopBody {
    fn from(ids: Vec<&str>) -> Self {
        LoopBody::Sequence(ids.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<String>> for LoopBody {
    fn from(ids: Vec<String>) -> Self {
        LoopBody::Sequence(ids)
    }
}

/// A validated, indexed graph. Immutable; share it behind an `Arc`.
#[derive(Debug, Clone)]
pub struct Graph {
    id: GraphId,
    definition: GraphDefinition,
    nodes: HashMap<NodeId, NodeSpec>,
    edges: HashMap<NodeId, NodeId>,
    conditional: HashMap<NodeId, Vec<(Predicate, NodeId)>>,
    loops: HashMap<NodeId, LoopSpec>,
}

impl Graph {
    /// Validate a definition and build the lookup tables the walker uses.
    pub fn compile(definition: GraphDefinition) -> Result<Self, ValidationError> {
        Self::compile_with_id(Uuid::new_v4(), definition)
    }

    pub fn compile_with_id(id: GraphId, definition: GraphDefinition) -> Result<Self, ValidationError> {
        if definition.entry.is_empty() {
            return Err(ValidationError::MissingEntry);
        }

        let mut nodes = HashMap::new();
        for node in &definition.nodes {
            if node.tool.trim().is_empty() {
                return Err(ValidationError::EmptyTool(node.id.clone()));
            }
            if nodes.insert(node.id.clone(), node.clone()).is_some() {
                return Err(ValidationError::DuplicateNode(node.id.clone()));
            }
        }

        if !nodes.contains_key(&definition.entry) {
            return Err(ValidationError::UnknownEntry(definition.entry.clone()));
        }

        let dangling = |from: &NodeId, to: &NodeId| ValidationError::DanglingEdge {
            from: from.clone(),
            to: to.clone(),
        };

        let mut edges = HashMap::new();
        for edge in &definition.edges {
            if !nodes.contains_key(&edge.from) || !nodes.contains_key(&edge.to) {
                return Err(dangling(&edge.from, &edge.to));
            }
            if edges.insert(edge.from.clone(), edge.to.clone()).is_some() {
                return Err(ValidationError::AmbiguousEdges(edge.from.clone()));
            }
        }

        let mut conditional: HashMap<NodeId, Vec<(Predicate, NodeId)>> = HashMap::new();
        for edge in &definition.conditional_edges {
            if !nodes.contains_key(&edge.from) || !nodes.contains_key(&edge.to) {
                return Err(dangling(&edge.from, &edge.to));
            }
            conditional
                .entry(edge.from.clone())
                .or_default()
                .push((edge.when.clone(), edge.to.clone()));
        }

        let mut loops = HashMap::new();
        for spec in &definition.loops {
            let unknown = |missing: &NodeId| ValidationError::UnknownLoopNode {
                node: spec.node.clone(),
                missing: missing.clone(),
            };

            if !nodes.contains_key(&spec.node) {
                return Err(unknown(&spec.node));
            }
            if spec.body.nodes().is_empty() {
                return Err(ValidationError::EmptyLoopBody(spec.node.clone()));
            }
            if let Some(missing) = spec.body.nodes().iter().find(|id| !nodes.contains_key(*id)) {
                return Err(unknown(missing));
            }
            if let Some(exit) = spec.exit.as_ref().filter(|exit| !nodes.contains_key(*exit)) {
                return Err(unknown(exit));
            }
            if spec.max_iterations == 0 {
                return Err(ValidationError::InvalidLoopBound(spec.node.clone()));
            }
            if loops.insert(spec.node.clone(), spec.clone()).is_some() {
                return Err(ValidationError::DuplicateLoop(spec.node.clone()));
            }
        }

        for spec in loops.values() {
            if let Some(body) = spec.body.nodes().iter().find(|id| loops.contains_key(*id)) {
                return Err(ValidationError::NestedLoop {
                    node: spec.node.clone(),
                    body: body.clone(),
                });
            }
        }

        let graph = Self {
            id,
            definition,
            nodes,
            edges,
            conditional,
            loops,
        };

        if graph.has_undeclared_cycle() {
            tracing::warn!(
                "Graph {} ({}) has a cycle outside any declared loop; runs are bounded by the step limit",
                graph.id,
                graph.definition.name
            );
        }

        tracing::debug!("Compiled graph {} with {} nodes", graph.id, graph.nodes.len());
        Ok(graph)
    }

    /// Whether plain or conditional edges form a cycle. Loop bodies are not
    /// edges and do not count.
    pub fn has_undeclared_cycle(&self) -> bool {
        let mut graph = DiGraph::<&str, ()>::new();
        let index: HashMap<&str, _> = self
            .definition
            .nodes
            .iter()
            .map(|n| (n.id.as_str(), graph.add_node(n.id.as_str())))
            .collect();

        let targets = self.edges.iter().chain(
            self.conditional
                .iter()
                .flat_map(|(from, list)| list.iter().map(move |(_, to)| (from, to))),
        );

        let mut seen = HashSet::new();
        for (from, to) in targets {
            if seen.insert((from.as_str(), to.as_str())) {
                graph.add_edge(index[from.as_str()], index[to.as_str()], ());
            }
        }

        is_cyclic_directed(&graph)
    }

    pub fn id(&self) -> GraphId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &GraphDefinition {
        &self.definition
    }

    pub fn entry(&self) -> &NodeId {
        &self.definition.entry
    }

    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.get(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge(&self, from: &str) -> Option<&NodeId> {
        self.edges.get(from)
    }

    /// Conditional edges of `from` in declaration order.
    pub fn conditional_edges(&self, from: &str) -> &[(Predicate, NodeId)] {
        self.conditional.get(from).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn loop_at(&self, node: &str) -> Option<&LoopSpec> {
        self.loops.get(node)
    }
}
