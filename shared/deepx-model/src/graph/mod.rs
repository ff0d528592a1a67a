//! Immutable compiled DAG of typed operator nodes.
//!
//! REDESIGN (see DESIGN.md): the original aliases raw
//! pointers between nodes, with an optional heap-owned node set. Here the
//! graph is an arena -- a `Vec<GraphNode>` -- and every input reference is
//! a plain `usize` index into that arena. [`GraphBuilder`] accumulates
//! nodes (a node's inputs must already exist in the builder, so insertion
//! order is already a valid topological order); [`Graph::compile`] turns a
//! builder plus a set of target indices into the immutable, per-target
//! forward-chain form the rest of the runtime consumes.

mod node;
pub mod scope;

pub use node::{GraphNode, InitializerSpec, NodeType, TensorType};

use deepx_core::stream::{InStream, OutStream, Result as StreamResult};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};

/// Bumped whenever the on-disk shape of `graph.bin` changes (node format is
/// independently versioned via [`node::GRAPH_NODE_VERSION`]).
pub const GRAPH_VERSION: u32 = 0;

/// Accumulates [`GraphNode`]s before compilation. A node's `inputs` must
/// reference indices already pushed into this builder.
#[derive(Default)]
pub struct GraphBuilder {
    nodes: Vec<GraphNode>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        GraphBuilder { nodes: Vec::new() }
    }

    /// Pushes a node, auto-generating its name as `"n<id>"` if empty (per
    /// §4.4 step 2) and assigning its `node_id` as the arena index.
    pub fn push(&mut self, mut node: GraphNode) -> usize {
        let id = self.nodes.len() as u16;
        if node.name.is_empty() {
            node.name = format!("n{id}");
        }
        node.node_id = id;
        self.nodes.push(node);
        id as usize
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_name(&self, index: usize) -> &str {
        &self.nodes[index].name
    }
}

/// One compiled target: its root node index plus the topologically
/// ordered, deduplicated forward chain of node indices reachable from it.
pub struct Target {
    pub root: usize,
    pub forward: Vec<usize>,
}

/// An immutable compiled DAG. Holds every node reachable from any target,
/// plus one [`Target`] per compiled root, looked up by name or id.
pub struct Graph {
    nodes: Vec<GraphNode>,
    name_to_index: IndexMap<String, usize>,
    targets: IndexMap<String, Target>,
    /// Target's root node index -> target name, the id-keyed counterpart
    /// of `targets` (§3's "name->target, id->target" data model).
    id_to_target: HashMap<usize, String>,
    meta: IndexMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("duplicate node name {0:?}")]
    DuplicateName(String),
    #[error("invalid node name {0:?}")]
    InvalidName(String),
    #[error("target index {0} out of range")]
    BadTarget(usize),
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'/' | b':'))
}

impl Graph {
    /// Compiles `targets` (indices into `builder`) into an immutable graph.
    /// DFS from each target collects the reachable subgraph into an ordered,
    /// deduplicated forward sequence (root last); `need_grad`/`input_fork`
    /// are computed afterward over the full reachable set (§4.4 steps 1-4).
    pub fn compile(builder: GraphBuilder, targets: &[usize]) -> Result<Graph, CompileError> {
        let mut nodes = builder.nodes;

        let mut name_to_index: IndexMap<String, usize> = IndexMap::new();
        for (i, n) in nodes.iter().enumerate() {
            if !valid_name(&n.name) {
                return Err(CompileError::InvalidName(n.name.clone()));
            }
            if name_to_index.insert(n.name.clone(), i).is_some() {
                return Err(CompileError::DuplicateName(n.name.clone()));
            }
        }

        let mut reachable: HashSet<usize> = HashSet::new();
        let mut compiled_targets = IndexMap::new();
        for &root in targets {
            if root >= nodes.len() {
                return Err(CompileError::BadTarget(root));
            }
            let forward = forward_chain(&nodes, root);
            reachable.extend(forward.iter().copied());
            let name = nodes[root].name.clone();
            compiled_targets.insert(name, Target { root, forward });
        }

        // need_grad: a node needs grad iff it declared need_grad AND any
        // consumer needs its gradient. Consumers are discovered by a
        // reverse scan; iterate to a fixpoint since "needs grad" can
        // propagate transitively backward through a chain of consumers.
        let mut consumer_needs_grad = vec![false; nodes.len()];
        loop {
            let mut changed = false;
            for i in 0..nodes.len() {
                if !nodes[i].declared_need_grad {
                    continue;
                }
                let any_consumer_needs = nodes.iter().any(|n| {
                    n.inputs.contains(&i) && (n.declared_need_grad || consumer_needs_grad[n.node_id as usize])
                }) || compiled_targets.values().any(|t| t.root == i);
                if any_consumer_needs && !consumer_needs_grad[i] {
                    consumer_needs_grad[i] = true;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        for (i, n) in nodes.iter_mut().enumerate() {
            n.need_grad = n.declared_need_grad && consumer_needs_grad[i];
        }

        // input_fork: set on a node when one of ITS inputs has >=2 distinct
        // consumers across the whole compiled graph.
        let mut consumer_count = vec![0usize; nodes.len()];
        for n in &nodes {
            for &inp in &n.inputs {
                consumer_count[inp] += 1;
            }
        }
        for n in nodes.iter_mut() {
            n.input_fork = n.inputs.iter().any(|&inp| consumer_count[inp] >= 2);
        }

        let id_to_target = compiled_targets
            .iter()
            .map(|(name, target)| (target.root, name.clone()))
            .collect();

        Ok(Graph {
            nodes,
            name_to_index,
            targets: compiled_targets,
            id_to_target,
            meta: IndexMap::new(),
        })
    }

    pub fn set_meta(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.meta.insert(key.into(), value.into());
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.meta.get(key).map(String::as_str)
    }

    pub fn node(&self, index: usize) -> &GraphNode {
        &self.nodes[index]
    }

    pub fn node_by_name(&self, name: &str) -> Option<&GraphNode> {
        self.name_to_index.get(name).map(|&i| &self.nodes[i])
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn target(&self, name: &str) -> Option<&Target> {
        self.targets.get(name)
    }

    /// Looks up a target by its root node's id (arena index), the
    /// id-keyed counterpart of [`Self::target`].
    pub fn target_by_id(&self, id: usize) -> Option<&Target> {
        let name = self.id_to_target.get(&id)?;
        self.targets.get(name)
    }

    pub fn target_names(&self) -> impl Iterator<Item = &str> {
        self.targets.keys().map(String::as_str)
    }

    /// Serialises the compiled graph to `graph.bin` form (§6): every node,
    /// then each target's (name, root index), then the meta map. `forward`,
    /// `need_grad`, and `input_fork` are not persisted -- they're
    /// recomputed by [`Graph::read`] the same way [`Graph::compile`]
    /// computes them the first time, so a stale on-disk copy can never
    /// disagree with what a fresh compile would produce.
    pub fn write(&self, os: &mut dyn OutStream) -> StreamResult<()> {
        os.write_u32_(GRAPH_VERSION)?;
        os.write_container_len(self.nodes.len())?;
        for node in &self.nodes {
            node.write(os)?;
        }
        os.write_container_len(self.targets.len())?;
        for target in self.targets.values() {
            os.write_u32_(target.root as u32)?;
        }
        os.write_container_len(self.meta.len())?;
        for (k, v) in &self.meta {
            os.write_str_(k)?;
            os.write_str_(v)?;
        }
        Ok(())
    }

    /// Reads a graph written by [`Self::write`], rebuilding `forward_chain`,
    /// `need_grad`, and `input_fork` via [`Graph::compile`] rather than
    /// trusting persisted values for them.
    pub fn read(is: &mut InStream<'_>) -> StreamResult<Graph> {
        let version = is.read_u32_()?;
        if version > GRAPH_VERSION {
            return Err(deepx_core::error::SerializationError::VersionTooNew {
                found: version,
                max_supported: GRAPH_VERSION,
            });
        }

        let n_nodes = is.read_container_len()?;
        let mut builder = GraphBuilder::new();
        for _ in 0..n_nodes {
            let node = GraphNode::read(is)?;
            builder.push(node);
        }

        let n_targets = is.read_container_len()?;
        let mut roots = Vec::with_capacity(n_targets);
        for _ in 0..n_targets {
            roots.push(is.read_u32_()? as usize);
        }

        let n_meta = is.read_container_len()?;
        let mut meta = IndexMap::new();
        for _ in 0..n_meta {
            let k = is.read_string()?;
            let v = is.read_string()?;
            meta.insert(k, v);
        }

        let mut graph = Graph::compile(builder, &roots).map_err(|_| {
            deepx_core::error::SerializationError::Corrupt("graph.bin failed to recompile")
        })?;
        graph.meta = meta;
        Ok(graph)
    }
}

/// DFS from `root` over `input` edges, producing a deduplicated
/// topological order with `root` last (§8 property 3).
fn forward_chain(nodes: &[GraphNode], root: usize) -> Vec<usize> {
    let mut visited = vec![false; nodes.len()];
    let mut order = Vec::new();

    fn visit(nodes: &[GraphNode], i: usize, visited: &mut [bool], order: &mut Vec<usize>) {
        if visited[i] {
            return;
        }
        visited[i] = true;
        for &inp in &nodes[i].inputs {
            visit(nodes, inp, visited, order);
        }
        order.push(i);
    }

    visit(nodes, root, &mut visited, &mut order);
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use crate::graph::node::GraphNode;
    use deepx_core::shape::Shape;

    fn leaf(name: &str) -> GraphNode {
        GraphNode::new(name, NodeType::Param, TensorType::Tsr, Shape::from_dims(&[1]))
    }

    #[test]
    fn forward_chain_is_topological_with_root_last() {
        let mut b = GraphBuilder::new();
        let a = b.push(leaf("a"));
        let c = b.push(leaf("b"));
        let mut add = leaf("add");
        add.inputs = vec![a, c];
        let add_idx = b.push(add);

        let g = Graph::compile(b, &[add_idx]).unwrap();
        let t = g.target("add").unwrap();
        assert_eq!(t.forward.last().copied(), Some(add_idx));
        let pos_a = t.forward.iter().position(|&i| i == a).unwrap();
        let pos_add = t.forward.iter().position(|&i| i == add_idx).unwrap();
        assert!(pos_a < pos_add);
    }

    #[test]
    fn input_fork_set_when_input_has_two_consumers() {
        let mut b = GraphBuilder::new();
        let shared = b.push(leaf("shared"));
        let mut left = leaf("left");
        left.inputs = vec![shared];
        let left_idx = b.push(left);
        let mut right = leaf("right");
        right.inputs = vec![shared];
        let right_idx = b.push(right);
        let mut out = leaf("out");
        out.inputs = vec![left_idx, right_idx];
        let out_idx = b.push(out);

        let g = Graph::compile(b, &[out_idx]).unwrap();
        assert!(g.node(shared).input_fork);
        assert!(!g.node(left_idx).input_fork);
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut b = GraphBuilder::new();
        b.push(leaf("x"));
        let dup = b.push(leaf("x"));
        assert!(matches!(
            Graph::compile(b, &[dup]),
            Err(CompileError::DuplicateName(_))
        ));
    }

    #[test]
    fn empty_name_is_auto_generated() {
        let mut b = GraphBuilder::new();
        let idx = b.push(leaf(""));
        let g = Graph::compile(b, &[idx]).unwrap();
        assert_eq!(g.node(idx).name, format!("n{idx}"));
    }

    #[test]
    fn target_by_id_matches_target_by_name() {
        let mut b = GraphBuilder::new();
        let a = b.push(leaf("a"));
        let c = b.push(leaf("b"));
        let mut add = leaf("add");
        add.inputs = vec![a, c];
        let add_idx = b.push(add);

        let g = Graph::compile(b, &[add_idx]).unwrap();
        let by_id = g.target_by_id(add_idx).unwrap();
        let by_name = g.target("add").unwrap();
        assert_eq!(by_id.root, by_name.root);
        assert!(g.target_by_id(a).is_none());
    }

    #[test]
    fn write_then_read_round_trips_topology_and_meta() {
        let mut b = GraphBuilder::new();
        let a = b.push(leaf("a"));
        let c = b.push(leaf("b"));
        let mut add = leaf("add").needing_grad();
        add.inputs = vec![a, c];
        let add_idx = b.push(add);

        let mut g = Graph::compile(b, &[add_idx]).unwrap();
        g.set_meta("checksum", "abc123");

        let bytes = deepx_core::stream::to_bytes(|os| g.write(os));
        let mut is = deepx_core::stream::InStream::new(&bytes);
        let back = Graph::read(&mut is).unwrap();

        assert_eq!(back.nodes().len(), g.nodes().len());
        assert_eq!(back.meta("checksum"), Some("abc123"));
        let t = back.target("add").unwrap();
        assert_eq!(t.forward.last().copied(), Some(add_idx));
        assert!(back.node(add_idx).need_grad);
        assert!(back.node_by_name("a").is_some());
    }
}
