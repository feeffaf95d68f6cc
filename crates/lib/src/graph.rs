//! Dependency graph over target and import keys.
//!
//! Edges run from a dependency to its dependent, so a leaf is a node with no
//! remaining dependencies. The graph uses stable indices so vertices can be
//! deleted while other indices stay valid.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use thiserror::Error;

use crate::layout::Layout;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
  #[error("dependency cycle detected at {0}")]
  CycleDetected(String),

  #[error("unknown graph node: {0}")]
  UnknownNode(String),
}

#[derive(Debug, Clone, Default)]
pub struct DepGraph {
  graph: StableDiGraph<String, ()>,
  nodes: HashMap<String, NodeIndex>,
}

impl DepGraph {
  pub fn new() -> Self {
    Self::default()
  }

  /// Build the graph of a layout.
  ///
  /// Every declared dependency becomes a node, whether or not the layout has
  /// an entry for it; keys without an entry are imports. An input file that
  /// another target declares as output is replaced by its producer.
  pub fn from_layout(layout: &Layout) -> Result<Self, GraphError> {
    let mut dag = Self::new();
    for entry in layout.entries() {
      dag.add_node(&entry.key);
      for dep in entry.deps.all() {
        match layout.producer_of(dep) {
          Some(producer) if producer != entry.key => dag.add_edge(producer, &entry.key),
          Some(_) => {}
          None => dag.add_edge(dep, &entry.key),
        }
      }
    }
    dag.verify_acyclic()?;
    Ok(dag)
  }

  pub fn add_node(&mut self, key: &str) -> NodeIndex {
    if let Some(&idx) = self.nodes.get(key) {
      return idx;
    }
    let idx = self.graph.add_node(key.to_string());
    self.nodes.insert(key.to_string(), idx);
    idx
  }

  /// Record that `dependent` needs `dependency`.
  pub fn add_edge(&mut self, dependency: &str, dependent: &str) {
    let from = self.add_node(dependency);
    let to = self.add_node(dependent);
    if self.graph.find_edge(from, to).is_none() {
      self.graph.add_edge(from, to, ());
    }
  }

  pub fn contains(&self, key: &str) -> bool {
    self.nodes.contains_key(key)
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  /// All keys, sorted.
  pub fn keys(&self) -> Vec<String> {
    let mut keys: Vec<String> = self.nodes.keys().cloned().collect();
    keys.sort();
    keys
  }

  pub fn dependencies(&self, key: &str) -> Vec<String> {
    self.neighbors(key, Direction::Incoming)
  }

  pub fn dependents(&self, key: &str) -> Vec<String> {
    self.neighbors(key, Direction::Outgoing)
  }

  /// Nodes with no remaining dependencies, sorted.
  pub fn leaves(&self) -> Vec<String> {
    let mut leaves: Vec<String> = self
      .graph
      .node_indices()
      .filter(|&idx| self.graph.neighbors_directed(idx, Direction::Incoming).next().is_none())
      .map(|idx| self.graph[idx].clone())
      .collect();
    leaves.sort();
    leaves
  }

  /// The subgraph induced by `keys`. Keys not in the graph are ignored.
  pub fn subgraph<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> DepGraph {
    let keep: HashSet<&str> = keys.into_iter().filter(|k| self.contains(k)).collect();
    let mut sub = DepGraph::new();
    let mut ordered: Vec<&str> = keep.iter().copied().collect();
    ordered.sort();
    for key in &ordered {
      sub.add_node(key);
    }
    for edge in self.graph.edge_indices() {
      if let Some((from, to)) = self.graph.edge_endpoints(edge) {
        let (from, to) = (self.graph[from].as_str(), self.graph[to].as_str());
        if keep.contains(from) && keep.contains(to) {
          sub.add_edge(from, to);
        }
      }
    }
    sub
  }

  /// `keys` plus everything they depend on, up to `depth` edges away.
  pub fn upstream<'a>(&self, keys: impl IntoIterator<Item = &'a str>, depth: Option<usize>) -> BTreeSet<String> {
    self.neighborhood(keys, Direction::Incoming, depth)
  }

  /// Everything that transitively depends on `key`, excluding `key` itself.
  pub fn downstream(&self, key: &str) -> Vec<String> {
    let mut reached = self.neighborhood([key], Direction::Outgoing, None);
    reached.remove(key);
    reached.into_iter().collect()
  }

  pub fn remove<'a>(&mut self, keys: impl IntoIterator<Item = &'a str>) {
    for key in keys {
      if let Some(idx) = self.nodes.remove(key) {
        self.graph.remove_node(idx);
      }
    }
  }

  /// Keys in an order where dependencies come before dependents.
  pub fn topological_order(&self) -> Result<Vec<String>, GraphError> {
    let sorted = toposort(&self.graph, None).map_err(|cycle| GraphError::CycleDetected(self.graph[cycle.node_id()].clone()))?;
    Ok(sorted.into_iter().map(|idx| self.graph[idx].clone()).collect())
  }

  /// Group nodes into waves whose members only depend on earlier waves.
  pub fn waves(&self) -> Result<Vec<Vec<String>>, GraphError> {
    let mut in_degree: HashMap<NodeIndex, usize> = HashMap::new();
    for idx in self.graph.node_indices() {
      in_degree.insert(idx, self.graph.neighbors_directed(idx, Direction::Incoming).count());
    }

    let mut remaining: HashSet<NodeIndex> = self.graph.node_indices().collect();
    let mut waves = Vec::new();

    while !remaining.is_empty() {
      let ready: Vec<NodeIndex> = remaining.iter().filter(|&&idx| in_degree[&idx] == 0).copied().collect();

      if ready.is_empty() {
        let stuck = remaining.iter().map(|&idx| self.graph[idx].clone()).min().unwrap_or_default();
        return Err(GraphError::CycleDetected(stuck));
      }

      for &idx in &ready {
        remaining.remove(&idx);
        for neighbor in self.graph.neighbors_directed(idx, Direction::Outgoing) {
          if let Some(deg) = in_degree.get_mut(&neighbor) {
            *deg = deg.saturating_sub(1);
          }
        }
      }

      let mut wave: Vec<String> = ready.into_iter().map(|idx| self.graph[idx].clone()).collect();
      wave.sort();
      waves.push(wave);
    }

    Ok(waves)
  }

  fn verify_acyclic(&self) -> Result<(), GraphError> {
    self.topological_order().map(|_| ())
  }

  fn neighbors(&self, key: &str, direction: Direction) -> Vec<String> {
    let Some(&idx) = self.nodes.get(key) else {
      return Vec::new();
    };
    let mut out: Vec<String> = self
      .graph
      .neighbors_directed(idx, direction)
      .map(|n| self.graph[n].clone())
      .collect();
    out.sort();
    out.dedup();
    out
  }

  fn neighborhood<'a>(
    &self,
    keys: impl IntoIterator<Item = &'a str>,
    direction: Direction,
    depth: Option<usize>,
  ) -> BTreeSet<String> {
    let mut seen: HashSet<NodeIndex> = HashSet::new();
    let mut queue: VecDeque<(NodeIndex, usize)> = VecDeque::new();

    for key in keys {
      if let Some(&idx) = self.nodes.get(key)
        && seen.insert(idx)
      {
        queue.push_back((idx, 0));
      }
    }

    while let Some((idx, dist)) = queue.pop_front() {
      if depth.is_some_and(|max| dist >= max) {
        continue;
      }
      for next in self.graph.neighbors_directed(idx, direction) {
        if seen.insert(next) {
          queue.push_back((next, dist + 1));
        }
      }
    }

    seen.into_iter().map(|idx| self.graph[idx].clone()).collect()
  }
}
