//! Jump-distance lookup over the stargate graph.
//!
//! The graph is built once from a [`UniverseTable`] and never mutated
//! afterwards. Gates are undirected: a gate listed on either side connects
//! both systems. Every jump costs one hop.
//!
//! Distance queries are total. A name missing from the table, or a pair of
//! systems in disconnected parts of the map, yields [`Distance::Unknown`]
//! rather than an error, since the table is never a complete universe.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::location::canonical_location;
use super::table::UniverseTable;
use crate::error::Result;

/// Result of a jump-distance query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "jumps", rename_all = "lowercase")]
pub enum Distance {
    Jumps(u32),
    Unknown,
}

impl Distance {
    pub fn jumps(self) -> Option<u32> {
        match self {
            Distance::Jumps(n) => Some(n),
            Distance::Unknown => None,
        }
    }
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Distance::Jumps(n) => write!(f, "{n}j"),
            Distance::Unknown => f.write_str("?j"),
        }
    }
}

#[derive(Debug, Clone)]
struct Node {
    name: String,
    region: Option<String>,
}

/// Immutable adjacency of named locations.
#[derive(Debug, Clone, Default)]
pub struct LocationGraph {
    index: HashMap<String, usize>,
    nodes: Vec<Node>,
    adjacency: Vec<Vec<usize>>,
}

impl LocationGraph {
    /// A graph with no locations. Every distance is unknown.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build the adjacency from a table.
    ///
    /// Systems that only appear as gate targets become nodes without a region.
    /// Self-gates and duplicate gates are ignored.
    pub fn from_table(table: &UniverseTable) -> Self {
        let mut graph = Self::default();

        for entry in &table.systems {
            let idx = graph.intern(&entry.name);
            if entry.region.is_some() {
                graph.nodes[idx].region = entry.region.clone();
            }
        }

        for entry in &table.systems {
            let from = graph.intern(&entry.name);
            for gate in &entry.gates {
                let to = graph.intern(gate);
                if from != to {
                    graph.adjacency[from].push(to);
                    graph.adjacency[to].push(from);
                }
            }
        }

        for neighbours in &mut graph.adjacency {
            neighbours.sort_unstable();
            neighbours.dedup();
        }

        tracing::debug!(systems = graph.nodes.len(), "universe graph built");
        graph
    }

    /// Load a JSON universe table from disk and build the graph.
    ///
    /// # Errors
    /// Returns an error if the table cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let table = UniverseTable::load(path)?;
        let graph = Self::from_table(&table);
        tracing::info!(path = %path.display(), systems = graph.len(), "loaded universe table");
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(&canonical_location(name))
    }

    /// Spelling of `name` as it appears in the table.
    pub fn display_name(&self, name: &str) -> Option<&str> {
        self.lookup(name).map(|idx| self.nodes[idx].name.as_str())
    }

    pub fn region(&self, name: &str) -> Option<&str> {
        self.lookup(name)
            .and_then(|idx| self.nodes[idx].region.as_deref())
    }

    /// Names of systems one jump away from `name`, in table order.
    pub fn neighbours(&self, name: &str) -> Vec<&str> {
        self.lookup(name)
            .map(|idx| {
                self.adjacency[idx]
                    .iter()
                    .map(|&n| self.nodes[n].name.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Minimum number of jumps between two locations.
    pub fn distance(&self, from: &str, to: &str) -> Distance {
        let (Some(start), Some(goal)) = (self.lookup(from), self.lookup(to)) else {
            return Distance::Unknown;
        };
        if start == goal {
            return Distance::Jumps(0);
        }

        let mut hops: Vec<Option<u32>> = vec![None; self.nodes.len()];
        hops[start] = Some(0);
        let mut queue = VecDeque::from([start]);

        while let Some(current) = queue.pop_front() {
            let next_hops = hops[current].unwrap_or(0) + 1;
            for &next in &self.adjacency[current] {
                if hops[next].is_some() {
                    continue;
                }
                if next == goal {
                    return Distance::Jumps(next_hops);
                }
                hops[next] = Some(next_hops);
                queue.push_back(next);
            }
        }

        Distance::Unknown
    }

    fn lookup(&self, name: &str) -> Option<usize> {
        self.index.get(&canonical_location(name)).copied()
    }

    fn intern(&mut self, name: &str) -> usize {
        let key = canonical_location(name);
        if let Some(&idx) = self.index.get(&key) {
            return idx;
        }
        let idx = self.nodes.len();
        self.nodes.push(Node {
            name: name.trim().to_string(),
            region: None,
        });
        self.adjacency.push(Vec::new());
        self.index.insert(key, idx);
        idx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::universe::SystemEntry;

    fn entry(name: &str, region: &str, gates: &[&str]) -> SystemEntry {
        SystemEntry {
            name: name.to_string(),
            region: Some(region.to_string()),
            gates: gates.iter().map(|g| g.to_string()).collect(),
        }
    }

    /// A - B - C - D, plus a detached island E - F.
    fn line_graph() -> LocationGraph {
        LocationGraph::from_table(&UniverseTable {
            systems: vec![
                entry("A-1", "North", &["B-2"]),
                entry("B-2", "North", &["C-3"]),
                entry("C-3", "South", &["D-4"]),
                entry("D-4", "South", &[]),
                entry("E-5", "Island", &["F-6"]),
            ],
        })
    }

    #[test]
    fn distance_to_self_is_zero() {
        let graph = line_graph();
        assert_eq!(graph.distance("C-3", "c-3"), Distance::Jumps(0));
    }

    #[test]
    fn counts_hops_along_shortest_path() {
        let graph = line_graph();
        assert_eq!(graph.distance("A-1", "D-4"), Distance::Jumps(3));
        assert_eq!(graph.distance("D-4", "A-1"), Distance::Jumps(3));
    }

    #[test]
    fn shortcut_wins_over_long_route() {
        let mut table = UniverseTable {
            systems: line_graph_entries(),
        };
        table.systems[0].gates.push("D-4".into());
        let graph = LocationGraph::from_table(&table);
        assert_eq!(graph.distance("A-1", "D-4"), Distance::Jumps(1));
        assert_eq!(graph.distance("B-2", "D-4"), Distance::Jumps(2));
    }

    fn line_graph_entries() -> Vec<SystemEntry> {
        vec![
            entry("A-1", "North", &["B-2"]),
            entry("B-2", "North", &["C-3"]),
            entry("C-3", "South", &["D-4"]),
            entry("D-4", "South", &[]),
        ]
    }

    #[test]
    fn disconnected_and_missing_are_unknown() {
        let graph = line_graph();
        assert_eq!(graph.distance("A-1", "F-6"), Distance::Unknown);
        assert_eq!(graph.distance("A-1", "NOPE"), Distance::Unknown);
        assert_eq!(graph.distance("NOPE", "NOPE"), Distance::Unknown);
    }

    #[test]
    fn gate_only_targets_become_nodes() {
        let graph = line_graph();
        assert!(graph.contains("f-6"));
        assert_eq!(graph.region("F-6"), None);
        assert_eq!(graph.region("e-5"), Some("Island"));
        assert_eq!(graph.distance("F-6", "E-5"), Distance::Jumps(1));
    }

    #[test]
    fn neighbours_are_deduplicated() {
        let graph = LocationGraph::from_table(&UniverseTable {
            systems: vec![
                entry("A-1", "North", &["B-2", "b-2", "A-1"]),
                entry("B-2", "North", &["A-1"]),
            ],
        });
        assert_eq!(graph.neighbours("A-1"), vec!["B-2"]);
        assert_eq!(graph.neighbours("B-2"), vec!["A-1"]);
    }

    #[test]
    fn empty_graph_knows_nothing() {
        let graph = LocationGraph::empty();
        assert!(graph.is_empty());
        assert_eq!(graph.distance("A", "A"), Distance::Unknown);
    }

    #[test]
    fn distance_display() {
        assert_eq!(Distance::Jumps(4).to_string(), "4j");
        assert_eq!(Distance::Unknown.to_string(), "?j");
    }
}
