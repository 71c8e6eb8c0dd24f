//! Foreign-key dependency ordering
//!
//! Orders tables so every table comes after the tables it references. A
//! cycle abandons ordering entirely and yields alphabetical order.

use crate::db::TableInfo;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Table name to the set of tables it references via foreign keys
#[derive(Clone, Debug, Default)]
pub struct DependencyGraph {
    edges: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `table` holds a foreign key into `referenced`
    pub fn add_reference(&mut self, table: &str, referenced: &str) {
        self.edges
            .entry(table.to_string())
            .or_default()
            .insert(referenced.to_string());
    }

    pub fn references(&self, table: &str) -> impl Iterator<Item = &str> {
        self.edges
            .get(table)
            .into_iter()
            .flat_map(|deps| deps.iter().map(String::as_str))
    }
}

impl<S: AsRef<str>> FromIterator<(S, S)> for DependencyGraph {
    fn from_iter<I: IntoIterator<Item = (S, S)>>(iter: I) -> Self {
        let mut graph = DependencyGraph::new();
        for (table, referenced) in iter {
            graph.add_reference(table.as_ref(), referenced.as_ref());
        }
        graph
    }
}

struct CycleDetected(String);

struct Visitor<'a> {
    graph: &'a DependencyGraph,
    known: HashSet<&'a str>,
    visited: HashSet<&'a str>,
    in_progress: HashSet<&'a str>,
    sorted: Vec<&'a str>,
}

impl<'a> Visitor<'a> {
    fn visit(&mut self, table: &'a str) -> Result<(), CycleDetected> {
        if self.visited.contains(table) {
            return Ok(());
        }
        if !self.in_progress.insert(table) {
            return Err(CycleDetected(table.to_string()));
        }

        let graph = self.graph;
        for dep in graph.references(table) {
            // Unknown targets and self references do not constrain order
            if dep == table {
                continue;
            }
            if let Some(&dep) = self.known.get(dep) {
                self.visit(dep)?;
            }
        }

        self.in_progress.remove(table);
        self.visited.insert(table);
        self.sorted.push(table);
        Ok(())
    }
}

fn alphabetical(tables: &[String]) -> Vec<String> {
    let mut sorted = tables.to_vec();
    sorted.sort();
    sorted
}

/// Depth-first topological order over `tables`.
///
/// References to tables outside the working set are ignored. Any cycle makes
/// the whole result fall back to alphabetical order.
pub fn order_by_dependencies(tables: &[String], graph: &DependencyGraph) -> Vec<String> {
    let mut visitor = Visitor {
        graph,
        known: tables.iter().map(String::as_str).collect(),
        visited: HashSet::new(),
        in_progress: HashSet::new(),
        sorted: Vec::with_capacity(tables.len()),
    };

    for table in tables {
        if let Err(CycleDetected(at)) = visitor.visit(table) {
            tracing::warn!("dependency cycle detected at '{}', using alphabetical order", at);
            return alphabetical(tables);
        }
    }

    let mut ordered: Vec<String> = visitor.sorted.iter().map(|s| s.to_string()).collect();
    // Reconcile: anything the walk did not emit is appended
    let emitted: HashSet<&str> = visitor.sorted.iter().copied().collect();
    for table in tables {
        if !emitted.contains(table.as_str()) {
            ordered.push(table.clone());
        }
    }
    ordered
}

/// Reorder table figures by [`order_by_dependencies`]
pub fn order_tables_info(tables: Vec<TableInfo>, graph: &DependencyGraph) -> Vec<TableInfo> {
    let names: Vec<String> = tables.iter().map(|t| t.table_name.clone()).collect();
    let order = order_by_dependencies(&names, graph);

    let mut by_name: HashMap<String, TableInfo> = tables
        .into_iter()
        .map(|t| (t.table_name.clone(), t))
        .collect();

    let mut ordered: Vec<TableInfo> = order
        .iter()
        .filter_map(|name| by_name.remove(name))
        .collect();
    // Duplicate names cannot occur in one schema; keep anything left anyway
    let mut leftovers: Vec<TableInfo> = by_name.into_values().collect();
    leftovers.sort_by(|a, b| a.table_name.cmp(&b.table_name));
    ordered.extend(leftovers);
    ordered
}
