//! Dependency-first ordering of plugins.
//!
//! [`resolve_order`] is a pure function: it never constructs anything and
//! never logs.  Dependencies that name an unregistered plugin are ignored
//! here; the plugin manager validates their existence separately so that the
//! error can name both ends of the broken edge.

use std::collections::HashMap;

use crate::error::PluginError;
use crate::plugin::{ConfiguredPlugin, Plugin};

/// A node of the dependency graph.
pub trait DependencyNode {
    fn node_name(&self) -> &str;
    fn node_dependencies(&self) -> &[String];
}

impl DependencyNode for Plugin {
    fn node_name(&self) -> &str {
        self.name()
    }

    fn node_dependencies(&self) -> &[String] {
        self.dependencies()
    }
}

impl DependencyNode for ConfiguredPlugin {
    fn node_name(&self) -> &str {
        self.plugin.name()
    }

    fn node_dependencies(&self) -> &[String] {
        self.plugin.dependencies()
    }
}

impl<T: DependencyNode + ?Sized> DependencyNode for std::sync::Arc<T> {
    fn node_name(&self) -> &str {
        (**self).node_name()
    }

    fn node_dependencies(&self) -> &[String] {
        (**self).node_dependencies()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Visited,
}

/// Returns indices into `nodes` such that every node comes after all of its
/// (registered) dependencies.
///
/// Roots are visited in slice order and dependencies in declaration order, so
/// the result is deterministic for a given registration sequence.
///
/// # Errors
///
/// [`PluginError::CircularDependency`] naming the first node found on a
/// cycle.  A node listing itself is a cycle of length one.
pub fn resolve_order<N: DependencyNode>(nodes: &[N]) -> Result<Vec<usize>, PluginError> {
    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, node)| (node.node_name(), i))
        .collect();

    let mut marks = vec![Mark::Unvisited; nodes.len()];
    let mut order = Vec::with_capacity(nodes.len());

    for i in 0..nodes.len() {
        visit(i, nodes, &index, &mut marks, &mut order)?;
    }
    Ok(order)
}

fn visit<N: DependencyNode>(
    i: usize,
    nodes: &[N],
    index: &HashMap<&str, usize>,
    marks: &mut [Mark],
    order: &mut Vec<usize>,
) -> Result<(), PluginError> {
    match marks[i] {
        Mark::Visited => return Ok(()),
        Mark::Visiting => {
            return Err(PluginError::CircularDependency(
                nodes[i].node_name().to_string(),
            ));
        }
        Mark::Unvisited => {}
    }

    marks[i] = Mark::Visiting;
    for dep in nodes[i].node_dependencies() {
        if let Some(&j) = index.get(dep.as_str()) {
            visit(j, nodes, index, marks, order)?;
        }
    }
    marks[i] = Mark::Visited;
    order.push(i);
    Ok(())
}
