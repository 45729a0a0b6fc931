//! Output of a dependency tree: ldd-style list, indented tree view, serializable report

use crate::common::{decanonicalize, path_to_string};
use crate::pe::Machine;
use crate::tree::{DependencyTree, Node, NodeId, NodeState};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;

/// Resolved modules in first-discovery depth-first order, each once, root excluded
pub fn resolved_modules(tree: &DependencyTree) -> Vec<&Node> {
    let mut visited = vec![false; tree.nodes().len()];
    // the root is never reported as a dependency, even when something imports it back
    visited[tree.root_id()] = true;

    let mut ret = Vec::new();
    for &child in &tree.root().children {
        collect_resolved(tree, child, &mut visited, &mut ret);
    }
    ret
}

fn collect_resolved<'a>(
    tree: &'a DependencyTree,
    id: NodeId,
    visited: &mut [bool],
    ret: &mut Vec<&'a Node>,
) {
    let node = tree.node(id);
    if !node.is_resolved() || visited[id] {
        return;
    }
    visited[id] = true;
    ret.push(node);
    for &child in &node.children {
        collect_resolved(tree, child, visited, ret);
    }
}

/// One resolved module per line; full paths instead of names if `full_path`
pub fn write_list<W: Write>(
    tree: &DependencyTree,
    out: &mut W,
    full_path: bool,
) -> std::io::Result<()> {
    for node in resolved_modules(tree) {
        match (&node.resolved_path, full_path) {
            (Some(p), true) => writeln!(out, "{}", decanonicalize(&path_to_string(p)))?,
            _ => writeln!(out, "{}", node.display_name())?,
        }
    }
    Ok(())
}

/// Indented view of the tree, root included
///
/// Every node is expanded at its first occurrence only; later occurrences are printed as leaves.
pub fn write_tree<W: Write>(tree: &DependencyTree, out: &mut W) -> std::io::Result<()> {
    let mut expanded = vec![false; tree.nodes().len()];
    visit_depth_first(tree, tree.root_id(), 0, &mut expanded, out)
}

fn visit_depth_first<W: Write>(
    tree: &DependencyTree,
    id: NodeId,
    current_depth: usize,
    expanded: &mut [bool],
    out: &mut W,
) -> std::io::Result<()> {
    let node = tree.node(id);
    let folder = match (node.state, tree.folder_of(node)) {
        (NodeState::Processed, Some(folder)) => decanonicalize(&path_to_string(folder)),
        (NodeState::Processed, None) => "INVALID".to_owned(),
        _ => "not found".to_owned(),
    };
    writeln!(
        out,
        "{}{} => {}",
        "\t".repeat(current_depth),
        node.display_name(),
        folder
    )?;

    if expanded[id] {
        return Ok(());
    }
    expanded[id] = true;
    for &child in &node.children {
        visit_depth_first(tree, child, current_depth + 1, expanded, out)?;
    }
    Ok(())
}

/// Serializable summary of a single node
#[derive(Debug, Clone, Serialize)]
pub struct ModuleReport {
    pub requested_name: String,
    pub resolved_name: Option<String>,
    pub resolved_path: Option<PathBuf>,
    pub state: NodeState,
    /// names of the dependencies, as displayed for the respective nodes
    pub dependencies: Vec<String>,
}

/// Serializable summary of a whole tree, nodes in order of discovery
#[derive(Debug, Clone, Serialize)]
pub struct TreeReport {
    pub root: String,
    pub architecture: Option<Machine>,
    pub search_path: Vec<PathBuf>,
    pub modules: Vec<ModuleReport>,
}

pub fn report(tree: &DependencyTree) -> TreeReport {
    let modules = tree
        .nodes()
        .iter()
        .enumerate()
        .map(|(id, node)| ModuleReport {
            requested_name: node.requested_name.clone(),
            resolved_name: node.resolved_name.clone(),
            resolved_path: node.resolved_path.clone(),
            state: node.state,
            dependencies: tree
                .children(id)
                .map(|c| c.display_name().to_owned())
                .collect(),
        })
        .collect();
    TreeReport {
        root: tree.root_name().to_owned(),
        architecture: tree.architecture(),
        search_path: tree.search_path().to_vec(),
        modules,
    }
}
