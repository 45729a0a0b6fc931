//! Recursive construction of the dependency tree of a module

use crate::common::LookupError;
use crate::image::{ImageAccess, MappedImage};
use crate::imports::dependency_names;
use crate::pe::Machine;
use crate::sections::SectionTranslator;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Index of a node in its tree
pub type NodeId = usize;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
pub enum NodeState {
    /// Not looked up yet
    Unprocessed,
    /// Mapped, and its import tables walked (or being walked)
    Processed,
    /// Not found in any directory of the search path with a matching architecture
    Unresolved,
}

/// A distinct module of the dependency graph
#[derive(Debug, Clone, Serialize)]
pub struct Node {
    /// Name as it appears in the import table of the first importer
    pub requested_name: String,
    /// File name of the module actually found
    pub resolved_name: Option<String>,
    pub resolved_path: Option<PathBuf>,
    /// Dependencies, in import table order followed by delay-import table order
    pub children: Vec<NodeId>,
    pub state: NodeState,
}

impl Node {
    fn new(requested_name: &str) -> Self {
        Self {
            requested_name: requested_name.to_owned(),
            resolved_name: None,
            resolved_path: None,
            children: Vec::new(),
            state: NodeState::Unprocessed,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.state == NodeState::Processed
    }

    /// Resolved name if found, requested name otherwise
    pub fn display_name(&self) -> &str {
        self.resolved_name.as_deref().unwrap_or(&self.requested_name)
    }
}

/// Dependency graph of a root module, resolved against an ordered list of directories
///
/// Holds exactly one node per module name (case-insensitive). A node reached again through
/// another importer becomes an additional edge to the existing node.
#[derive(Debug, Clone)]
pub struct DependencyTree {
    root_name: String,
    search_path: Vec<PathBuf>,
    architecture: Option<Machine>,
    nodes: Vec<Node>,
    // lowercase requested and resolved names
    index: HashMap<String, NodeId>,
}

impl DependencyTree {
    const ROOT: NodeId = 0;

    /// Create a tree holding just the unprocessed root
    pub fn new(root_name: &str, search_path: Vec<PathBuf>) -> Self {
        Self {
            root_name: root_name.to_owned(),
            search_path,
            architecture: None,
            nodes: vec![Node::new(root_name)],
            // indexed so that a module importing the root by name reuses the root node
            // instead of getting a second, printable node of its own
            index: [(root_name.to_lowercase(), Self::ROOT)].into_iter().collect(),
        }
    }

    /// Discover the whole dependency tree of `root_name`
    ///
    /// Fails only if the root itself cannot be mapped from any search path directory.
    pub fn analyze<A: ImageAccess + ?Sized>(
        root_name: &str,
        search_path: Vec<PathBuf>,
        access: &mut A,
    ) -> Result<Self, LookupError> {
        let mut tree = Self::new(root_name, search_path);
        tree.build(access)?;
        Ok(tree)
    }

    /// Expand the root, and recursively all of its dependencies
    pub fn build<A: ImageAccess + ?Sized>(&mut self, access: &mut A) -> Result<(), LookupError> {
        if self.expand(Self::ROOT, access) {
            Ok(())
        } else {
            Err(LookupError::RootUnresolved(self.root_name.clone()))
        }
    }

    /// Map the module of node `id` and create (or reuse) the nodes of its imports, depth-first
    ///
    /// Returns false if the module could not be resolved. Nodes that are not Unprocessed are
    /// left untouched.
    fn expand<A: ImageAccess + ?Sized>(&mut self, id: NodeId, access: &mut A) -> bool {
        if self.nodes[id].state != NodeState::Unprocessed {
            return true;
        }

        let requested_name = self.nodes[id].requested_name.clone();
        let image = match self.map_module(&requested_name, access) {
            Some(image) => image,
            None => {
                log::warn!("{} not found", requested_name);
                self.nodes[id].state = NodeState::Unresolved;
                return false;
            }
        };

        let arch = *self.architecture.get_or_insert_with(|| {
            log::info!("architecture of {}: {}", image.module_name(), image.machine());
            image.machine()
        });

        let node = &mut self.nodes[id];
        node.resolved_name = Some(image.module_name().to_owned());
        node.resolved_path = Some(image.path().to_owned());
        // must happen before recursing: an import cycle leading back here stops at this node
        node.state = NodeState::Processed;
        self.index
            .entry(image.module_name().to_lowercase())
            .or_insert(id);

        let translator = SectionTranslator::new(image.sections());
        for dll in dependency_names(&image, &translator, arch) {
            self.add_dependency(id, dll, access);
        }

        access.release(image);
        true
    }

    /// Map `name` from the first search path directory providing it with the tree architecture
    fn map_module<A: ImageAccess + ?Sized>(
        &self,
        name: &str,
        access: &mut A,
    ) -> Option<MappedImage> {
        for dir in &self.search_path {
            match access.try_load(name, dir) {
                Ok(image) => match self.architecture {
                    Some(arch) if image.machine() != arch => {
                        log::debug!(
                            "skipping {}: architecture {} instead of {}",
                            image.path().display(),
                            image.machine(),
                            arch
                        );
                        access.release(image);
                    }
                    _ => return Some(image),
                },
                Err(e) => log::debug!("{} not loaded from {}: {}", name, dir.display(), e),
            }
        }
        None
    }

    fn add_dependency<A: ImageAccess + ?Sized>(
        &mut self,
        parent: NodeId,
        name: &str,
        access: &mut A,
    ) {
        let key = name.to_lowercase();
        if let Some(&existing) = self.index.get(&key) {
            // already expanded, or being expanded further up the recursion
            let siblings = &mut self.nodes[parent].children;
            if existing != parent && !siblings.contains(&existing) {
                siblings.push(existing);
            }
            return;
        }

        let child = self.nodes.len();
        self.nodes.push(Node::new(name));
        self.index.insert(key, child);
        self.nodes[parent].children.push(child);
        self.expand(child, access);
    }

    pub fn root_name(&self) -> &str {
        &self.root_name
    }

    pub fn search_path(&self) -> &[PathBuf] {
        &self.search_path
    }

    /// Machine type of the root, once it was mapped
    pub fn architecture(&self) -> Option<Machine> {
        self.architecture
    }

    pub fn root_id(&self) -> NodeId {
        Self::ROOT
    }

    pub fn root(&self) -> &Node {
        &self.nodes[Self::ROOT]
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    /// All nodes, in order of first discovery (root first)
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Look up a node by module name, ignoring case
    pub fn find(&self, name: &str) -> Option<&Node> {
        self.index.get(&name.to_lowercase()).map(|&id| &self.nodes[id])
    }

    pub fn children(&self, id: NodeId) -> impl Iterator<Item = &Node> + '_ {
        self.nodes[id].children.iter().map(move |&c| &self.nodes[c])
    }

    /// Directory the module of `node` was found in
    pub fn folder_of<'a>(&self, node: &'a Node) -> Option<&'a Path> {
        node.resolved_path.as_deref().and_then(Path::parent)
    }
}
