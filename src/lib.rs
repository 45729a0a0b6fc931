extern crate thiserror;

mod system;
#[cfg(test)]
mod testing;

pub mod common;
pub mod image;
pub mod imports;
pub mod lookup_path;
pub mod pe;
pub mod printer;
pub mod sections;
pub mod tree;

pub use common::{decanonicalize, path_to_string, readable_canonical_path, LookupError};
pub use image::{FileSystemImageAccess, ImageAccess, MappedImage};
pub use lookup_path::{LookupPath, LookupPathEntry, LookupTarget};
pub use system::WindowsSystem;
pub use tree::{DependencyTree, Node, NodeId, NodeState};

/// Resolve the dependency tree of `root_name` against the filesystem
pub fn lookup(
    root_name: &str,
    search_path: Vec<std::path::PathBuf>,
) -> Result<DependencyTree, LookupError> {
    let mut access = FileSystemImageAccess::new();
    DependencyTree::analyze(root_name, search_path, &mut access)
}
