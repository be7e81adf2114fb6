//! Virtual filesystem node model.
//!
//! Each node carries a tagged [`NodeKind`] instead of the untyped
//! "deep metadata" pointer the original driver used to stash
//! filesystem-private state on a generic node — callers match on the kind
//! instead of reinterpreting an opaque pointer. Parent links are weak
//! references so the tree does not form reference cycles.
//!
//! There is exactly one filesystem driver in this kernel, so the
//! operations the original dispatched through a per-node function-pointer
//! table (`fat_fs_operations` / `fat_mount_operations`) are plain
//! functions in [`crate::fs::fileops`] that match on `NodeKind` directly,
//! rather than an indirect vtable with nothing to vary across.

use alloc::rc::{Rc, Weak};
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::RefCell;

/// Driver-private state carried by a regular file node.
#[derive(Clone, Default)]
pub struct FileState {
    /// Cluster of the directory holding this file's 32-byte entry.
    pub metadata_cluster: u32,
    /// Index of this file's entry within that directory cluster.
    pub metadata_index: usize,
    /// Ordered cluster chain backing the file's content.
    pub layout: Vec<u32>,
}

/// Driver-private state carried by a directory node.
#[derive(Clone, Default)]
pub struct DirState {
    pub metadata_cluster: u32,
    pub metadata_index: usize,
    pub layout: Vec<u32>,
}

/// Driver-private state carried by the mount point's root node.
#[derive(Clone, Default)]
pub struct MountState {
    pub root_cluster: u32,
}

/// Tagged union of what a node can be, replacing the original's raw
/// `deep_md` pointer.
#[derive(Clone)]
pub enum NodeKind {
    File(FileState),
    Dir(DirState),
    Mount(MountState),
}

/// Closed set of `ioctl` commands, replacing the original's variadic
/// command argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoctlCommand {
    /// Forces the mount point's root entry to be re-written, analogous to
    /// invalidating any cached copy of it.
    InvalidateCache,
}

pub struct VfsNodeInner {
    pub name: String,
    /// VFS-side attribute bitset (see `fs::dirent::VFS_ATTR_*`).
    pub attributes: u8,
    pub file_size: u32,
    pub kind: NodeKind,
    pub parent: Option<Weak<RefCell<VfsNodeInner>>>,
    pub children: Vec<VfsNode>,
}

/// Shared, interior-mutable handle to one VFS node.
pub type VfsNode = Rc<RefCell<VfsNodeInner>>;

pub fn new_node(name: &str, attributes: u8, file_size: u32, kind: NodeKind) -> VfsNode {
    Rc::new(RefCell::new(VfsNodeInner {
        name: String::from(name),
        attributes,
        file_size,
        kind,
        parent: None,
        children: Vec::new(),
    }))
}

/// Appends `child` to `parent`'s children and wires the child's weak
/// back-reference.
pub fn attach_child(parent: &VfsNode, child: VfsNode) {
    child.borrow_mut().parent = Some(Rc::downgrade(parent));
    parent.borrow_mut().children.push(child);
}

pub fn is_directory(node: &VfsNode) -> bool {
    matches!(node.borrow().kind, NodeKind::Dir(_) | NodeKind::Mount(_))
}

/// Looks up an immediate child by name (case-sensitive on the decoded
/// short name, matching on-disk FAT semantics where names are already
/// normalized to uppercase).
pub fn find_child(node: &VfsNode, name: &str) -> Option<VfsNode> {
    node.borrow()
        .children
        .iter()
        .find(|c| c.borrow().name == name)
        .cloned()
}

/// Returns the parent node, if any and still alive.
pub fn parent_of(node: &VfsNode) -> Option<VfsNode> {
    node.borrow().parent.as_ref().and_then(Weak::upgrade)
}
