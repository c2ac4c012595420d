//! Tree-shaped document model consumed by the upload core.
//!
//! The upload core never owns document nodes. It keeps [`NodeKey`]s and
//! re-resolves them after every suspension point; a key that no longer
//! resolves is a normal outcome.

mod events;
mod memory;

pub use events::{Emitter, Subscription};
pub use memory::MemoryDocument;

use std::cell::{Cell, Ref, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use derivative::Derivative;
use tracing::warn;

use crate::error::DocumentError;

/// Lookup key for a document node: arena slot plus generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey {
    index: u32,
    generation: u32,
}

impl NodeKey {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub(crate) fn index(&self) -> usize {
        self.index as usize
    }

    pub(crate) fn generation(&self) -> u32 {
        self.generation
    }
}

/// The two roots of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RootKind {
    /// Main content.
    Main,
    /// Holding area for removed nodes that can still be restored.
    Graveyard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffKind {
    Insert,
    Remove,
    Attribute,
}

/// One change produced by a mutation batch, in chronological order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffEntry {
    pub kind: DiffKind,
    pub root: RootKind,
    pub node: NodeKey,
}

impl DiffEntry {
    pub fn insert(root: RootKind, node: NodeKey) -> Self {
        Self {
            kind: DiffKind::Insert,
            root,
            node,
        }
    }

    pub fn remove(root: RootKind, node: NodeKey) -> Self {
        Self {
            kind: DiffKind::Remove,
            root,
            node,
        }
    }
}

/// Description of an element to create.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewElement {
    pub name: String,
    pub attributes: BTreeMap<String, String>,
    pub children: Vec<NewElement>,
}

impl NewElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_attributes(mut self, attributes: BTreeMap<String, String>) -> Self {
        self.attributes.extend(attributes);
        self
    }

    pub fn with_child(mut self, child: NewElement) -> Self {
        self.children.push(child);
        self
    }
}

/// Insertion point. `parent: None` is the main root; `index: None` appends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Position {
    pub parent: Option<NodeKey>,
    pub index: Option<usize>,
}

impl Position {
    pub fn end_of_main() -> Self {
        Self::default()
    }

    pub fn in_node(parent: NodeKey) -> Self {
        Self {
            parent: Some(parent),
            index: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Insert { element: NewElement, at: Position },
    Move { node: NodeKey, to: Position },
    /// Move a node to the graveyard.
    Remove { node: NodeKey },
    /// Destroy a node and its subtree for good.
    Purge { node: NodeKey },
    SetAttributes {
        node: NodeKey,
        attributes: BTreeMap<String, String>,
    },
}

/// An atomic group of operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationBatch {
    /// Whether the batch is recorded in the undo history.
    pub undoable: bool,
    pub operations: Vec<Operation>,
}

impl Default for MutationBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl MutationBatch {
    pub fn new() -> Self {
        Self {
            undoable: true,
            operations: Vec::new(),
        }
    }

    /// A batch that must stay out of the user's undo history.
    pub fn non_undoable() -> Self {
        Self {
            undoable: false,
            operations: Vec::new(),
        }
    }

    pub fn insert(mut self, element: NewElement, at: Position) -> Self {
        self.operations.push(Operation::Insert { element, at });
        self
    }

    pub fn move_to(mut self, node: NodeKey, to: Position) -> Self {
        self.operations.push(Operation::Move { node, to });
        self
    }

    pub fn remove(mut self, node: NodeKey) -> Self {
        self.operations.push(Operation::Remove { node });
        self
    }

    pub fn purge(mut self, node: NodeKey) -> Self {
        self.operations.push(Operation::Purge { node });
        self
    }

    pub fn set_attributes(mut self, node: NodeKey, attributes: BTreeMap<String, String>) -> Self {
        self.operations
            .push(Operation::SetAttributes { node, attributes });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub diff: Vec<DiffEntry>,
    /// Keys of the elements created by `Insert` operations, in order.
    pub created: Vec<NodeKey>,
}

/// Delivered to change listeners once per committed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub diff: Vec<DiffEntry>,
    pub undoable: bool,
}

/// Contract of the editable tree the upload core works against.
pub trait DocumentTree {
    /// Apply every operation of the batch or none of them.
    fn apply(&mut self, batch: MutationBatch) -> Result<BatchOutcome, DocumentError>;

    /// Root currently holding the node, `None` once it is gone.
    fn root_of(&self, key: NodeKey) -> Option<RootKind>;

    fn name(&self, key: NodeKey) -> Option<&str>;

    fn attributes(&self, key: NodeKey) -> Option<&BTreeMap<String, String>>;

    fn children(&self, key: NodeKey) -> Vec<NodeKey>;

    fn root_children(&self, root: RootKind) -> Vec<NodeKey>;

    /// Number of batches recorded in the undo history.
    fn history_len(&self) -> usize;

    fn attribute(&self, key: NodeKey, name: &str) -> Option<&str> {
        self.attributes(key)
            .and_then(|attrs| attrs.get(name))
            .map(String::as_str)
    }

    fn contains(&self, key: NodeKey) -> bool {
        self.root_of(key).is_some()
    }

    /// The node and all of its descendants, pre-order.
    fn subtree(&self, key: NodeKey) -> Vec<NodeKey> {
        let mut out = Vec::new();
        let mut stack = vec![key];
        while let Some(next) = stack.pop() {
            if !self.contains(next) {
                continue;
            }
            out.push(next);
            let mut children = self.children(next);
            children.reverse();
            stack.extend(children);
        }
        out
    }

    fn nodes_in(&self, root: RootKind) -> Vec<NodeKey> {
        self.root_children(root)
            .into_iter()
            .flat_map(|child| self.subtree(child))
            .collect()
    }
}

#[derive(Derivative)]
#[derivative(Debug)]
struct HandleInner {
    #[derivative(Debug = "ignore")]
    tree: RefCell<Box<dyn DocumentTree>>,
    changes: Emitter<ChangeEvent>,
    queue: RefCell<VecDeque<MutationBatch>>,
    dispatching: Cell<bool>,
}

/// Shared, single-writer access to a document plus its change feed.
///
/// Batches requested while change listeners run are queued and applied
/// right after the current batch, so listeners always observe batches one
/// at a time.
#[derive(Clone, Debug)]
pub struct DocumentHandle {
    inner: Rc<HandleInner>,
}

impl DocumentHandle {
    pub fn new(tree: impl DocumentTree + 'static) -> Self {
        Self {
            inner: Rc::new(HandleInner {
                tree: RefCell::new(Box::new(tree)),
                changes: Emitter::new(),
                queue: RefCell::new(VecDeque::new()),
                dispatching: Cell::new(false),
            }),
        }
    }

    /// Borrow the tree for reading. Must not be held across an `.await`.
    pub fn read(&self) -> Ref<'_, dyn DocumentTree> {
        Ref::map(self.inner.tree.borrow(), |tree| &**tree)
    }

    pub fn on_change(&self, listener: impl Fn(&ChangeEvent) + 'static) -> Subscription {
        self.inner.changes.subscribe(listener)
    }

    /// Apply a batch and notify listeners.
    ///
    /// Returns `Ok(None)` when the batch was queued behind the batch whose
    /// listeners are currently running.
    pub fn change(&self, batch: MutationBatch) -> Result<Option<BatchOutcome>, DocumentError> {
        if self.inner.dispatching.get() {
            self.inner.queue.borrow_mut().push_back(batch);
            return Ok(None);
        }

        let undoable = batch.undoable;
        let outcome = self.inner.tree.borrow_mut().apply(batch)?;
        self.dispatch(ChangeEvent {
            diff: outcome.diff.clone(),
            undoable,
        });
        Ok(Some(outcome))
    }

    fn dispatch(&self, first: ChangeEvent) {
        self.inner.dispatching.set(true);
        self.inner.changes.emit(&first);

        loop {
            let next = self.inner.queue.borrow_mut().pop_front();
            let Some(batch) = next else {
                break;
            };
            let undoable = batch.undoable;
            let applied = self.inner.tree.borrow_mut().apply(batch);
            match applied {
                Ok(outcome) => self.inner.changes.emit(&ChangeEvent {
                    diff: outcome.diff,
                    undoable,
                }),
                Err(err) => warn!("Dropping queued document batch: {}", err),
            }
        }

        self.inner.dispatching.set(false);
    }
}
