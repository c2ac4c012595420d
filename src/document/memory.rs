use std::collections::BTreeMap;

use super::{
    BatchOutcome, DiffEntry, DiffKind, DocumentTree, MutationBatch, NewElement, NodeKey,
    Operation, Position, RootKind,
};
use crate::error::DocumentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Parent {
    Root(RootKind),
    Node(NodeKey),
}

#[derive(Debug, Clone)]
struct NodeData {
    name: String,
    attributes: BTreeMap<String, String>,
    children: Vec<NodeKey>,
    parent: Parent,
}

#[derive(Debug, Clone, Default)]
struct Slot {
    generation: u32,
    data: Option<NodeData>,
}

/// Arena-backed [`DocumentTree`] with a main root and a graveyard.
#[derive(Debug, Clone, Default)]
pub struct MemoryDocument {
    slots: Vec<Slot>,
    free: Vec<usize>,
    main: Vec<NodeKey>,
    graveyard: Vec<NodeKey>,
    history: usize,
}

impl MemoryDocument {
    pub fn new() -> Self {
        Self::default()
    }

    fn data(&self, key: NodeKey) -> Option<&NodeData> {
        self.slots
            .get(key.index())
            .filter(|slot| slot.generation == key.generation())
            .and_then(|slot| slot.data.as_ref())
    }

    fn data_mut(&mut self, key: NodeKey) -> Result<&mut NodeData, DocumentError> {
        self.slots
            .get_mut(key.index())
            .filter(|slot| slot.generation == key.generation())
            .and_then(|slot| slot.data.as_mut())
            .ok_or(DocumentError::NodeNotFound(key))
    }

    fn siblings_mut(&mut self, parent: Parent) -> Result<&mut Vec<NodeKey>, DocumentError> {
        match parent {
            Parent::Root(RootKind::Main) => Ok(&mut self.main),
            Parent::Root(RootKind::Graveyard) => Ok(&mut self.graveyard),
            Parent::Node(key) => Ok(&mut self.data_mut(key)?.children),
        }
    }

    fn parent_of(&self, position: Position) -> Result<(Parent, RootKind), DocumentError> {
        match position.parent {
            None => Ok((Parent::Root(RootKind::Main), RootKind::Main)),
            Some(key) => {
                let root = self.root_of(key).ok_or(DocumentError::NodeNotFound(key))?;
                Ok((Parent::Node(key), root))
            }
        }
    }

    fn allocate(&mut self, element: NewElement, parent: Parent) -> NodeKey {
        let data = NodeData {
            name: element.name,
            attributes: element.attributes,
            children: Vec::new(),
            parent,
        };

        let key = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.data = Some(data);
                NodeKey::new(index as u32, slot.generation)
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    data: Some(data),
                });
                NodeKey::new((self.slots.len() - 1) as u32, 0)
            }
        };

        let children: Vec<NodeKey> = element
            .children
            .into_iter()
            .map(|child| self.allocate(child, Parent::Node(key)))
            .collect();
        if let Some(slot) = self.slots[key.index()].data.as_mut() {
            slot.children = children;
        }
        key
    }

    fn attach(&mut self, key: NodeKey, parent: Parent, index: Option<usize>) -> Result<(), DocumentError> {
        let siblings = self.siblings_mut(parent)?;
        let index = index.unwrap_or(siblings.len());
        if index > siblings.len() {
            return Err(DocumentError::InvalidPosition(format!(
                "index {} beyond {} children",
                index,
                siblings.len()
            )));
        }
        siblings.insert(index, key);
        self.data_mut(key)?.parent = parent;
        Ok(())
    }

    fn detach(&mut self, key: NodeKey) -> Result<RootKind, DocumentError> {
        let root = self.root_of(key).ok_or(DocumentError::NodeNotFound(key))?;
        let parent = self.data_mut(key)?.parent;
        self.siblings_mut(parent)?.retain(|k| *k != key);
        Ok(root)
    }

    fn is_within(&self, candidate: NodeKey, ancestor: NodeKey) -> bool {
        let mut current = Some(candidate);
        while let Some(key) = current {
            if key == ancestor {
                return true;
            }
            current = match self.data(key).map(|d| d.parent) {
                Some(Parent::Node(parent)) => Some(parent),
                _ => None,
            };
        }
        false
    }

    fn release(&mut self, key: NodeKey) {
        let children = self
            .data(key)
            .map(|d| d.children.clone())
            .unwrap_or_default();
        for child in children {
            self.release(child);
        }
        if let Some(slot) = self.slots.get_mut(key.index()) {
            slot.data = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(key.index());
        }
    }

    fn apply_operation(
        &mut self,
        operation: Operation,
        outcome: &mut BatchOutcome,
    ) -> Result<(), DocumentError> {
        match operation {
            Operation::Insert { element, at } => {
                let (parent, root) = self.parent_of(at)?;
                let key = self.allocate(element, parent);
                self.attach(key, parent, at.index)?;
                outcome.diff.push(DiffEntry::insert(root, key));
                outcome.created.push(key);
            }
            Operation::Move { node, to } => {
                if let Some(target) = to.parent {
                    if self.is_within(target, node) {
                        return Err(DocumentError::InvalidPosition(
                            "cannot move a node into itself".to_string(),
                        ));
                    }
                }
                let (parent, to_root) = self.parent_of(to)?;
                let from_root = self.detach(node)?;
                self.attach(node, parent, to.index)?;
                outcome.diff.push(DiffEntry::remove(from_root, node));
                outcome.diff.push(DiffEntry::insert(to_root, node));
            }
            Operation::Remove { node } => {
                let from_root = self.detach(node)?;
                self.attach(node, Parent::Root(RootKind::Graveyard), None)?;
                outcome.diff.push(DiffEntry::remove(from_root, node));
                outcome.diff.push(DiffEntry::insert(RootKind::Graveyard, node));
            }
            Operation::Purge { node } => {
                let root = self.detach(node)?;
                self.release(node);
                outcome.diff.push(DiffEntry::remove(root, node));
            }
            Operation::SetAttributes { node, attributes } => {
                let root = self.root_of(node).ok_or(DocumentError::NodeNotFound(node))?;
                self.data_mut(node)?.attributes.extend(attributes);
                outcome.diff.push(DiffEntry {
                    kind: DiffKind::Attribute,
                    root,
                    node,
                });
            }
        }
        Ok(())
    }
}

impl DocumentTree for MemoryDocument {
    fn apply(&mut self, batch: MutationBatch) -> Result<BatchOutcome, DocumentError> {
        let snapshot = self.clone();
        let mut outcome = BatchOutcome::default();

        for operation in batch.operations {
            if let Err(err) = self.apply_operation(operation, &mut outcome) {
                *self = snapshot;
                return Err(err);
            }
        }

        if batch.undoable && !outcome.diff.is_empty() {
            self.history += 1;
        }
        Ok(outcome)
    }

    fn root_of(&self, key: NodeKey) -> Option<RootKind> {
        let mut current = self.data(key)?;
        loop {
            match current.parent {
                Parent::Root(root) => return Some(root),
                Parent::Node(parent) => current = self.data(parent)?,
            }
        }
    }

    fn name(&self, key: NodeKey) -> Option<&str> {
        self.data(key).map(|d| d.name.as_str())
    }

    fn attributes(&self, key: NodeKey) -> Option<&BTreeMap<String, String>> {
        self.data(key).map(|d| &d.attributes)
    }

    fn children(&self, key: NodeKey) -> Vec<NodeKey> {
        self.data(key).map(|d| d.children.clone()).unwrap_or_default()
    }

    fn root_children(&self, root: RootKind) -> Vec<NodeKey> {
        match root {
            RootKind::Main => self.main.clone(),
            RootKind::Graveyard => self.graveyard.clone(),
        }
    }

    fn history_len(&self) -> usize {
        self.history
    }
}
