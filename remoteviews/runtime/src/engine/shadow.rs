//! Structural mirror of a live view tree used while preparing an async reapply.
//!
//! Phase one can't touch the live views, so every structural effect that
//! phase two will have (removals, insertions, cursor moves) is recorded here
//! first. Later recycling decisions then see the tree as it will be.

use crate::error::ActionError;
use crate::resources::NO_ID;
use crate::view::{NodeId, RecycleTags, ViewTraits, ViewTree};

pub(crate) type ShadowId = usize;

#[derive(Debug, Clone)]
struct ShadowNode {
    /// Live counterpart; `None` for views phase two will insert.
    real: Option<NodeId>,
    view_id: i32,
    traits: ViewTraits,
    recycle: RecycleTags,
    parent: Option<ShadowId>,
    /// Mirrored lazily on first access.
    children: Option<Vec<ShadowId>>,
}

pub(crate) struct ShadowTree<'a> {
    tree: &'a ViewTree,
    nodes: Vec<ShadowNode>,
}

impl<'a> ShadowTree<'a> {
    /// Mirrors the subtree at `root`; the root gets id `0`.
    pub(crate) fn new(tree: &'a ViewTree, root: NodeId) -> Result<Self, ActionError> {
        let mut shadow = Self {
            tree,
            nodes: Vec::new(),
        };
        shadow.mirror(root, None)?;
        Ok(shadow)
    }

    fn mirror(&mut self, real: NodeId, parent: Option<ShadowId>) -> Result<ShadowId, ActionError> {
        let node = self.tree.node(real)?;
        self.nodes.push(ShadowNode {
            real: Some(real),
            view_id: node.view_id(),
            traits: node.traits(),
            recycle: node.recycle,
            parent,
            children: None,
        });
        Ok(self.nodes.len() - 1)
    }

    fn expand(&mut self, id: ShadowId) -> Result<(), ActionError> {
        if self.nodes[id].children.is_some() {
            return Ok(());
        }
        let children = match self.nodes[id].real {
            Some(real) => {
                let tree = self.tree;
                tree.children(real)
                    .iter()
                    .map(|&child| self.mirror(child, Some(id)))
                    .collect::<Result<Vec<_>, _>>()?
            }
            None => Vec::new(),
        };
        self.nodes[id].children = Some(children);
        Ok(())
    }

    pub(crate) fn tree(&self) -> &'a ViewTree {
        self.tree
    }

    pub(crate) fn real(&self, id: ShadowId) -> Option<NodeId> {
        self.nodes[id].real
    }

    pub(crate) fn traits(&self, id: ShadowId) -> ViewTraits {
        self.nodes[id].traits
    }

    pub(crate) fn recycle(&self, id: ShadowId) -> &RecycleTags {
        &self.nodes[id].recycle
    }

    pub(crate) fn set_cursor(&mut self, id: ShadowId, cursor: Option<usize>) {
        self.nodes[id].recycle.next_child = cursor;
    }

    pub(crate) fn children(&mut self, id: ShadowId) -> Result<Vec<ShadowId>, ActionError> {
        self.expand(id)?;
        Ok(self.nodes[id].children.clone().unwrap_or_default())
    }

    /// Depth-first search mirroring [`ViewTree::find_view_by_id`].
    pub(crate) fn find_view_by_id(&mut self, from: ShadowId, view_id: i32) -> Result<Option<ShadowId>, ActionError> {
        if view_id == NO_ID {
            return Ok(None);
        }
        let mut stack = vec![from];
        while let Some(current) = stack.pop() {
            if self.nodes[current].view_id == view_id {
                return Ok(Some(current));
            }
            let children = self.children(current)?;
            stack.extend(children.into_iter().rev());
        }
        Ok(None)
    }

    /// Records the removal of `count` children of `parent` starting at `start`.
    pub(crate) fn remove_range(&mut self, parent: ShadowId, start: usize, count: usize) -> Result<(), ActionError> {
        self.expand(parent)?;
        if let Some(children) = self.nodes[parent].children.as_mut() {
            let end = (start + count).min(children.len());
            if start < end {
                children.drain(start..end);
            }
        }
        Ok(())
    }

    /// Records a remove-all: children without a stable id go, the cursor resets.
    pub(crate) fn remove_all(&mut self, parent: ShadowId) -> Result<(), ActionError> {
        self.expand(parent)?;
        let kept: Vec<ShadowId> = self.nodes[parent]
            .children
            .iter()
            .flatten()
            .copied()
            .filter(|&child| self.nodes[child].recycle.stable_id.is_some())
            .collect();
        self.nodes[parent].children = Some(kept);
        self.nodes[parent].recycle.next_child = Some(0);
        Ok(())
    }

    /// Records a remove-all-except `keep`.
    pub(crate) fn remove_except(&mut self, parent: ShadowId, keep: i32) -> Result<(), ActionError> {
        self.expand(parent)?;
        let kept: Vec<ShadowId> = self.nodes[parent]
            .children
            .iter()
            .flatten()
            .copied()
            .filter(|&child| self.nodes[child].view_id == keep)
            .collect();
        self.nodes[parent].children = Some(kept);
        Ok(())
    }

    pub(crate) fn remove_from_parent(&mut self, id: ShadowId) {
        let Some(parent) = self.nodes[id].parent.take() else {
            return;
        };
        if let Some(children) = self.nodes[parent].children.as_mut() {
            children.retain(|&child| child != id);
        }
    }

    /// Records the insertion of a view phase two will create.
    pub(crate) fn insert_placeholder(
        &mut self,
        parent: ShadowId,
        index: usize,
        view_id: i32,
        traits: ViewTraits,
        recycle: RecycleTags,
    ) -> Result<ShadowId, ActionError> {
        self.expand(parent)?;
        self.nodes.push(ShadowNode {
            real: None,
            view_id,
            traits,
            recycle,
            parent: Some(parent),
            children: Some(Vec::new()),
        });
        let id = self.nodes.len() - 1;
        let children = self.nodes[parent].children.get_or_insert_with(Vec::new);
        let count = children.len();
        if index > count {
            return Err(ActionError::IndexOutOfBounds { index, count });
        }
        children.insert(index, id);
        Ok(id)
    }
}
