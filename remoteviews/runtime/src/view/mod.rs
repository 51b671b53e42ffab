//! Consumer-side view tree the apply engine mutates.
//!
//! The concrete widget toolkit stays behind the [`Widget`] trait; the tree
//! itself only tracks structure, ids and the framework state that actions
//! write (padding, layout params, responses, recycling tags).

pub mod registry;
pub mod widgets;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use rustc_hash::FxHashMap;
use slab::Slab;

use crate::collection::RemoteCollectionItems;
use crate::error::ActionError;
use crate::intent::{Intent, PendingIntent, RemoteResponse};
use crate::remote_views::DrawInstructions;
use crate::resources::NO_ID;
use crate::value::{BlendMode, ColorStateList, Icon};

pub use registry::{MethodRegistry, WidgetCommit};
pub use widgets::{BasicWidget, LayoutTemplate, WidgetCatalog};

bitflags! {
    /// Capabilities a widget exposes to type-checked actions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ViewTraits: u32 {
        const GROUP = 1 << 0;
        const TEXT = 1 << 1;
        const IMAGE = 1 << 2;
        const COMPOUND_BUTTON = 1 << 3;
        const RADIO_GROUP = 1 << 4;
        const ADAPTER_VIEW = 1 << 5;
        const ANIMATOR = 1 << 6;
    }
}

impl ViewTraits {
    pub(crate) fn label(self) -> &'static str {
        if self.contains(Self::RADIO_GROUP) {
            "RadioGroup"
        } else if self.contains(Self::ADAPTER_VIEW) {
            "AdapterView"
        } else if self.contains(Self::ANIMATOR) {
            "AdapterViewAnimator or ViewAnimator"
        } else if self.contains(Self::GROUP) {
            "ViewGroup"
        } else if self.contains(Self::TEXT) {
            "TextView"
        } else if self.contains(Self::IMAGE) {
            "ImageView"
        } else if self.contains(Self::COMPOUND_BUTTON) {
            "CompoundButton"
        } else {
            "View"
        }
    }
}

/// A concrete widget instance owned by a [`ViewTree`] node.
pub trait Widget: Any + Send + Sync + fmt::Debug {
    fn class_name(&self) -> &str;

    fn traits(&self) -> ViewTraits;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Receives the resolved intent of a click or checked change.
pub trait InteractionHandler: Send + Sync {
    /// Returns whether the interaction was handled.
    fn on_interaction(
        &self,
        view_id: i32,
        pending: &PendingIntent,
        fill_in: Option<&Intent>,
    ) -> bool;
}

/// Turns layout resources into fresh, detached view subtrees.
pub trait LayoutInflater: Send + Sync {
    fn inflate(&self, tree: &mut ViewTree, package: &str, layout_id: i32) -> Result<NodeId, ActionError>;

    /// Builds the single view that renders a draw-instruction payload.
    fn inflate_draw_instructions(
        &self,
        _tree: &mut ViewTree,
        _instructions: &DrawInstructions,
    ) -> Result<NodeId, ActionError> {
        Err(ActionError::DrawInstructionsUnsupported)
    }
}

/// Handle to a node of a [`ViewTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub const fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LayoutParams {
    pub width: Option<i32>,
    pub height: Option<i32>,
    /// Left, top, right, bottom.
    pub margins: [Option<i32>; 4],
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompoundDrawables {
    pub relative: bool,
    /// Start/left, top, end/right, bottom.
    pub drawables: [Option<Icon>; 4],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawableTint {
    pub background: bool,
    pub color: i32,
    pub mode: BlendMode,
}

#[derive(Debug, Clone)]
pub enum AdapterState {
    Items(Arc<RemoteCollectionItems>),
    Intent(Intent),
}

/// A click or checked-change response wired to a view.
#[derive(Clone)]
pub struct ResponseBinding {
    pub response: RemoteResponse,
    handler: Option<Arc<dyn InteractionHandler>>,
}

impl ResponseBinding {
    pub fn new(response: RemoteResponse, handler: Option<Arc<dyn InteractionHandler>>) -> Self {
        Self { response, handler }
    }
}

impl fmt::Debug for ResponseBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseBinding")
            .field("response", &self.response)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

/// Framework-level state written by actions.
#[derive(Debug, Clone, Default)]
pub struct ViewState {
    /// Left, top, right, bottom.
    pub padding: [i32; 4],
    pub layout: LayoutParams,
    pub int_tags: FxHashMap<i32, i32>,
    pub checked: bool,
    pub checked_radio: Option<i32>,
    pub displayed_child: usize,
    pub text_size_px: Option<f32>,
    pub compound_drawables: Option<CompoundDrawables>,
    pub tint: Option<DrawableTint>,
    pub ripple_color: Option<ColorStateList>,
    pub outline_radius_px: Option<f32>,
    pub empty_view: Option<i32>,
    pub adapter: Option<AdapterState>,
    pub pending_intent_template: Option<PendingIntent>,
    pub fill_in_intent: Option<Intent>,
    pub click: Option<ResponseBinding>,
    pub checked_change: Option<ResponseBinding>,
}

/// Tags the apply engine stores on views to drive recycling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecycleTags {
    /// Layout the view was inflated from by a remote views apply.
    pub layout_id: Option<i32>,
    /// Id override applied to the view, if any.
    pub override_id: Option<i32>,
    pub stable_id: Option<i32>,
    /// Recycle cursor into the children of a container.
    pub next_child: Option<usize>,
    /// The view is the root of a nested remote views apply.
    pub root_namespace: bool,
    /// The view renders draw instructions instead of an inflated layout.
    pub draw_instructions: bool,
}

#[derive(Debug)]
pub struct ViewNode {
    view_id: i32,
    widget: Box<dyn Widget>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    pub state: ViewState,
    pub recycle: RecycleTags,
}

impl ViewNode {
    pub fn view_id(&self) -> i32 {
        self.view_id
    }

    pub fn widget(&self) -> &dyn Widget {
        self.widget.as_ref()
    }

    pub fn widget_mut(&mut self) -> &mut dyn Widget {
        self.widget.as_mut()
    }

    pub fn class_name(&self) -> &str {
        self.widget.class_name()
    }

    pub fn traits(&self) -> ViewTraits {
        self.widget.traits()
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Fails with [`ActionError::WrongTargetType`] unless the widget has `required`.
    pub fn require(&self, required: ViewTraits) -> Result<(), ActionError> {
        if self.traits().contains(required) {
            Ok(())
        } else {
            Err(ActionError::WrongTargetType {
                view_id: self.view_id,
                class: self.class_name().to_string(),
                expected: required.label(),
            })
        }
    }
}

/// Arena of views; a tree may hold several detached roots.
#[derive(Debug, Default)]
pub struct ViewTree {
    nodes: Slab<ViewNode>,
}

impl ViewTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Inserts a detached view.
    pub fn insert(&mut self, view_id: i32, widget: Box<dyn Widget>) -> NodeId {
        NodeId(self.nodes.insert(ViewNode {
            view_id,
            widget,
            parent: None,
            children: Vec::new(),
            state: ViewState::default(),
            recycle: RecycleTags::default(),
        }))
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains(node.0)
    }

    pub fn node(&self, node: NodeId) -> Result<&ViewNode, ActionError> {
        self.nodes.get(node.0).ok_or(ActionError::MissingNode(node.0))
    }

    pub fn node_mut(&mut self, node: NodeId) -> Result<&mut ViewNode, ActionError> {
        self.nodes
            .get_mut(node.0)
            .ok_or(ActionError::MissingNode(node.0))
    }

    pub fn set_view_id(&mut self, node: NodeId, view_id: i32) -> Result<(), ActionError> {
        self.node_mut(node)?.view_id = view_id;
        Ok(())
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node.0).and_then(|n| n.parent)
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.nodes
            .get(node.0)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn child_count(&self, node: NodeId) -> usize {
        self.children(node).len()
    }

    /// Depth-first search for `view_id`, starting at and including `root`.
    pub fn find_view_by_id(&self, root: NodeId, view_id: i32) -> Option<NodeId> {
        if view_id == NO_ID {
            return None;
        }
        let mut stack = vec![root];
        while let Some(current) = stack.pop() {
            let node = self.nodes.get(current.0)?;
            if node.view_id == view_id {
                return Some(current);
            }
            stack.extend(node.children.iter().rev().copied());
        }
        None
    }

    /// Ids of the views from `root` down, in depth-first order.
    pub fn view_ids(&self, root: NodeId) -> Vec<i32> {
        let mut ids = Vec::new();
        let mut stack = vec![root];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get(current.0) {
                ids.push(node.view_id);
                stack.extend(node.children.iter().rev().copied());
            }
        }
        ids
    }

    /// Attaches a detached `child` under `parent`, appending when `index` is `None`.
    pub fn add_child(
        &mut self,
        parent: NodeId,
        child: NodeId,
        index: Option<usize>,
    ) -> Result<(), ActionError> {
        self.node(child)?;
        let count = self.node(parent)?.children.len();
        let index = index.unwrap_or(count);
        if index > count {
            return Err(ActionError::IndexOutOfBounds { index, count });
        }
        self.detach(child);
        self.node_mut(parent)?.children.insert(index, child);
        self.node_mut(child)?.parent = Some(parent);
        Ok(())
    }

    /// Unlinks `node` from its parent, keeping its subtree alive.
    pub fn detach(&mut self, node: NodeId) {
        let Some(parent) = self.parent(node) else {
            return;
        };
        if let Some(parent_node) = self.nodes.get_mut(parent.0) {
            parent_node.children.retain(|&c| c != node);
        }
        if let Some(child) = self.nodes.get_mut(node.0) {
            child.parent = None;
        }
    }

    /// Detaches and drops `node` with its whole subtree.
    pub fn remove(&mut self, node: NodeId) {
        self.detach(node);
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            if self.nodes.contains(current.0) {
                let removed = self.nodes.remove(current.0);
                stack.extend(removed.children);
            }
        }
    }

    /// Removes `count` children of `parent` starting at `start`.
    pub fn remove_children(&mut self, parent: NodeId, start: usize, count: usize) {
        let doomed: Vec<NodeId> = self
            .children(parent)
            .iter()
            .skip(start)
            .take(count)
            .copied()
            .collect();
        for child in doomed {
            self.remove(child);
        }
    }

    /// Moves the subtree rooted at `root` out of `other` into this tree,
    /// returning the new handle of its root. The moved root is detached.
    pub fn graft(&mut self, other: &mut ViewTree, root: NodeId) -> Result<NodeId, ActionError> {
        other.detach(root);
        let moved = other.take_subtree(root)?;
        Ok(self.put_subtree(moved, None))
    }

    fn take_subtree(&mut self, root: NodeId) -> Result<DetachedNode, ActionError> {
        if !self.nodes.contains(root.0) {
            return Err(ActionError::MissingNode(root.0));
        }
        let node = self.nodes.remove(root.0);
        let children = node
            .children
            .iter()
            .map(|&child| self.take_subtree(child))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(DetachedNode {
            view_id: node.view_id,
            widget: node.widget,
            state: node.state,
            recycle: node.recycle,
            children,
        })
    }

    fn put_subtree(&mut self, detached: DetachedNode, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.insert(ViewNode {
            view_id: detached.view_id,
            widget: detached.widget,
            parent,
            children: Vec::with_capacity(detached.children.len()),
            state: detached.state,
            recycle: detached.recycle,
        }));
        for child in detached.children {
            let child_id = self.put_subtree(child, Some(id));
            self.nodes[id.0].children.push(child_id);
        }
        id
    }

    /// Simulates a click on `node`, resolving its response.
    pub fn perform_click(&self, node: NodeId) -> Result<bool, ActionError> {
        let view = self.node(node)?;
        match &view.state.click {
            Some(binding) => self.dispatch(node, binding, None),
            None => Ok(false),
        }
    }

    /// Toggles a compound button and fires its checked-change response.
    pub fn perform_checked_change(
        &mut self,
        node: NodeId,
        checked: bool,
    ) -> Result<bool, ActionError> {
        let view = self.node_mut(node)?;
        view.require(ViewTraits::COMPOUND_BUTTON)?;
        view.state.checked = checked;
        let binding = view.state.checked_change.clone();
        match binding {
            Some(binding) => self.dispatch(node, &binding, Some(checked)),
            None => Ok(false),
        }
    }

    fn dispatch(
        &self,
        node: NodeId,
        binding: &ResponseBinding,
        checked: Option<bool>,
    ) -> Result<bool, ActionError> {
        let view_id = self.node(node)?.view_id;
        let (pending, mut fill_in) = match &binding.response {
            RemoteResponse::Launch(pending) => (pending.clone(), None),
            RemoteResponse::Combined { pending, fill_in } => {
                (pending.clone(), Some(fill_in.clone()))
            }
            RemoteResponse::FillIn(fill_in) => {
                let template = self
                    .ancestors(node)
                    .find_map(|ancestor| {
                        self.nodes
                            .get(ancestor.0)
                            .and_then(|n| n.state.pending_intent_template.clone())
                    })
                    .ok_or(ActionError::MissingTemplate(view_id))?;
                (template, Some(fill_in.clone()))
            }
        };

        if let Some(checked) = checked {
            fill_in
                .get_or_insert_with(Intent::default)
                .extras
                .insert(EXTRA_CHECKED.to_string(), checked.to_string());
        }

        match &binding.handler {
            Some(handler) => Ok(handler.on_interaction(view_id, &pending, fill_in.as_ref())),
            None => {
                tracing::debug!(view_id, "interaction fired without a handler");
                Ok(false)
            }
        }
    }

    /// Strict ancestors of `node`, nearest first.
    pub fn ancestors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(node), move |&current| self.parent(current))
    }
}

/// Extra added to fill-in intents of checked-change responses.
pub const EXTRA_CHECKED: &str = "extra.CHECKED";

struct DetachedNode {
    view_id: i32,
    widget: Box<dyn Widget>,
    state: ViewState,
    recycle: RecycleTags,
    children: Vec<DetachedNode>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::widgets::BasicWidget;

    fn widget(class: &str, traits: ViewTraits) -> Box<dyn Widget> {
        Box::new(BasicWidget::new(class, traits))
    }

    #[test]
    fn find_view_by_id_searches_depth_first() {
        let mut tree = ViewTree::new();
        let root = tree.insert(1, widget("FrameLayout", ViewTraits::GROUP));
        let a = tree.insert(2, widget("LinearLayout", ViewTraits::GROUP));
        let b = tree.insert(3, widget("TextView", ViewTraits::TEXT));
        tree.add_child(root, a, None).expect("attach a");
        tree.add_child(a, b, None).expect("attach b");

        assert_eq!(tree.find_view_by_id(root, 3), Some(b));
        assert_eq!(tree.find_view_by_id(a, 1), None);
        assert_eq!(tree.find_view_by_id(root, NO_ID), None);
        assert_eq!(tree.ancestors(b).collect::<Vec<_>>(), vec![a, root]);
    }

    #[test]
    fn remove_drops_whole_subtree() {
        let mut tree = ViewTree::new();
        let root = tree.insert(1, widget("FrameLayout", ViewTraits::GROUP));
        let a = tree.insert(2, widget("FrameLayout", ViewTraits::GROUP));
        let b = tree.insert(3, widget("TextView", ViewTraits::TEXT));
        tree.add_child(root, a, None).expect("attach a");
        tree.add_child(a, b, None).expect("attach b");

        tree.remove(a);
        assert_eq!(tree.len(), 1);
        assert!(tree.children(root).is_empty());
    }

    #[test]
    fn graft_moves_subtree_between_trees() {
        let mut scratch = ViewTree::new();
        let root = scratch.insert(5, widget("FrameLayout", ViewTraits::GROUP));
        let leaf = scratch.insert(6, widget("TextView", ViewTraits::TEXT));
        scratch.add_child(root, leaf, None).expect("attach");
        scratch.node_mut(leaf).expect("leaf").state.padding = [1, 2, 3, 4];

        let mut tree = ViewTree::new();
        let moved = tree.graft(&mut scratch, root).expect("graft");
        assert!(scratch.is_empty());
        assert_eq!(tree.view_ids(moved), vec![5, 6]);
        let leaf = tree.find_view_by_id(moved, 6).expect("leaf moved");
        assert_eq!(tree.node(leaf).expect("leaf").state.padding, [1, 2, 3, 4]);
    }

    #[test]
    fn add_child_rejects_out_of_range_index() {
        let mut tree = ViewTree::new();
        let root = tree.insert(1, widget("FrameLayout", ViewTraits::GROUP));
        let child = tree.insert(2, widget("TextView", ViewTraits::TEXT));
        let err = tree.add_child(root, child, Some(3)).expect_err("out of range");
        assert_eq!(err, ActionError::IndexOutOfBounds { index: 3, count: 0 });
    }

    #[test]
    fn fill_in_click_without_template_fails() {
        let mut tree = ViewTree::new();
        let root = tree.insert(1, widget("ListView", ViewTraits::GROUP | ViewTraits::ADAPTER_VIEW));
        let row = tree.insert(2, widget("TextView", ViewTraits::TEXT));
        tree.add_child(root, row, None).expect("attach");
        tree.node_mut(row).expect("row").state.click = Some(ResponseBinding::new(
            RemoteResponse::FillIn(Intent::default()),
            None,
        ));

        assert_eq!(tree.perform_click(row), Err(ActionError::MissingTemplate(2)));

        tree.node_mut(root).expect("root").state.pending_intent_template =
            Some(PendingIntent::new("com.example", 0, Intent::new("open")));
        assert_eq!(tree.perform_click(row), Ok(false));
    }
}
