//! Turns description trees into views: inflation, action application,
//! child recycling and the two-phase async variant.

mod prepare;
mod shadow;
mod task;

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::action::AddViewAction;
use crate::error::{ActionError, ApplyError};
use crate::remote_views::{ApplyFlags, RemoteViews};
use crate::resources::{DeviceConfiguration, NO_ID, ResourceResolver, SizeF};
use crate::view::{
    InteractionHandler, LayoutInflater, MethodRegistry, NodeId, RecycleTags, ViewTraits, ViewTree,
};

pub(crate) use prepare::PreparedPatch;
pub use task::{ApplyListener, ApplyTask};

/// Device state and space an apply runs against.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ApplyParams {
    pub config: DeviceConfiguration,
    /// Space offered to size-keyed trees.
    pub available_size: Option<SizeF>,
}

/// Consumer-side collaborators shared by every apply.
#[derive(Clone)]
pub struct Engine {
    registry: Arc<MethodRegistry>,
    inflater: Arc<dyn LayoutInflater>,
    resolver: Arc<dyn ResourceResolver>,
    handler: Option<Arc<dyn InteractionHandler>>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("registry", &self.registry)
            .field("handler", &self.handler.is_some())
            .finish_non_exhaustive()
    }
}

/// Context threaded through one apply pass.
#[derive(Clone, Copy)]
pub(crate) struct ApplyCx<'a> {
    pub(crate) engine: &'a Engine,
    pub(crate) config: &'a DeviceConfiguration,
    /// Flags of the tree whose actions are being applied.
    pub(crate) owner_flags: ApplyFlags,
    cancel: Option<&'a CancellationToken>,
}

impl<'a> ApplyCx<'a> {
    pub(crate) fn new(engine: &'a Engine, config: &'a DeviceConfiguration, owner_flags: ApplyFlags) -> Self {
        Self {
            engine,
            config,
            owner_flags,
            cancel: None,
        }
    }

    pub(crate) fn with_cancel(self, cancel: &'a CancellationToken) -> Self {
        Self {
            cancel: Some(cancel),
            ..self
        }
    }

    /// Context for the actions of `tree`.
    pub(crate) fn for_tree(self, tree: &RemoteViews) -> Self {
        Self {
            owner_flags: tree.flags(),
            ..self
        }
    }

    pub(crate) fn check_cancelled(&self) -> Result<(), ApplyError> {
        match self.cancel {
            Some(token) if token.is_cancelled() => Err(ApplyError::Cancelled),
            _ => Ok(()),
        }
    }
}

impl Engine {
    pub fn new(
        registry: Arc<MethodRegistry>,
        inflater: Arc<dyn LayoutInflater>,
        resolver: Arc<dyn ResourceResolver>,
    ) -> Self {
        Self {
            registry,
            inflater,
            resolver,
            handler: None,
        }
    }

    /// Routes clicks and checked changes of applied views to `handler`.
    pub fn with_interaction_handler(mut self, handler: Arc<dyn InteractionHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn registry(&self) -> &MethodRegistry {
        &self.registry
    }

    pub fn resolver(&self) -> &dyn ResourceResolver {
        self.resolver.as_ref()
    }

    pub fn interaction_handler(&self) -> Option<Arc<dyn InteractionHandler>> {
        self.handler.clone()
    }

    /// Inflates the variant of `rv` that fits `params` into `tree` and runs
    /// its actions. The returned root is detached.
    pub fn apply(&self, tree: &mut ViewTree, rv: &RemoteViews, params: &ApplyParams) -> Result<NodeId, ApplyError> {
        let variant = rv.select_variant(params.config.orientation, params.available_size);
        let cx = ApplyCx::new(self, &params.config, variant.flags());
        let root = self.build(tree, variant, &cx)?;
        tracing::debug!(
            package = rv.package(),
            layout_id = variant.layout_id(),
            actions = variant.actions().len(),
            "applied remote views"
        );
        Ok(root)
    }

    /// Runs the actions of `rv` against views previously produced from it.
    pub fn reapply(
        &self,
        tree: &mut ViewTree,
        node: NodeId,
        rv: &RemoteViews,
        params: &ApplyParams,
    ) -> Result<(), ApplyError> {
        let variant = check_reapply(tree, node, rv, params)?;
        let cx = ApplyCx::new(self, &params.config, variant.flags());
        self.reapply_tree(tree, node, variant, &cx)?;
        tracing::debug!(
            package = rv.package(),
            layout_id = variant.layout_id(),
            actions = variant.actions().len(),
            "reapplied remote views"
        );
        Ok(())
    }

    /// Whether `node` was produced from the same layout and id override as
    /// the variant of `rv` that `params` selects.
    pub fn can_recycle(&self, tree: &ViewTree, node: NodeId, rv: &RemoteViews, params: &ApplyParams) -> bool {
        let variant = rv.select_variant(params.config.orientation, params.available_size);
        tree.node(node)
            .is_ok_and(|view| recyclable(&view.recycle, variant))
    }

    /// Async [`apply`](Self::apply).
    ///
    /// Inflation and every action run on a blocking worker against a scratch
    /// tree; the finished subtree is moved into `tree` under its write lock.
    /// Must be called from within a Tokio runtime.
    pub fn apply_async(
        &self,
        tree: Arc<RwLock<ViewTree>>,
        rv: RemoteViews,
        params: ApplyParams,
    ) -> ApplyTask {
        task::spawn(self.clone(), tree, params, move |engine, _tree, params, cancel| {
            engine.prepare_fresh(&rv, params, cancel)
        })
    }

    /// Async [`reapply`](Self::reapply).
    ///
    /// Phase one holds a read lock on `tree` while it resolves targets,
    /// makes every recycling decision and runs the expensive half of the
    /// setters that have one. Phase two takes the write lock and runs the
    /// remaining actions and finishers in order.
    pub fn reapply_async(
        &self,
        tree: Arc<RwLock<ViewTree>>,
        node: NodeId,
        rv: RemoteViews,
        params: ApplyParams,
    ) -> ApplyTask {
        task::spawn(self.clone(), tree, params, move |engine, tree, params, cancel| {
            let tree = tree.read();
            engine.prepare_reapply(&tree, node, &rv, params, cancel)
        })
    }

    /// Inflates `rv` and applies its actions, dropping the partial subtree on failure.
    pub(crate) fn build(&self, tree: &mut ViewTree, rv: &RemoteViews, cx: &ApplyCx<'_>) -> Result<NodeId, ApplyError> {
        let cx = cx.for_tree(rv);
        let root = self.inflate_view(tree, rv)?;
        let applied = self
            .apply_actions(tree, root, rv, &cx)
            .and_then(|()| finalize_recycling(tree, root).map_err(ApplyError::from));
        match applied {
            Ok(()) => Ok(root),
            Err(err) => {
                tree.remove(root);
                Err(err)
            }
        }
    }

    pub(crate) fn reapply_tree(
        &self,
        tree: &mut ViewTree,
        node: NodeId,
        rv: &RemoteViews,
        cx: &ApplyCx<'_>,
    ) -> Result<(), ApplyError> {
        let cx = cx.for_tree(rv);
        self.apply_actions(tree, node, rv, &cx)?;
        finalize_recycling(tree, node)?;
        Ok(())
    }

    pub(crate) fn apply_actions(
        &self,
        tree: &mut ViewTree,
        root: NodeId,
        rv: &RemoteViews,
        cx: &ApplyCx<'_>,
    ) -> Result<(), ApplyError> {
        for action in rv.actions() {
            cx.check_cancelled()?;
            action.apply(tree, root, cx)?;
        }
        Ok(())
    }

    fn inflate_view(&self, tree: &mut ViewTree, rv: &RemoteViews) -> Result<NodeId, ActionError> {
        let node = match rv.draw_instructions() {
            Some(instructions) => self.inflater.inflate_draw_instructions(tree, instructions)?,
            None => self.inflater.inflate(tree, rv.package(), rv.layout_id())?,
        };
        let view_id = rv.view_id();
        if view_id != NO_ID {
            tree.set_view_id(node, view_id)?;
        }
        tree.node_mut(node)?.recycle = recycle_tags(rv);
        Ok(node)
    }

    /// Adds the subtree of `add` under the view `view_id`, recycling an
    /// existing child with the same stable id when possible.
    pub(crate) fn apply_add_view(
        &self,
        tree: &mut ViewTree,
        root: NodeId,
        view_id: i32,
        add: &AddViewAction,
        cx: &ApplyCx<'_>,
    ) -> Result<(), ApplyError> {
        let Some(target) = tree.find_view_by_id(root, view_id) else {
            return Ok(());
        };
        let container = tree.node(target)?;
        container.require(ViewTraits::GROUP)?;
        let cursor = container.recycle.next_child;
        let nested = add.nested.select_variant(cx.config.orientation, None);

        let children = tree
            .children(target)
            .iter()
            .map(|&child| {
                tree.node(child).map(|view| ChildInfo {
                    stable_id: view.recycle.stable_id,
                    recyclable: recyclable(&view.recycle, nested),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let plan = plan_add(&children, cursor, add.stable_id, add.index)?;

        if let Some((start, count)) = plan.remove {
            tree.remove_children(target, start, count);
        }
        tree.node_mut(target)?.recycle.next_child = plan.next_cursor;

        match plan.placement {
            Placement::Reuse(index) => {
                let child = tree
                    .children(target)
                    .get(index)
                    .copied()
                    .ok_or(ActionError::IndexOutOfBounds {
                        index,
                        count: tree.child_count(target),
                    })?;
                tracing::trace!(view_id, stable_id = add.stable_id, index, "recycling child view");
                self.reapply_tree(tree, child, nested, cx)
            }
            Placement::Insert(index) => {
                let child = self.build(tree, nested, cx)?;
                tree.node_mut(child)?.recycle.stable_id = add.stable_id;
                if let Err(err) = tree.add_child(target, child, Some(index)) {
                    tree.remove(child);
                    return Err(err.into());
                }
                Ok(())
            }
        }
    }
}

/// Selects the variant `rv` would apply and checks `node` came from it.
pub(crate) fn check_reapply<'r>(
    tree: &ViewTree,
    node: NodeId,
    rv: &'r RemoteViews,
    params: &ApplyParams,
) -> Result<&'r RemoteViews, ApplyError> {
    if rv.is_reapply_disallowed() {
        return Err(ApplyError::ReapplyDisallowed);
    }
    let variant = rv.select_variant(params.config.orientation, params.available_size);
    let tags = tree.node(node)?.recycle;
    let compatible = if rv.has_multiple_layouts() {
        // Variants may use unrelated layouts, so the view must be fully recyclable.
        recyclable(&tags, variant)
    } else if variant.has_draw_instructions() {
        tags.draw_instructions
    } else {
        tags.layout_id == Some(variant.layout_id())
    };
    if compatible {
        Ok(variant)
    } else {
        Err(ApplyError::ReapplyMismatch {
            recorded: tags.layout_id,
            expected: variant.layout_id(),
        })
    }
}

/// Tags recorded on the root view inflated for `rv`.
pub(crate) fn recycle_tags(rv: &RemoteViews) -> RecycleTags {
    let view_id = rv.view_id();
    RecycleTags {
        layout_id: (!rv.has_draw_instructions()).then(|| rv.layout_id()),
        override_id: (view_id != NO_ID).then_some(view_id),
        root_namespace: true,
        draw_instructions: rv.has_draw_instructions(),
        ..RecycleTags::default()
    }
}

/// Whether a view tagged `tags` can be reused to show `rv`.
pub(crate) fn recyclable(tags: &RecycleTags, rv: &RemoteViews) -> bool {
    if rv.has_draw_instructions() || tags.draw_instructions {
        return false;
    }
    tags.layout_id == Some(rv.layout_id()) && tags.override_id.unwrap_or(NO_ID) == rv.view_id()
}

/// Drops the children a recycling pass did not reuse and clears the cursors
/// below `container`, stopping at the roots of nested applies.
pub(crate) fn finalize_recycling(tree: &mut ViewTree, container: NodeId) -> Result<(), ActionError> {
    let node = tree.node_mut(container)?;
    if let Some(cursor) = node.recycle.next_child.take() {
        let count = node.children().len();
        if cursor < count {
            tree.remove_children(container, cursor, count - cursor);
        }
    }
    for child in tree.children(container).to_vec() {
        let view = tree.node(child)?;
        if view.traits().contains(ViewTraits::GROUP) && !view.recycle.root_namespace {
            finalize_recycling(tree, child)?;
        }
    }
    Ok(())
}

/// What the recycling logic needs to know about one existing child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChildInfo {
    pub(crate) stable_id: Option<i32>,
    pub(crate) recyclable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Placement {
    /// Reapply onto the child at this index (after removals).
    Reuse(usize),
    /// Insert a freshly built child at this index (after removals).
    Insert(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AddPlan {
    /// `(start, count)` of children to drop first.
    pub(crate) remove: Option<(usize, usize)>,
    pub(crate) placement: Placement,
    pub(crate) next_cursor: Option<usize>,
}

/// Decides how a subtree addition lands among `children`.
///
/// With a cursor (set by a remove-all) and a stable id, the children from the
/// cursor on are searched for that id. A recyclable match drops everything
/// between the cursor and itself and is reused in place; a match that can't be
/// recycled is dropped along with everything before it, and a fresh child
/// takes its place.
pub(crate) fn plan_add(
    children: &[ChildInfo],
    cursor: Option<usize>,
    stable_id: Option<i32>,
    index: Option<usize>,
) -> Result<AddPlan, ActionError> {
    let mut count = children.len();
    let mut remove = None;

    if let (Some(cursor), Some(stable_id)) = (cursor, stable_id) {
        let found = (cursor..count).find(|&i| children[i].stable_id == Some(stable_id));
        if let Some(found) = found {
            if children[found].recyclable {
                return Ok(AddPlan {
                    remove: (found > cursor).then_some((cursor, found - cursor)),
                    placement: Placement::Reuse(cursor),
                    next_cursor: Some(cursor + 1),
                });
            }
            let dropped = found - cursor + 1;
            remove = Some((cursor, dropped));
            count -= dropped;
        }
    }

    let at = index
        .or_else(|| cursor.map(|cursor| cursor.min(count)))
        .unwrap_or(count);
    if at > count {
        return Err(ActionError::IndexOutOfBounds { index: at, count });
    }
    Ok(AddPlan {
        remove,
        placement: Placement::Insert(at),
        next_cursor: cursor.map(|cursor| cursor + 1),
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::remote_views::RemoteViews;
    use crate::resources::Orientation;
    use crate::test_support::{self, ids};
    use crate::value::ReflectionValue;
    use crate::view::BasicWidget;

    fn stable(id: i32) -> ChildInfo {
        ChildInfo {
            stable_id: Some(id),
            recyclable: true,
        }
    }

    #[test]
    fn plan_without_cursor_appends_or_uses_index() {
        let children = [stable(1), stable(2)];
        let plan = plan_add(&children, None, Some(1), None).expect("plan");
        assert_eq!(plan.placement, Placement::Insert(2));
        assert_eq!(plan.remove, None);
        assert_eq!(plan.next_cursor, None);

        let plan = plan_add(&children, None, None, Some(0)).expect("plan");
        assert_eq!(plan.placement, Placement::Insert(0));

        let err = plan_add(&children, None, None, Some(3)).expect_err("past the end");
        assert_eq!(err, ActionError::IndexOutOfBounds { index: 3, count: 2 });
    }

    #[test]
    fn plan_drops_unrecyclable_match() {
        let children = [
            stable(1),
            ChildInfo {
                stable_id: Some(2),
                recyclable: false,
            },
            stable(3),
        ];
        let plan = plan_add(&children, Some(0), Some(2), None).expect("plan");
        assert_eq!(plan.remove, Some((0, 2)));
        assert_eq!(plan.placement, Placement::Insert(0));
        assert_eq!(plan.next_cursor, Some(1));
    }

    fn text_of(tree: &ViewTree, node: NodeId) -> Option<String> {
        let text = tree.find_view_by_id(node, ids::ITEM_TEXT)?;
        tree.node(text)
            .ok()?
            .widget()
            .as_any()
            .downcast_ref::<BasicWidget>()?
            .property("text")
            .and_then(ReflectionValue::as_text)
            .map(str::to_string)
    }

    fn card_with(items: &[(i32, &str)], clear_first: bool) -> RemoteViews {
        let mut rv = RemoteViews::new(test_support::PACKAGE, ids::CARD_LAYOUT);
        if clear_first {
            rv.remove_all_views(ids::CONTAINER).expect("remove all");
        }
        for &(stable_id, text) in items {
            rv.add_stable_view(ids::CONTAINER, test_support::item(text), stable_id)
                .expect("add");
        }
        rv
    }

    #[test]
    fn stable_children_are_recycled_in_order() {
        let engine = test_support::engine();
        let params = ApplyParams::default();
        let mut tree = ViewTree::new();
        let root = engine
            .apply(&mut tree, &card_with(&[(1, "a"), (2, "b"), (3, "c")], false), &params)
            .expect("apply");
        let container = tree.find_view_by_id(root, ids::CONTAINER).expect("container");
        let before = tree.children(container).to_vec();
        assert_eq!(before.len(), 3);

        let update = card_with(&[(1, "A"), (3, "C"), (4, "D")], true);
        let cx = ApplyCx::new(&engine, &params.config, update.flags());
        engine
            .apply_actions(&mut tree, root, &update, &cx)
            .expect("actions");
        assert_eq!(tree.node(container).expect("container").recycle.next_child, Some(3));

        finalize_recycling(&mut tree, root).expect("finalize");
        let after = tree.children(container).to_vec();
        assert_eq!(after.len(), 3);
        assert_eq!(after[0], before[0], "first child reused");
        assert_eq!(after[1], before[2], "third child reused");
        assert!(!before.contains(&after[2]), "new child inflated");
        assert_eq!(
            after.iter().map(|&child| text_of(&tree, child)).collect::<Vec<_>>(),
            vec![Some("A".to_string()), Some("C".to_string()), Some("D".to_string())]
        );
        assert_eq!(tree.node(container).expect("container").recycle.next_child, None);
    }

    #[test]
    fn finalize_drops_unreused_children() {
        let engine = test_support::engine();
        let params = ApplyParams::default();
        let mut tree = ViewTree::new();
        let root = engine
            .apply(&mut tree, &card_with(&[(1, "a"), (2, "b"), (3, "c")], false), &params)
            .expect("apply");

        engine
            .reapply(&mut tree, root, &card_with(&[(2, "B")], true), &params)
            .expect("reapply");
        let container = tree.find_view_by_id(root, ids::CONTAINER).expect("container");
        let texts: Vec<_> = tree
            .children(container)
            .iter()
            .map(|&child| text_of(&tree, child))
            .collect();
        assert_eq!(texts, vec![Some("B".to_string())]);
    }

    #[test]
    fn reapply_rejects_other_layout() {
        let engine = test_support::engine();
        let params = ApplyParams::default();
        let mut tree = ViewTree::new();
        let root = engine
            .apply(&mut tree, &RemoteViews::new(test_support::PACKAGE, ids::CARD_LAYOUT), &params)
            .expect("apply");

        let other = RemoteViews::new(test_support::PACKAGE, ids::WIDE_LAYOUT);
        assert!(!engine.can_recycle(&tree, root, &other, &params));
        let err = engine
            .reapply(&mut tree, root, &other, &params)
            .expect_err("different layout");
        assert!(matches!(
            err,
            ApplyError::ReapplyMismatch {
                recorded: Some(ids::CARD_LAYOUT),
                expected: ids::WIDE_LAYOUT,
            }
        ));

        let mut locked = RemoteViews::new(test_support::PACKAGE, ids::CARD_LAYOUT);
        locked.set_reapply_disallowed();
        assert!(matches!(
            engine.reapply(&mut tree, root, &locked, &params),
            Err(ApplyError::ReapplyDisallowed)
        ));
    }

    #[test]
    fn orientation_variants_need_matching_view() {
        let engine = test_support::engine();
        let landscape = RemoteViews::new(test_support::PACKAGE, ids::WIDE_LAYOUT);
        let portrait = RemoteViews::new(test_support::PACKAGE, ids::CARD_LAYOUT);
        let rv = RemoteViews::from_orientations(landscape, portrait).expect("variants");

        let portrait_params = ApplyParams::default();
        let mut landscape_params = ApplyParams::default();
        landscape_params.config.orientation = Orientation::Landscape;

        let mut tree = ViewTree::new();
        let root = engine.apply(&mut tree, &rv, &portrait_params).expect("apply");
        assert_eq!(tree.node(root).expect("root").class_name(), "FrameLayout");
        engine
            .reapply(&mut tree, root, &rv, &portrait_params)
            .expect("same orientation");
        assert!(matches!(
            engine.reapply(&mut tree, root, &rv, &landscape_params),
            Err(ApplyError::ReapplyMismatch { .. })
        ));
    }

    #[test]
    fn failed_apply_leaves_no_views() {
        let engine = test_support::engine();
        let mut rv = RemoteViews::new(test_support::PACKAGE, ids::CARD_LAYOUT);
        rv.add_view(ids::CONTAINER, test_support::item("ok"))
            .and_then(|rv| rv.set_float(ids::TITLE, "setNoSuchThing", 1.0))
            .expect("actions");

        let mut tree = ViewTree::new();
        engine
            .apply(&mut tree, &rv, &ApplyParams::default())
            .expect_err("unknown setter");
        assert!(tree.is_empty());
    }

    #[test]
    fn view_id_override_is_recorded() {
        let engine = test_support::engine();
        let mut rv = RemoteViews::new(test_support::PACKAGE, ids::ITEM_LAYOUT);
        rv.set_view_id(0x7f08_0099);
        let mut tree = ViewTree::new();
        let root = engine.apply(&mut tree, &rv, &ApplyParams::default()).expect("apply");
        let view = tree.node(root).expect("root");
        assert_eq!(view.view_id(), 0x7f08_0099);
        assert_eq!(view.recycle.override_id, Some(0x7f08_0099));
        assert!(!engine.can_recycle(
            &tree,
            root,
            &RemoteViews::new(test_support::PACKAGE, ids::ITEM_LAYOUT),
            &ApplyParams::default()
        ));
    }
}
