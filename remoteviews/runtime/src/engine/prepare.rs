//! Phase one of an async apply and the phase-two commit of its result.

use tokio_util::sync::CancellationToken;

use super::shadow::{ShadowId, ShadowTree};
use super::{
    ApplyCx, ApplyParams, ChildInfo, Engine, Placement, check_reapply, finalize_recycling, plan_add,
    recyclable,
};
use crate::action::{Action, ActionKind, AddViewAction, ReflectionAction};
use crate::error::{ActionError, ApplyError};
use crate::remote_views::{ApplyFlags, RemoteViews};
use crate::resources::DeviceConfiguration;
use crate::view::{NodeId, ViewTraits, ViewTree, WidgetCommit};

/// Everything phase one produced, ready to be committed in order.
pub(crate) enum PreparedPatch {
    /// A complete subtree built in its own scratch tree.
    Fresh { scratch: ViewTree, root: NodeId },
    /// Steps to run against views that already exist.
    Existing {
        root: NodeId,
        owner_flags: ApplyFlags,
        steps: Vec<Step>,
    },
}

pub(crate) enum Step {
    /// Applied as-is in phase two.
    Deferred(Action),
    /// UI half of a setter whose expensive half already ran.
    Widget { node: NodeId, commit: WidgetCommit },
    /// A subtree addition whose recycling decision is already made.
    Attach(AttachStep),
}

pub(crate) struct AttachStep {
    container: NodeId,
    remove: Option<(usize, usize)>,
    next_cursor: Option<usize>,
    child: ChildPatch,
}

enum ChildPatch {
    Reuse(PreparedPatch),
    Insert {
        index: usize,
        scratch: ViewTree,
        root: NodeId,
    },
}

impl Engine {
    pub(crate) fn prepare_fresh(
        &self,
        rv: &RemoteViews,
        params: &ApplyParams,
        cancel: &CancellationToken,
    ) -> Result<PreparedPatch, ApplyError> {
        let variant = rv.select_variant(params.config.orientation, params.available_size);
        let cx = ApplyCx::new(self, &params.config, variant.flags()).with_cancel(cancel);
        let mut scratch = ViewTree::new();
        let root = self.build(&mut scratch, variant, &cx)?;
        Ok(PreparedPatch::Fresh { scratch, root })
    }

    pub(crate) fn prepare_reapply(
        &self,
        tree: &ViewTree,
        node: NodeId,
        rv: &RemoteViews,
        params: &ApplyParams,
        cancel: &CancellationToken,
    ) -> Result<PreparedPatch, ApplyError> {
        let variant = check_reapply(tree, node, rv, params)?;
        let cx = ApplyCx::new(self, &params.config, variant.flags()).with_cancel(cancel);
        let mut shadow = ShadowTree::new(tree, node)?;
        self.prepare_existing(&mut shadow, 0, node, variant, &cx)
    }

    fn prepare_existing(
        &self,
        shadow: &mut ShadowTree<'_>,
        root: ShadowId,
        root_node: NodeId,
        rv: &RemoteViews,
        cx: &ApplyCx<'_>,
    ) -> Result<PreparedPatch, ApplyError> {
        let cx = cx.for_tree(rv);
        let mut steps = Vec::with_capacity(rv.actions().len());

        for action in rv.actions() {
            cx.check_cancelled()?;
            let step = match action.kind() {
                ActionKind::AddView(add) => self.prepare_add_view(shadow, root, action, add, &cx)?,
                ActionKind::Reflection(reflection) if reflection.value.param_type().prefers_async_apply() => {
                    self.prepare_setter(shadow, root, action, reflection)?
                }
                ActionKind::RemoveViews(remove) => {
                    if let Some(target) = shadow.find_view_by_id(root, action.view_id())? {
                        if shadow.traits(target).contains(ViewTraits::GROUP) {
                            match remove.keep_id {
                                None => shadow.remove_all(target)?,
                                Some(keep) => shadow.remove_except(target, keep)?,
                            }
                        }
                    }
                    Step::Deferred(action.clone())
                }
                ActionKind::RemoveFromParent => {
                    if let Some(target) = shadow.find_view_by_id(root, action.view_id())? {
                        if target != root {
                            shadow.remove_from_parent(target);
                        }
                    }
                    Step::Deferred(action.clone())
                }
                _ => Step::Deferred(action.clone()),
            };
            steps.push(step);
        }

        Ok(PreparedPatch::Existing {
            root: root_node,
            owner_flags: cx.owner_flags,
            steps,
        })
    }

    fn prepare_setter(
        &self,
        shadow: &mut ShadowTree<'_>,
        root: ShadowId,
        action: &Action,
        reflection: &ReflectionAction,
    ) -> Result<Step, ApplyError> {
        let target = shadow
            .find_view_by_id(root, action.view_id())?
            .and_then(|target| shadow.real(target));
        let Some(node) = target else {
            return Ok(Step::Deferred(action.clone()));
        };
        let resolved = self.registry.resolve(
            shadow.tree().node(node)?.class_name(),
            reflection.value.param_type(),
            &reflection.method,
        )?;
        match resolved.prepare(&reflection.value) {
            Some(commit) => Ok(Step::Widget { node, commit: commit? }),
            None => Ok(Step::Deferred(action.clone())),
        }
    }

    fn prepare_add_view(
        &self,
        shadow: &mut ShadowTree<'_>,
        root: ShadowId,
        action: &Action,
        add: &AddViewAction,
        cx: &ApplyCx<'_>,
    ) -> Result<Step, ApplyError> {
        let Some(target) = shadow.find_view_by_id(root, action.view_id())? else {
            return Ok(Step::Deferred(action.clone()));
        };
        if !shadow.traits(target).contains(ViewTraits::GROUP) {
            // Phase two reports the wrong target type.
            return Ok(Step::Deferred(action.clone()));
        }

        let nested = add.nested.select_variant(cx.config.orientation, None);
        let cursor = shadow.recycle(target).next_child;
        let children: Vec<ChildInfo> = shadow
            .children(target)?
            .into_iter()
            .map(|child| {
                let tags = shadow.recycle(child);
                ChildInfo {
                    stable_id: tags.stable_id,
                    recyclable: recyclable(tags, nested),
                }
            })
            .collect();
        let plan = plan_add(&children, cursor, add.stable_id, add.index)?;

        if let Some((start, count)) = plan.remove {
            shadow.remove_range(target, start, count)?;
        }
        shadow.set_cursor(target, plan.next_cursor);
        let container = shadow.real(target);

        let child = match plan.placement {
            Placement::Reuse(index) => {
                let reused = shadow
                    .children(target)?
                    .get(index)
                    .copied()
                    .ok_or(ActionError::IndexOutOfBounds {
                        index,
                        count: children.len(),
                    })?;
                match (container, shadow.real(reused)) {
                    (Some(_), Some(node)) => {
                        tracing::trace!(view_id = action.view_id(), stable_id = add.stable_id, index, "recycling child view");
                        ChildPatch::Reuse(self.prepare_existing(shadow, reused, node, nested, cx)?)
                    }
                    // Phase two runs the same decision against the views it creates.
                    _ => return Ok(Step::Deferred(action.clone())),
                }
            }
            Placement::Insert(index) => {
                let mut scratch = ViewTree::new();
                let node = self.build(&mut scratch, nested, cx)?;
                let built = scratch.node_mut(node)?;
                built.recycle.stable_id = add.stable_id;
                shadow.insert_placeholder(target, index, built.view_id(), built.traits(), built.recycle)?;
                if container.is_none() {
                    return Ok(Step::Deferred(action.clone()));
                }
                ChildPatch::Insert {
                    index,
                    scratch,
                    root: node,
                }
            }
        };

        let Some(container) = container else {
            return Ok(Step::Deferred(action.clone()));
        };
        Ok(Step::Attach(AttachStep {
            container,
            remove: plan.remove,
            next_cursor: plan.next_cursor,
            child,
        }))
    }
}

impl PreparedPatch {
    /// Phase two: applies the prepared work to `tree` and returns the root it touched.
    pub(crate) fn commit(
        self,
        engine: &Engine,
        tree: &mut ViewTree,
        config: &DeviceConfiguration,
    ) -> Result<NodeId, ApplyError> {
        match self {
            Self::Fresh { mut scratch, root } => Ok(tree.graft(&mut scratch, root)?),
            Self::Existing {
                root,
                owner_flags,
                steps,
            } => {
                let cx = ApplyCx::new(engine, config, owner_flags);
                for step in steps {
                    match step {
                        Step::Deferred(action) => action.apply(tree, root, &cx)?,
                        Step::Widget { node, commit } => {
                            if !tree.contains(node) {
                                tracing::trace!(node = node.index(), "prepared view is gone");
                                continue;
                            }
                            commit(tree.node_mut(node)?.widget_mut())?;
                        }
                        Step::Attach(attach) => attach.commit(engine, tree, config)?,
                    }
                }
                finalize_recycling(tree, root)?;
                Ok(root)
            }
        }
    }
}

impl AttachStep {
    fn commit(self, engine: &Engine, tree: &mut ViewTree, config: &DeviceConfiguration) -> Result<(), ApplyError> {
        if let Some((start, count)) = self.remove {
            tree.remove_children(self.container, start, count);
        }
        tree.node_mut(self.container)?.recycle.next_child = self.next_cursor;
        match self.child {
            ChildPatch::Reuse(patch) => {
                patch.commit(engine, tree, config)?;
            }
            ChildPatch::Insert {
                index,
                mut scratch,
                root,
            } => {
                let node = tree.graft(&mut scratch, root)?;
                if let Err(err) = tree.add_child(self.container, node, Some(index)) {
                    tree.remove(node);
                    return Err(err.into());
                }
            }
        }
        Ok(())
    }
}
