//! Synchronous application of single actions to a view tree.

use super::{
    Action, ActionKind, CollectionSource, Dimension, LayoutProperty, ResponseAction,
};
use crate::engine::ApplyCx;
use crate::error::{ActionError, ApplyError};
use crate::intent::RemoteResponse;
use crate::remote_views::ApplyFlags;
use crate::resources::{ResourceKind, pixel_size, resolve_resource};
use crate::value::{ParamType, ReflectionValue};
use crate::view::{
    AdapterState, CompoundDrawables, DrawableTint, NodeId, ResponseBinding, ViewTraits, ViewTree,
};

impl Action {
    /// Applies this action below `root`.
    ///
    /// A target view that can't be found makes the action a no-op.
    pub(crate) fn apply(&self, tree: &mut ViewTree, root: NodeId, cx: &ApplyCx<'_>) -> Result<(), ApplyError> {
        if let ActionKind::AddView(add) = &self.kind {
            return cx.engine.apply_add_view(tree, root, self.view_id, add, cx);
        }
        let Some(target) = tree.find_view_by_id(root, self.view_id) else {
            tracing::trace!(view_id = self.view_id, tag = self.tag(), "target view not found");
            return Ok(());
        };
        self.apply_to(tree, root, target, cx).map_err(ApplyError::from)
    }

    fn apply_to(
        &self,
        tree: &mut ViewTree,
        root: NodeId,
        target: NodeId,
        cx: &ApplyCx<'_>,
    ) -> Result<(), ActionError> {
        let view_id = self.view_id;
        match &self.kind {
            ActionKind::AddView(_) => Ok(()),
            ActionKind::ClickResponse(a) => {
                let Some(binding) = response_binding(tree, root, target, a, view_id, cx)? else {
                    return Ok(());
                };
                tree.node_mut(target)?.state.click = Some(binding);
                Ok(())
            }
            ActionKind::CheckedChangeResponse(a) => {
                if !tree.node(target)?.traits().contains(ViewTraits::COMPOUND_BUTTON) {
                    tracing::warn!(view_id, "checked change responses only apply to compound buttons");
                    return Ok(());
                }
                let Some(binding) = response_binding(tree, root, target, a, view_id, cx)? else {
                    return Ok(());
                };
                tree.node_mut(target)?.state.checked_change = Some(binding);
                Ok(())
            }
            ActionKind::Reflection(a) => invoke(tree, target, &a.method, &a.value, cx),
            ActionKind::BitmapReflection(a) => invoke(
                tree,
                target,
                &a.method,
                &ReflectionValue::Bitmap(Some(a.bitmap.clone())),
                cx,
            ),
            ActionKind::ResourceReflection(a) => {
                let value = resolve_resource(cx.engine.resolver(), cx.config, a.res_id, a.kind, a.param)?;
                invoke(tree, target, &a.method, &value, cx)
            }
            ActionKind::AttributeReflection(a) => {
                let res_id = cx
                    .engine
                    .resolver()
                    .theme_attribute(a.attr_id)
                    .ok_or(ActionError::AttributeNotFound(a.attr_id))?;
                let value = resolve_resource(cx.engine.resolver(), cx.config, res_id, a.kind, a.param)?;
                invoke(tree, target, &a.method, &value, cx)
            }
            ActionKind::DimensionReflection(a) => {
                let px = a.unit.to_px(a.value, cx.config);
                let value = match a.param {
                    ParamType::Int => ReflectionValue::Int(pixel_size(px)),
                    ParamType::Float => ReflectionValue::Float(px),
                    other => {
                        return Err(ActionError::ArgumentMismatch {
                            method: a.method.clone(),
                            expected: ParamType::Float,
                            actual: other,
                        });
                    }
                };
                invoke(tree, target, &a.method, &value, cx)
            }
            ActionKind::NightModeReflection(a) => {
                if a.light.param_type() != a.param || a.dark.param_type() != a.param {
                    return Err(ActionError::MalformedNightMode {
                        method: a.method.clone(),
                        param: a.param,
                    });
                }
                let value = if cx.config.night_mode { &a.dark } else { &a.light };
                invoke(tree, target, &a.method, value, cx)
            }
            ActionKind::DrawableTint(a) => {
                let node = tree.node_mut(target)?;
                if !a.background {
                    node.require(ViewTraits::IMAGE)?;
                }
                node.state.tint = Some(DrawableTint {
                    background: a.background,
                    color: a.color,
                    mode: a.mode,
                });
                Ok(())
            }
            ActionKind::ContentNavigation(a) => {
                let node = tree.node(target)?;
                node.require(ViewTraits::ANIMATOR)?;
                let count = match &node.state.adapter {
                    Some(AdapterState::Items(items)) => items.item_count(),
                    _ => node.children().len(),
                };
                if count == 0 {
                    return Ok(());
                }
                let node = tree.node_mut(target)?;
                let current = node.state.displayed_child.min(count - 1);
                node.state.displayed_child = if a.next {
                    (current + 1) % count
                } else {
                    (current + count - 1) % count
                };
                Ok(())
            }
            ActionKind::EmptyView(a) => {
                if !tree.node(target)?.traits().contains(ViewTraits::ADAPTER_VIEW) {
                    return Ok(());
                }
                if tree.find_view_by_id(root, a.empty_view_id).is_none() {
                    return Ok(());
                }
                tree.node_mut(target)?.state.empty_view = Some(a.empty_view_id);
                Ok(())
            }
            ActionKind::RemoveViews(a) => {
                tree.node(target)?.require(ViewTraits::GROUP)?;
                let children = tree.children(target).to_vec();
                match a.keep_id {
                    None => {
                        // Children with a stable id stay as recycling candidates.
                        for child in children {
                            if tree.node(child)?.recycle.stable_id.is_none() {
                                tree.remove(child);
                            }
                        }
                        tree.node_mut(target)?.recycle.next_child = Some(0);
                    }
                    Some(keep) => {
                        for child in children {
                            if tree.node(child)?.view_id() != keep {
                                tree.remove(child);
                            }
                        }
                    }
                }
                Ok(())
            }
            ActionKind::RemoveFromParent => {
                if target != root {
                    tree.remove(target);
                }
                Ok(())
            }
            ActionKind::PendingIntentTemplate(a) => {
                let node = tree.node_mut(target)?;
                node.require(ViewTraits::ADAPTER_VIEW)?;
                node.state.pending_intent_template = Some(a.pending.clone());
                Ok(())
            }
            ActionKind::LegacyAdapterIntent(a) => {
                if cx.owner_flags.contains(ApplyFlags::COLLECTION_CHILD) {
                    tracing::warn!(view_id, "remote adapters can't be set inside collection items");
                    return Ok(());
                }
                let node = tree.node_mut(target)?;
                if !node.traits().contains(ViewTraits::ADAPTER_VIEW) {
                    tracing::warn!(view_id, class = node.class_name(), "remote adapter target is not an adapter view");
                    return Ok(());
                }
                node.state.adapter = Some(AdapterState::Intent(a.intent.clone()));
                Ok(())
            }
            ActionKind::CollectionItems(a) => {
                let node = tree.node_mut(target)?;
                if !node.traits().contains(ViewTraits::ADAPTER_VIEW) {
                    tracing::warn!(view_id, class = node.class_name(), "collection items target is not an adapter view");
                    return Ok(());
                }
                if let CollectionSource::Cached { intent_id, .. } = &a.source {
                    tracing::trace!(view_id, intent_id, "binding cached collection");
                }
                node.state.adapter = Some(AdapterState::Items(a.source.items().clone()));
                Ok(())
            }
            ActionKind::CompoundDrawables(a) => {
                let node = tree.node_mut(target)?;
                node.require(ViewTraits::TEXT)?;
                node.state.compound_drawables = Some(CompoundDrawables {
                    relative: a.relative,
                    drawables: a.drawables.clone(),
                });
                Ok(())
            }
            ActionKind::TextSize(a) => {
                let node = tree.node_mut(target)?;
                node.require(ViewTraits::TEXT)?;
                node.state.text_size_px = Some(a.unit.to_px(a.size, cx.config));
                Ok(())
            }
            ActionKind::Padding(a) => {
                tree.node_mut(target)?.state.padding = [a.left, a.top, a.right, a.bottom];
                Ok(())
            }
            ActionKind::LayoutParam(a) => {
                let px = resolve_dimension(a.value, cx)?;
                let px = match a.value {
                    Dimension::Raw(raw) => raw,
                    _ => pixel_size(px),
                };
                let layout = &mut tree.node_mut(target)?.state.layout;
                match a.property {
                    LayoutProperty::Width => layout.width = Some(px),
                    LayoutProperty::Height => layout.height = Some(px),
                    LayoutProperty::MarginLeft | LayoutProperty::MarginStart => layout.margins[0] = Some(px),
                    LayoutProperty::MarginTop => layout.margins[1] = Some(px),
                    LayoutProperty::MarginRight | LayoutProperty::MarginEnd => layout.margins[2] = Some(px),
                    LayoutProperty::MarginBottom => layout.margins[3] = Some(px),
                }
                Ok(())
            }
            ActionKind::RippleColor(a) => {
                tree.node_mut(target)?.state.ripple_color = Some(a.color.clone());
                Ok(())
            }
            ActionKind::IntTag(a) => {
                tree.node_mut(target)?.state.int_tags.insert(a.key, a.value);
                Ok(())
            }
            ActionKind::CompoundButtonChecked(a) => {
                let node = tree.node_mut(target)?;
                node.require(ViewTraits::COMPOUND_BUTTON)?;
                node.state.checked = a.checked;
                Ok(())
            }
            ActionKind::RadioGroupChecked(a) => {
                let node = tree.node_mut(target)?;
                node.require(ViewTraits::RADIO_GROUP)?;
                node.state.checked_radio = Some(a.checked_id);
                for child in tree.children(target).to_vec() {
                    let child = tree.node_mut(child)?;
                    if child.traits().contains(ViewTraits::COMPOUND_BUTTON) {
                        child.state.checked = child.view_id() == a.checked_id;
                    }
                }
                Ok(())
            }
            ActionKind::OutlineRadius(a) => {
                let px = resolve_dimension(a.value, cx)?;
                tree.node_mut(target)?.state.outline_radius_px = Some(px);
                Ok(())
            }
        }
    }
}

fn invoke(
    tree: &mut ViewTree,
    target: NodeId,
    method: &str,
    value: &ReflectionValue,
    cx: &ApplyCx<'_>,
) -> Result<(), ActionError> {
    let node = tree.node_mut(target)?;
    let resolved = cx
        .engine
        .registry()
        .resolve(node.class_name(), value.param_type(), method)?;
    resolved.invoke(node.widget_mut(), value)
}

/// Checks a response against the collection-item rules and wraps it for the view.
///
/// Returns `None` for the combinations that are rejected with a warning.
fn response_binding(
    tree: &mut ViewTree,
    root: NodeId,
    target: NodeId,
    action: &ResponseAction,
    view_id: i32,
    cx: &ApplyCx<'_>,
) -> Result<Option<ResponseBinding>, ActionError> {
    let in_collection = cx.owner_flags.contains(ApplyFlags::COLLECTION_CHILD);
    match &action.response {
        RemoteResponse::Launch(_) | RemoteResponse::Combined { .. } if in_collection => {
            tracing::warn!(view_id, "pending intent responses can't be set on collection items; use a fill-in intent");
            return Ok(None);
        }
        RemoteResponse::FillIn(fill_in) => {
            if !in_collection {
                tracing::warn!(view_id, "fill-in responses are only available inside collection items");
                return Ok(None);
            }
            if target == root {
                tree.node_mut(target)?.state.fill_in_intent = Some(fill_in.clone());
            }
        }
        _ => {}
    }
    Ok(Some(ResponseBinding::new(
        action.response.clone(),
        cx.engine.interaction_handler(),
    )))
}

/// Resolves a dimension to pixels.
fn resolve_dimension(value: Dimension, cx: &ApplyCx<'_>) -> Result<f32, ActionError> {
    let resolver = cx.engine.resolver();
    let from_resource = |id: i32| -> Result<f32, ActionError> {
        match resolve_resource(resolver, cx.config, id, ResourceKind::Dimension, ParamType::Float)? {
            ReflectionValue::Float(px) => Ok(px),
            _ => Err(ActionError::WrongResourceType {
                id,
                expected: "dimension",
            }),
        }
    };
    match value {
        Dimension::Raw(px) => Ok(px as f32),
        Dimension::Complex { value, unit } => Ok(unit.to_px(value, cx.config)),
        Dimension::Resource(id) => from_resource(id),
        Dimension::Attribute(attr) => {
            let id = resolver
                .theme_attribute(attr)
                .ok_or(ActionError::AttributeNotFound(attr))?;
            from_resource(id)
        }
    }
}
