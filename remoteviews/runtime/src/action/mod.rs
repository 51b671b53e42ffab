//! The closed set of mutation commands a description tree carries.

mod apply;
mod wire;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::bitmap::Bitmap;
use crate::collection::RemoteCollectionItems;
use crate::error::ValidationError;
use crate::intent::{Intent, PendingIntent, RemoteResponse};
use crate::remote_views::RemoteViews;
use crate::resources::{ComplexUnit, NO_ID, ResourceKind};
use crate::value::{BlendMode, ColorStateList, Icon, ParamType, ReflectionValue};

/// How an action combines with an action of the same key during a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeBehavior {
    /// The later action supersedes the earlier one.
    Replace,
    /// Both actions are kept and applied in order.
    Append,
    /// The later copy is dropped.
    Ignore,
}

/// Identity of an action for merging.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionKey {
    family: u8,
    view_id: i32,
    method: Option<(String, ParamType)>,
}

impl ActionKey {
    pub fn family(&self) -> u8 {
        self.family
    }

    pub fn view_id(&self) -> i32 {
        self.view_id
    }
}

pub mod tags {
    pub const CLICK_RESPONSE: u8 = 1;
    pub const REFLECTION: u8 = 2;
    pub const DRAWABLE_TINT: u8 = 3;
    pub const VIEW_GROUP_ADD: u8 = 4;
    pub const CONTENT_NAVIGATION: u8 = 5;
    pub const EMPTY_VIEW: u8 = 6;
    pub const VIEW_GROUP_REMOVE: u8 = 7;
    pub const PENDING_INTENT_TEMPLATE: u8 = 8;
    pub const LEGACY_ADAPTER_INTENT: u8 = 10;
    pub const COMPOUND_DRAWABLES: u8 = 11;
    pub const BITMAP_REFLECTION: u8 = 12;
    pub const TEXT_SIZE: u8 = 13;
    pub const PADDING: u8 = 14;
    pub const LAYOUT_PARAM: u8 = 19;
    pub const RIPPLE_COLOR: u8 = 21;
    pub const INT_TAG: u8 = 22;
    pub const REMOVE_FROM_PARENT: u8 = 23;
    pub const RESOURCE_REFLECTION: u8 = 24;
    pub const COMPLEX_UNIT_DIMENSION_REFLECTION: u8 = 25;
    pub const NIGHT_MODE_REFLECTION: u8 = 26;
    pub const COLLECTION_ITEMS: u8 = 27;
    pub const ATTRIBUTE_REFLECTION: u8 = 28;
    pub const COMPOUND_BUTTON_CHECKED: u8 = 29;
    pub const RADIO_GROUP_CHECKED: u8 = 30;
    pub const OUTLINE_RADIUS: u8 = 31;
    pub const CHECKED_CHANGE_RESPONSE: u8 = 32;
}

/// A dimension that may need resolving against the consumer's resources.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Dimension {
    /// Raw pixels; also carries `MATCH_PARENT` / `WRAP_CONTENT`.
    Raw(i32),
    Complex { value: f32, unit: ComplexUnit },
    Resource(i32),
    Attribute(i32),
}

pub const MATCH_PARENT: i32 = -1;
pub const WRAP_CONTENT: i32 = -2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayoutProperty {
    Width,
    Height,
    MarginLeft,
    MarginTop,
    MarginRight,
    MarginBottom,
    MarginStart,
    MarginEnd,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseAction {
    pub response: RemoteResponse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionAction {
    pub method: String,
    pub value: ReflectionValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawableTintAction {
    pub background: bool,
    pub color: i32,
    pub mode: BlendMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddViewAction {
    #[serde(deserialize_with = "crate::remote_views::deserialize_nested")]
    pub nested: Box<RemoteViews>,
    /// Insertion index, or `None` to append.
    pub index: Option<usize>,
    pub stable_id: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationAction {
    pub next: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmptyViewAction {
    pub empty_view_id: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoveViewsAction {
    /// Child to keep; `None` removes every child without a stable id.
    pub keep_id: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateAction {
    pub pending: PendingIntent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterIntentAction {
    pub intent: Intent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompoundDrawablesAction {
    pub relative: bool,
    pub drawables: [Option<Icon>; 4],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BitmapReflectionAction {
    pub method: String,
    #[serde(skip)]
    pub bitmap: Bitmap,
    /// Index into the hierarchy's bitmap cache.
    pub bitmap_id: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextSizeAction {
    pub unit: ComplexUnit,
    pub size: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaddingAction {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutParamAction {
    pub property: LayoutProperty,
    pub value: Dimension,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RippleColorAction {
    pub color: ColorStateList,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntTagAction {
    pub key: i32,
    pub value: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceReflectionAction {
    pub method: String,
    pub param: ParamType,
    pub kind: ResourceKind,
    pub res_id: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionReflectionAction {
    pub method: String,
    pub param: ParamType,
    pub value: f32,
    pub unit: ComplexUnit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NightModeReflectionAction {
    pub method: String,
    pub param: ParamType,
    pub light: ReflectionValue,
    pub dark: ReflectionValue,
}

/// Where the items of a collection adapter come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CollectionSource {
    /// Items carried by the action itself.
    Inline(Arc<RemoteCollectionItems>),
    /// Items resolved from a remote factory, stored in the collection cache.
    Cached {
        intent_id: i32,
        uri: String,
        #[serde(skip)]
        items: Arc<RemoteCollectionItems>,
    },
}

impl CollectionSource {
    pub fn items(&self) -> &Arc<RemoteCollectionItems> {
        match self {
            Self::Inline(items) | Self::Cached { items, .. } => items,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionItemsAction {
    pub source: CollectionSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeReflectionAction {
    pub method: String,
    pub param: ParamType,
    pub kind: ResourceKind,
    pub attr_id: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckedAction {
    pub checked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadioCheckAction {
    pub checked_id: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlineRadiusAction {
    pub value: Dimension,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionKind {
    ClickResponse(ResponseAction),
    Reflection(ReflectionAction),
    DrawableTint(DrawableTintAction),
    AddView(AddViewAction),
    ContentNavigation(NavigationAction),
    EmptyView(EmptyViewAction),
    RemoveViews(RemoveViewsAction),
    PendingIntentTemplate(TemplateAction),
    LegacyAdapterIntent(AdapterIntentAction),
    CompoundDrawables(CompoundDrawablesAction),
    BitmapReflection(BitmapReflectionAction),
    TextSize(TextSizeAction),
    Padding(PaddingAction),
    LayoutParam(LayoutParamAction),
    RippleColor(RippleColorAction),
    IntTag(IntTagAction),
    RemoveFromParent,
    ResourceReflection(ResourceReflectionAction),
    DimensionReflection(DimensionReflectionAction),
    NightModeReflection(NightModeReflectionAction),
    CollectionItems(CollectionItemsAction),
    AttributeReflection(AttributeReflectionAction),
    CompoundButtonChecked(CheckedAction),
    RadioGroupChecked(RadioCheckAction),
    OutlineRadius(OutlineRadiusAction),
    CheckedChangeResponse(ResponseAction),
}

/// One mutation command aimed at the view with id `view_id`.
///
/// Actions are immutable once built; the tree they belong to only appends,
/// drops or re-roots them.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    view_id: i32,
    kind: ActionKind,
}

impl Action {
    pub fn new(view_id: i32, kind: ActionKind) -> Self {
        Self { view_id, kind }
    }

    pub fn view_id(&self) -> i32 {
        self.view_id
    }

    pub fn kind(&self) -> &ActionKind {
        &self.kind
    }

    pub(crate) fn kind_mut(&mut self) -> &mut ActionKind {
        &mut self.kind
    }

    pub fn tag(&self) -> u8 {
        use ActionKind as K;
        match &self.kind {
            K::ClickResponse(_) => tags::CLICK_RESPONSE,
            K::Reflection(_) => tags::REFLECTION,
            K::DrawableTint(_) => tags::DRAWABLE_TINT,
            K::AddView(_) => tags::VIEW_GROUP_ADD,
            K::ContentNavigation(_) => tags::CONTENT_NAVIGATION,
            K::EmptyView(_) => tags::EMPTY_VIEW,
            K::RemoveViews(_) => tags::VIEW_GROUP_REMOVE,
            K::PendingIntentTemplate(_) => tags::PENDING_INTENT_TEMPLATE,
            K::LegacyAdapterIntent(_) => tags::LEGACY_ADAPTER_INTENT,
            K::CompoundDrawables(_) => tags::COMPOUND_DRAWABLES,
            K::BitmapReflection(_) => tags::BITMAP_REFLECTION,
            K::TextSize(_) => tags::TEXT_SIZE,
            K::Padding(_) => tags::PADDING,
            K::LayoutParam(_) => tags::LAYOUT_PARAM,
            K::RippleColor(_) => tags::RIPPLE_COLOR,
            K::IntTag(_) => tags::INT_TAG,
            K::RemoveFromParent => tags::REMOVE_FROM_PARENT,
            K::ResourceReflection(_) => tags::RESOURCE_REFLECTION,
            K::DimensionReflection(_) => tags::COMPLEX_UNIT_DIMENSION_REFLECTION,
            K::NightModeReflection(_) => tags::NIGHT_MODE_REFLECTION,
            K::CollectionItems(_) => tags::COLLECTION_ITEMS,
            K::AttributeReflection(_) => tags::ATTRIBUTE_REFLECTION,
            K::CompoundButtonChecked(_) => tags::COMPOUND_BUTTON_CHECKED,
            K::RadioGroupChecked(_) => tags::RADIO_GROUP_CHECKED,
            K::OutlineRadius(_) => tags::OUTLINE_RADIUS,
            K::CheckedChangeResponse(_) => tags::CHECKED_CHANGE_RESPONSE,
        }
    }

    /// Setter name and argument type for the reflection family.
    fn reflected_method(&self) -> Option<(&str, ParamType)> {
        use ActionKind as K;
        match &self.kind {
            K::Reflection(a) => Some((a.method.as_str(), a.value.param_type())),
            K::BitmapReflection(a) => Some((a.method.as_str(), ParamType::Bitmap)),
            K::ResourceReflection(a) => Some((a.method.as_str(), a.param)),
            K::DimensionReflection(a) => Some((a.method.as_str(), a.param)),
            K::NightModeReflection(a) => Some((a.method.as_str(), a.param)),
            K::AttributeReflection(a) => Some((a.method.as_str(), a.param)),
            _ => None,
        }
    }

    pub fn unique_key(&self) -> ActionKey {
        let family = match self.tag() {
            tags::BITMAP_REFLECTION
            | tags::RESOURCE_REFLECTION
            | tags::COMPLEX_UNIT_DIMENSION_REFLECTION
            | tags::NIGHT_MODE_REFLECTION
            | tags::ATTRIBUTE_REFLECTION => tags::REFLECTION,
            tags::COLLECTION_ITEMS => tags::LEGACY_ADAPTER_INTENT,
            tag => tag,
        };
        ActionKey {
            family,
            view_id: self.view_id,
            method: self
                .reflected_method()
                .map(|(method, param)| (method.to_string(), param)),
        }
    }

    pub fn merge_behavior(&self) -> MergeBehavior {
        match &self.kind {
            ActionKind::AddView(_) | ActionKind::RemoveViews(_) | ActionKind::RemoveFromParent => {
                MergeBehavior::Append
            }
            ActionKind::ContentNavigation(_) => MergeBehavior::Ignore,
            _ => match self.reflected_method() {
                Some(("smoothScrollBy" | "scrollBy", _)) => MergeBehavior::Append,
                _ => MergeBehavior::Replace,
            },
        }
    }

    /// Whether part of this action's work may need I/O and should run off
    /// the apply thread.
    pub fn prefers_async_apply(&self) -> bool {
        match &self.kind {
            ActionKind::Reflection(a) => a.value.param_type().prefers_async_apply(),
            ActionKind::AddView(a) => a.nested.prefers_async_apply(),
            _ => false,
        }
    }

    /// Reports every URI this action references.
    pub fn visit_uris(&self, visitor: &mut dyn FnMut(&str)) {
        match &self.kind {
            ActionKind::Reflection(a) => a.value.visit_uris(visitor),
            ActionKind::NightModeReflection(a) => {
                a.light.visit_uris(visitor);
                a.dark.visit_uris(visitor);
            }
            ActionKind::CompoundDrawables(a) => {
                for uri in a.drawables.iter().flatten().filter_map(Icon::uri) {
                    visitor(uri);
                }
            }
            ActionKind::ClickResponse(a) | ActionKind::CheckedChangeResponse(a) => {
                a.response.visit_uris(visitor);
            }
            ActionKind::AddView(a) => a.nested.visit_uris(visitor),
            ActionKind::CollectionItems(a) => {
                for view in a.source.items().views() {
                    view.visit_uris(visitor);
                }
            }
            _ => {}
        }
    }

    /// Nested trees owned by this action.
    pub(crate) fn nested_trees(&self) -> Vec<&RemoteViews> {
        match &self.kind {
            ActionKind::AddView(a) => vec![a.nested.as_ref()],
            ActionKind::CollectionItems(a) => a.source.items().views().iter().collect(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn for_each_nested_mut(&mut self, f: &mut dyn FnMut(&mut RemoteViews)) {
        match &mut self.kind {
            ActionKind::AddView(a) => f(&mut a.nested),
            // Cached snapshots belong to the collection cache and are
            // walked through it instead.
            ActionKind::CollectionItems(CollectionItemsAction {
                source: CollectionSource::Inline(items),
            }) => {
                if !items.is_empty() {
                    for view in Arc::make_mut(items).views_mut() {
                        f(view);
                    }
                }
            }
            _ => {}
        }
    }

    /// Rewrites every view and resource id this action carries through `map`.
    ///
    /// Nested trees are left to the caller.
    pub(crate) fn remap_ids(
        &mut self,
        map: &mut dyn FnMut(i32) -> Result<i32, ValidationError>,
    ) -> Result<(), ValidationError> {
        let mut remap = |id: &mut i32| -> Result<(), ValidationError> {
            if *id != NO_ID && *id != 0 {
                *id = map(*id)?;
            }
            Ok(())
        };

        remap(&mut self.view_id)?;
        match &mut self.kind {
            ActionKind::EmptyView(a) => remap(&mut a.empty_view_id)?,
            ActionKind::RemoveViews(a) => {
                if let Some(keep) = &mut a.keep_id {
                    remap(keep)?;
                }
            }
            ActionKind::ResourceReflection(a) => remap(&mut a.res_id)?,
            ActionKind::AttributeReflection(a) => remap(&mut a.attr_id)?,
            ActionKind::RadioGroupChecked(a) => remap(&mut a.checked_id)?,
            ActionKind::IntTag(a) => remap(&mut a.key)?,
            ActionKind::LayoutParam(LayoutParamAction { value, .. })
            | ActionKind::OutlineRadius(OutlineRadiusAction { value }) => match value {
                Dimension::Resource(id) | Dimension::Attribute(id) => remap(id)?,
                Dimension::Raw(_) | Dimension::Complex { .. } => {}
            },
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn reflection(view_id: i32, method: &str, value: ReflectionValue) -> Action {
        Action::new(
            view_id,
            ActionKind::Reflection(ReflectionAction {
                method: method.to_string(),
                value,
            }),
        )
    }

    #[test]
    fn reflection_keys_include_method_and_type() {
        let text = reflection(1, "setText", ReflectionValue::CharSequence(Some("a".into())));
        let alpha = reflection(1, "setAlpha", ReflectionValue::Float(0.5));
        let other_view = reflection(2, "setText", ReflectionValue::CharSequence(None));
        assert_ne!(text.unique_key(), alpha.unique_key());
        assert_ne!(text.unique_key(), other_view.unique_key());

        let night = Action::new(
            1,
            ActionKind::NightModeReflection(NightModeReflectionAction {
                method: "setText".to_string(),
                param: ParamType::CharSequence,
                light: ReflectionValue::CharSequence(Some("day".into())),
                dark: ReflectionValue::CharSequence(Some("night".into())),
            }),
        );
        assert_eq!(text.unique_key(), night.unique_key());
    }

    #[test]
    fn collection_actions_supersede_legacy_intents() {
        let legacy = Action::new(
            5,
            ActionKind::LegacyAdapterIntent(AdapterIntentAction {
                intent: Intent::default(),
            }),
        );
        let items = Action::new(
            5,
            ActionKind::CollectionItems(CollectionItemsAction {
                source: CollectionSource::Inline(Arc::default()),
            }),
        );
        assert_eq!(legacy.unique_key(), items.unique_key());
    }

    #[rstest]
    #[case(reflection(1, "smoothScrollBy", ReflectionValue::Int(3)), MergeBehavior::Append)]
    #[case(reflection(1, "setText", ReflectionValue::CharSequence(None)), MergeBehavior::Replace)]
    #[case(Action::new(1, ActionKind::RemoveFromParent), MergeBehavior::Append)]
    #[case(
        Action::new(1, ActionKind::RemoveViews(RemoveViewsAction { keep_id: None })),
        MergeBehavior::Append
    )]
    #[case(
        Action::new(1, ActionKind::ContentNavigation(NavigationAction { next: true })),
        MergeBehavior::Ignore
    )]
    #[case(
        Action::new(1, ActionKind::Padding(PaddingAction { left: 1, top: 2, right: 3, bottom: 4 })),
        MergeBehavior::Replace
    )]
    fn merge_behaviors(#[case] action: Action, #[case] expected: MergeBehavior) {
        assert_eq!(action.merge_behavior(), expected);
    }

    #[test]
    fn uri_and_icon_setters_prefer_async() {
        assert!(reflection(1, "setImageURI", ReflectionValue::Uri(Some("content://a".into())))
            .prefers_async_apply());
        assert!(!reflection(1, "setAlpha", ReflectionValue::Float(1.0)).prefers_async_apply());
    }

    #[test]
    fn remap_skips_missing_ids() {
        let mut action = Action::new(
            7,
            ActionKind::RemoveViews(RemoveViewsAction { keep_id: Some(NO_ID) }),
        );
        action
            .remap_ids(&mut |id| Ok(id + 100))
            .expect("remap");
        assert_eq!(action.view_id(), 107);
        assert_eq!(
            action.kind(),
            &ActionKind::RemoveViews(RemoveViewsAction { keep_id: Some(NO_ID) })
        );
    }
}
