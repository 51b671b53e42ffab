//! Description trees: a layout plus an ordered action list, or a set of
//! orientation/size variants.

use std::cell::Cell;
use std::fmt;
use std::sync::Arc;
use std::thread::LocalKey;

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::action::{
    Action, ActionKind, AddViewAction, AdapterIntentAction, AttributeReflectionAction,
    BitmapReflectionAction, CheckedAction, CollectionItemsAction, CollectionSource,
    CompoundDrawablesAction, Dimension, DimensionReflectionAction, DrawableTintAction,
    EmptyViewAction, IntTagAction, LayoutParamAction, LayoutProperty, MergeBehavior,
    NavigationAction, NightModeReflectionAction, OutlineRadiusAction, PaddingAction,
    RadioCheckAction, ReflectionAction, RemoveViewsAction, ResourceReflectionAction,
    ResponseAction, RippleColorAction, TemplateAction, TextSizeAction,
};
use crate::bitmap::Bitmap;
use crate::cache::{ApplicationInfo, CacheHandle};
use crate::collection::RemoteCollectionItems;
use crate::error::ValidationError;
use crate::intent::{Intent, PendingIntent, RemoteResponse};
use crate::resources::{ComplexUnit, NO_ID, Orientation, ResourceKind, SizeF};
use crate::value::{BlendMode, ColorStateList, Icon, ParamType, ReflectionValue};

/// Maximum number of nested subtree additions in one hierarchy.
pub const MAX_NESTED_VIEWS: usize = 10;

/// Ceiling on tree recursion while decoding, trusted callers included.
pub const MAX_DECODE_DEPTH: usize = 64;

/// Maximum number of entries of a size-keyed variant list.
pub const MAX_INIT_VIEW_COUNT: usize = 16;

bitflags! {
    /// Flags that travel with a tree and its variants.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct ApplyFlags: u32 {
        /// An action destroyed state that a reapply could not restore.
        const REAPPLY_DISALLOWED = 1 << 0;
        /// The tree describes an item of a collection.
        const COLLECTION_CHILD = 1 << 1;
        /// Inflate the light-background layout when one is registered.
        const USE_LIGHT_BACKGROUND_LAYOUT = 1 << 2;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct InstructionChunk(#[serde(with = "crate::bitmap::base64_bytes")] Vec<u8>);

/// Opaque payload for an alternative renderer, inflated instead of a layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawInstructions {
    instructions: Vec<InstructionChunk>,
}

impl DrawInstructions {
    pub fn new(instructions: Vec<Vec<u8>>) -> Self {
        Self {
            instructions: instructions.into_iter().map(InstructionChunk).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn instructions(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.instructions.iter().map(|chunk| chunk.0.as_slice())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Variants {
    None,
    Orientation {
        landscape: Box<RemoteViews>,
        portrait: Box<RemoteViews>,
    },
    /// Ordered so the smallest-area entry is last.
    Sized(Vec<RemoteViews>),
}

/// A serializable description of a view hierarchy and the actions to replay
/// on it.
///
/// Cloning a root gives an independent root holding only the cache entries
/// the copy references. Cloning a subtree gives a detached subtree that
/// attaches to whichever hierarchy it is added to.
pub struct RemoteViews {
    app: Arc<ApplicationInfo>,
    layout_id: i32,
    light_background_layout_id: i32,
    view_id: i32,
    actions: Vec<Action>,
    variants: Variants,
    ideal_size: Option<SizeF>,
    flags: ApplyFlags,
    provider_instance_id: i64,
    draw_instructions: Option<DrawInstructions>,
    caches: CacheHandle,
}

impl RemoteViews {
    pub fn new(package: impl Into<String>, layout_id: i32) -> Self {
        Self::for_application(ApplicationInfo::new(package, 0), layout_id)
    }

    pub fn for_application(app: ApplicationInfo, layout_id: i32) -> Self {
        let caches = CacheHandle::new_root();
        let app = caches
            .with(|set| set.app_infos.intern(&Arc::new(app.clone())))
            .unwrap_or_else(|| Arc::new(app));
        Self {
            app,
            layout_id,
            light_background_layout_id: NO_ID,
            view_id: NO_ID,
            actions: Vec::new(),
            variants: Variants::None,
            ideal_size: None,
            flags: ApplyFlags::empty(),
            provider_instance_id: 0,
            draw_instructions: None,
            caches,
        }
    }

    /// A tree rendered by an alternative renderer instead of an inflated layout.
    pub fn from_draw_instructions(app: ApplicationInfo, instructions: DrawInstructions) -> Self {
        let mut tree = Self::for_application(app, NO_ID);
        tree.draw_instructions = Some(instructions);
        tree
    }

    /// Variant pair chosen by the device orientation at apply time.
    pub fn from_orientations(landscape: RemoteViews, portrait: RemoteViews) -> Result<Self, ValidationError> {
        if landscape.has_multiple_layouts() || portrait.has_multiple_layouts() {
            return Err(ValidationError::ConflictingVariants);
        }
        check_same_application(&portrait, &landscape)?;

        let mut tree = Self::for_application((*portrait.app).clone(), NO_ID);
        tree.variants = Variants::Orientation {
            landscape: Box::new(landscape),
            portrait: Box::new(portrait),
        };
        tree.reconstruct_caches();
        Ok(tree)
    }

    /// Variants keyed by the size they are designed for.
    ///
    /// A single entry yields that tree unchanged.
    pub fn from_sizes(mut sized: Vec<(SizeF, RemoteViews)>) -> Result<Self, ValidationError> {
        if sized.len() > MAX_INIT_VIEW_COUNT {
            return Err(ValidationError::TooManySizes {
                count: sized.len(),
                max: MAX_INIT_VIEW_COUNT,
            });
        }
        if sized.len() == 1 {
            return sized.pop().map(|(_, only)| only).ok_or(ValidationError::EmptySizeMap);
        }
        let Some(smallest) = sized
            .iter()
            .enumerate()
            .min_by(|(_, (a, _)), (_, (b, _))| a.area().total_cmp(&b.area()))
            .map(|(index, _)| index)
        else {
            return Err(ValidationError::EmptySizeMap);
        };
        if sized.iter().any(|(_, tree)| tree.has_multiple_layouts()) {
            return Err(ValidationError::ConflictingVariants);
        }
        let first = &sized[0].1;
        for (_, tree) in &sized[1..] {
            check_same_application(first, tree)?;
        }

        let last = sized.remove(smallest);
        sized.push(last);
        let app = (*sized[0].1.app).clone();
        let variants = sized
            .into_iter()
            .map(|(size, mut tree)| {
                tree.ideal_size = Some(size);
                tree
            })
            .collect();

        let mut tree = Self::for_application(app, NO_ID);
        tree.variants = Variants::Sized(variants);
        tree.reconstruct_caches();
        Ok(tree)
    }

    pub fn package(&self) -> &str {
        &self.app.package
    }

    pub fn application(&self) -> &Arc<ApplicationInfo> {
        &self.app
    }

    /// Layout to inflate, honoring the light-background preference.
    pub fn layout_id(&self) -> i32 {
        match &self.variants {
            Variants::None => {
                if self.flags.contains(ApplyFlags::USE_LIGHT_BACKGROUND_LAYOUT)
                    && self.light_background_layout_id != NO_ID
                {
                    self.light_background_layout_id
                } else {
                    self.layout_id
                }
            }
            Variants::Orientation { portrait, .. } => portrait.layout_id(),
            Variants::Sized(variants) => variants.last().map_or(NO_ID, RemoteViews::layout_id),
        }
    }

    /// Id the top-level view is given after inflation, or `NO_ID`.
    pub fn view_id(&self) -> i32 {
        match &self.variants {
            Variants::None => self.view_id,
            Variants::Orientation { portrait, .. } => portrait.view_id(),
            Variants::Sized(variants) => variants.last().map_or(NO_ID, RemoteViews::view_id),
        }
    }

    pub fn set_view_id(&mut self, view_id: i32) -> &mut Self {
        self.view_id = view_id;
        self.for_each_variant_mut(&mut |variant| {
            variant.set_view_id(view_id);
        });
        self
    }

    pub fn set_light_background_layout(&mut self, layout_id: i32) -> &mut Self {
        self.light_background_layout_id = layout_id;
        self
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn ideal_size(&self) -> Option<SizeF> {
        self.ideal_size
    }

    pub fn flags(&self) -> ApplyFlags {
        self.flags
    }

    /// Adds `flags` here and on every variant.
    pub fn add_flags(&mut self, flags: ApplyFlags) -> &mut Self {
        self.flags |= flags;
        self.for_each_variant_mut(&mut |variant| {
            variant.add_flags(flags);
        });
        self
    }

    pub fn set_reapply_disallowed(&mut self) -> &mut Self {
        self.add_flags(ApplyFlags::REAPPLY_DISALLOWED)
    }

    pub fn is_reapply_disallowed(&self) -> bool {
        self.flags.contains(ApplyFlags::REAPPLY_DISALLOWED)
    }

    pub fn set_use_light_background_layout(&mut self, enabled: bool) -> &mut Self {
        if enabled {
            self.add_flags(ApplyFlags::USE_LIGHT_BACKGROUND_LAYOUT)
        } else {
            self.flags.remove(ApplyFlags::USE_LIGHT_BACKGROUND_LAYOUT);
            self.for_each_variant_mut(&mut |variant| {
                variant.set_use_light_background_layout(false);
            });
            self
        }
    }

    pub fn provider_instance_id(&self) -> i64 {
        self.provider_instance_id
    }

    pub fn set_provider_instance_id(&mut self, id: i64) -> &mut Self {
        self.provider_instance_id = id;
        self.for_each_variant_mut(&mut |variant| {
            variant.set_provider_instance_id(id);
        });
        self
    }

    pub fn draw_instructions(&self) -> Option<&DrawInstructions> {
        self.draw_instructions.as_ref()
    }

    pub fn has_draw_instructions(&self) -> bool {
        self.draw_instructions.is_some()
    }

    pub fn has_multiple_layouts(&self) -> bool {
        !matches!(self.variants, Variants::None)
    }

    pub fn is_root(&self) -> bool {
        self.caches.is_root()
    }

    pub fn caches(&self) -> &CacheHandle {
        &self.caches
    }

    /// Size variants in selection order; empty for other modes.
    pub fn sized_variants(&self) -> &[RemoteViews] {
        match &self.variants {
            Variants::Sized(variants) => variants,
            _ => &[],
        }
    }

    /// Picks the variant to apply.
    ///
    /// Orientation pairs follow `orientation`. Size lists pick, among the
    /// variants that fit `available`, the one closest to it, falling back to
    /// the smallest variant when nothing fits or no size is known.
    pub fn select_variant(&self, orientation: Orientation, available: Option<SizeF>) -> &RemoteViews {
        match &self.variants {
            Variants::None => self,
            Variants::Orientation {
                landscape,
                portrait,
            } => match orientation {
                Orientation::Landscape => landscape,
                Orientation::Portrait => portrait,
            },
            Variants::Sized(variants) => {
                let Some(smallest) = variants.last() else {
                    return self;
                };
                let Some(available) = available else {
                    return smallest;
                };
                variants
                    .iter()
                    .filter_map(|variant| {
                        let ideal = variant.ideal_size?;
                        fits_in(ideal, available).then(|| (variant, squared_distance(ideal, available)))
                    })
                    .min_by(|(_, a), (_, b)| a.total_cmp(b))
                    .map_or(smallest, |(variant, _)| variant)
            }
        }
    }

    /// Longest chain of nested subtree additions below this tree.
    pub fn nesting_depth(&self) -> usize {
        let from_variants = self
            .variants_iter()
            .map(RemoteViews::nesting_depth)
            .max()
            .unwrap_or(0);
        let from_actions = self
            .actions
            .iter()
            .filter_map(|action| match action.kind() {
                ActionKind::AddView(add) => Some(add.nested.nesting_depth() + 1),
                _ => None,
            })
            .max()
            .unwrap_or(0);
        from_variants.max(from_actions)
    }

    /// Memory held by the bitmaps of this hierarchy.
    pub fn estimate_memory_usage(&self) -> usize {
        if let Some(usage) = self.caches.with(|set| set.bitmaps.memory_usage()) {
            return usage;
        }
        let mut usage = 0;
        self.for_each_tree(&mut |tree| {
            for action in &tree.actions {
                if let ActionKind::BitmapReflection(a) = action.kind() {
                    usage += a.bitmap.allocation_size();
                }
            }
        });
        usage
    }

    /// Reports every URI referenced anywhere in the hierarchy.
    pub fn visit_uris(&self, visitor: &mut dyn FnMut(&str)) {
        for variant in self.variants_iter() {
            variant.visit_uris(visitor);
        }
        for action in &self.actions {
            action.visit_uris(visitor);
        }
    }

    /// Whether any action of the hierarchy benefits from an async apply.
    pub fn prefers_async_apply(&self) -> bool {
        self.variants_iter().any(RemoteViews::prefers_async_apply)
            || self.actions.iter().any(Action::prefers_async_apply)
    }

    /// Appends `action`, attaching anything it carries to this hierarchy's caches.
    pub fn add_action(&mut self, mut action: Action) -> Result<&mut Self, ValidationError> {
        if self.has_multiple_layouts() {
            return Err(ValidationError::VariantModeImmutable);
        }
        if let ActionKind::AddView(add) = action.kind() {
            let depth = add.nested.nesting_depth() + 1;
            if depth > MAX_NESTED_VIEWS {
                return Err(ValidationError::TooManyNestedViews {
                    depth,
                    max: MAX_NESTED_VIEWS,
                });
            }
        }
        attach_action(&mut action, &self.caches);
        self.actions.push(action);
        Ok(self)
    }

    /// Merges the actions of `other` into this tree.
    ///
    /// An action whose key collides with an existing one replaces it when it
    /// declares [`MergeBehavior::Replace`], landing at its own relative
    /// position; appended actions are always kept and ignored ones dropped.
    pub fn merge(&mut self, other: &RemoteViews) -> Result<(), ValidationError> {
        if self.has_multiple_layouts() || other.has_multiple_layouts() {
            return Err(ValidationError::VariantModeImmutable);
        }
        let copy = other.deep_copy();

        let mut working: Vec<Option<Action>> = self.actions.drain(..).map(Some).collect();
        let mut index = rustc_hash::FxHashMap::default();
        for (position, action) in working.iter().enumerate() {
            if let Some(action) = action {
                index.insert(action.unique_key(), position);
            }
        }

        for action in copy.actions {
            let behavior = action.merge_behavior();
            if behavior == MergeBehavior::Replace {
                if let Some(position) = index.remove(&action.unique_key()) {
                    working[position] = None;
                }
            }
            if matches!(behavior, MergeBehavior::Replace | MergeBehavior::Append) {
                working.push(Some(action));
            }
        }

        self.actions = working.into_iter().flatten().collect();
        self.reconstruct_caches();
        Ok(())
    }

    /// A standalone root copy whose caches hold only what it references.
    pub fn deep_copy(&self) -> RemoteViews {
        let mut copy = self.clone();
        if !copy.is_root() {
            copy.reconstruct_caches();
        }
        copy
    }

    /// Rebuilds this tree's caches from scratch and makes it the root of
    /// everything below it.
    pub fn reconstruct_caches(&mut self) {
        self.caches = CacheHandle::new_root();
        let root = self.caches.clone();
        self.app = intern_app(&root, &self.app);
        self.attach_descendants(&root);

        // Cached collection snapshots are owned by the collection cache:
        // re-root them once there, then point every action at the result.
        // The cache is taken out while re-rooting since that locks the set.
        let Some(set) = root.upgrade() else {
            return;
        };
        let mut collections = std::mem::take(&mut set.lock().collections);
        if collections.is_empty() {
            return;
        }
        let ids: Vec<i32> = collections.entries().map(|(id, _, _)| id).collect();
        for id in ids {
            collections.set_hierarchy_root_for_id(id, &root);
        }
        self.for_each_tree_mut(&mut |tree| {
            for action in &mut tree.actions {
                if let ActionKind::CollectionItems(CollectionItemsAction {
                    source: CollectionSource::Cached {
                        intent_id, items, ..
                    },
                }) = action.kind_mut()
                {
                    if let Some(shared) = collections.items_for_id(*intent_id) {
                        *items = shared;
                    }
                }
            }
        });

        let mut guard = set.lock();
        let added = std::mem::replace(&mut guard.collections, collections);
        for (id, uri, items) in added.entries() {
            guard.collections.add_mapping(id, uri, items.clone());
        }
    }

    /// Points this tree and its descendants at the caches behind `root`.
    pub(crate) fn set_hierarchy_root(&mut self, root: &CacheHandle) {
        self.caches = root.downgrade();
        self.app = intern_app(root, &self.app);
        self.attach_descendants(root);
    }

    fn attach_descendants(&mut self, root: &CacheHandle) {
        match &mut self.variants {
            Variants::None => {}
            Variants::Orientation {
                landscape,
                portrait,
            } => {
                landscape.set_hierarchy_root(root);
                portrait.set_hierarchy_root(root);
            }
            Variants::Sized(variants) => {
                for variant in variants {
                    variant.set_hierarchy_root(root);
                }
            }
        }
        for action in &mut self.actions {
            attach_action(action, root);
        }
    }

    fn variants_iter(&self) -> impl Iterator<Item = &RemoteViews> + '_ {
        let (pair, sized): (Vec<&RemoteViews>, &[RemoteViews]) = match &self.variants {
            Variants::None => (Vec::new(), &[]),
            Variants::Orientation {
                landscape,
                portrait,
            } => (vec![landscape.as_ref(), portrait.as_ref()], &[]),
            Variants::Sized(variants) => (Vec::new(), variants.as_slice()),
        };
        pair.into_iter().chain(sized.iter())
    }

    fn for_each_variant_mut(&mut self, f: &mut dyn FnMut(&mut RemoteViews)) {
        match &mut self.variants {
            Variants::None => {}
            Variants::Orientation {
                landscape,
                portrait,
            } => {
                f(landscape);
                f(portrait);
            }
            Variants::Sized(variants) => variants.iter_mut().for_each(|variant| f(variant)),
        }
    }

    /// Visits this tree, its variants and every nested tree, parents first.
    pub(crate) fn for_each_tree(&self, f: &mut dyn FnMut(&RemoteViews)) {
        f(self);
        for variant in self.variants_iter() {
            variant.for_each_tree(f);
        }
        for action in &self.actions {
            for nested in action.nested_trees() {
                nested.for_each_tree(f);
            }
        }
    }

    /// Mutable counterpart of [`Self::for_each_tree`]; cached collection
    /// snapshots are not entered.
    pub(crate) fn for_each_tree_mut(&mut self, f: &mut dyn FnMut(&mut RemoteViews)) {
        f(self);
        self.for_each_variant_mut(&mut |variant| variant.for_each_tree_mut(f));
        for action in &mut self.actions {
            action.for_each_nested_mut(&mut |nested| nested.for_each_tree_mut(f));
        }
    }

    /// Fallible variant of [`Self::for_each_tree_mut`], stopping at the first error.
    pub(crate) fn try_for_each_tree_mut(
        &mut self,
        f: &mut dyn FnMut(&mut RemoteViews) -> Result<(), ValidationError>,
    ) -> Result<(), ValidationError> {
        let mut result = Ok(());
        self.for_each_tree_mut(&mut |tree| {
            if result.is_ok() {
                result = f(tree);
            }
        });
        result
    }

    pub(crate) fn actions_mut(&mut self) -> &mut Vec<Action> {
        &mut self.actions
    }

    /// Rewrites the layout, view and resource ids of this tree only.
    pub(crate) fn remap_own_ids(
        &mut self,
        map: &mut dyn FnMut(i32) -> Result<i32, ValidationError>,
    ) -> Result<(), ValidationError> {
        for id in [
            &mut self.layout_id,
            &mut self.light_background_layout_id,
            &mut self.view_id,
        ] {
            if *id != NO_ID && *id != 0 {
                *id = map(*id)?;
            }
        }
        for action in &mut self.actions {
            action.remap_ids(map)?;
        }
        Ok(())
    }

    /// Makes this tree the root owning `caches` and attaches its descendants.
    ///
    /// Bitmaps and cached collections must already be filled in.
    pub(crate) fn adopt_caches(&mut self, caches: CacheHandle) {
        self.caches = caches;
        let root = self.caches.clone();
        self.app = intern_app(&root, &self.app);
        self.attach_descendants(&root);
    }
}

/// Whether `ideal` fits `available`, give or take one unit of rounding.
fn fits_in(ideal: SizeF, available: SizeF) -> bool {
    ideal.width <= available.width + 1.0 && ideal.height <= available.height + 1.0
}

fn squared_distance(a: SizeF, b: SizeF) -> f32 {
    let dw = a.width - b.width;
    let dh = a.height - b.height;
    dw * dw + dh * dh
}

fn check_same_application(expected: &RemoteViews, found: &RemoteViews) -> Result<(), ValidationError> {
    if expected.app == found.app {
        Ok(())
    } else {
        Err(ValidationError::MixedApplications {
            expected: expected.app.package.clone(),
            found: found.app.package.clone(),
        })
    }
}

fn intern_app(root: &CacheHandle, app: &Arc<ApplicationInfo>) -> Arc<ApplicationInfo> {
    root.with(|set| set.app_infos.intern(app))
        .unwrap_or_else(|| app.clone())
}

/// Registers what `action` carries with the caches behind `root`.
fn attach_action(action: &mut Action, root: &CacheHandle) {
    match action.kind_mut() {
        ActionKind::BitmapReflection(a) => {
            if let Some(id) = root.with(|set| set.bitmaps.get_or_assign_id(&a.bitmap)) {
                a.bitmap_id = id;
            }
        }
        ActionKind::AddView(a) => a.nested.set_hierarchy_root(root),
        ActionKind::CollectionItems(a) => match &mut a.source {
            CollectionSource::Inline(items) => {
                if !items.is_empty() {
                    Arc::make_mut(items).set_hierarchy_root(root);
                }
            }
            CollectionSource::Cached {
                intent_id,
                uri,
                items,
            } => {
                let items = items.clone();
                root.with(|set| set.collections.add_mapping(*intent_id, uri, items));
            }
        },
        _ => {}
    }
}

/// Producer-side mutators, one per action kind.
impl RemoteViews {
    pub fn set_value(
        &mut self,
        view_id: i32,
        method: &str,
        value: ReflectionValue,
    ) -> Result<&mut Self, ValidationError> {
        self.add_action(Action::new(
            view_id,
            ActionKind::Reflection(ReflectionAction {
                method: method.to_string(),
                value,
            }),
        ))
    }

    pub fn set_boolean(&mut self, view_id: i32, method: &str, value: bool) -> Result<&mut Self, ValidationError> {
        self.set_value(view_id, method, ReflectionValue::Boolean(value))
    }

    pub fn set_int(&mut self, view_id: i32, method: &str, value: i32) -> Result<&mut Self, ValidationError> {
        self.set_value(view_id, method, ReflectionValue::Int(value))
    }

    pub fn set_long(&mut self, view_id: i32, method: &str, value: i64) -> Result<&mut Self, ValidationError> {
        self.set_value(view_id, method, ReflectionValue::Long(value))
    }

    pub fn set_float(&mut self, view_id: i32, method: &str, value: f32) -> Result<&mut Self, ValidationError> {
        self.set_value(view_id, method, ReflectionValue::Float(value))
    }

    pub fn set_char_sequence(
        &mut self,
        view_id: i32,
        method: &str,
        value: impl Into<String>,
    ) -> Result<&mut Self, ValidationError> {
        self.set_value(view_id, method, ReflectionValue::CharSequence(Some(value.into())))
    }

    pub fn set_uri(&mut self, view_id: i32, method: &str, uri: impl Into<String>) -> Result<&mut Self, ValidationError> {
        self.set_value(view_id, method, ReflectionValue::Uri(Some(uri.into())))
    }

    pub fn set_icon(&mut self, view_id: i32, method: &str, icon: Icon) -> Result<&mut Self, ValidationError> {
        self.set_value(view_id, method, ReflectionValue::Icon(Some(icon)))
    }

    pub fn set_color_state_list_value(
        &mut self,
        view_id: i32,
        method: &str,
        list: ColorStateList,
    ) -> Result<&mut Self, ValidationError> {
        self.set_value(view_id, method, ReflectionValue::ColorStateList(Some(list)))
    }

    pub fn set_bitmap(&mut self, view_id: i32, method: &str, bitmap: Bitmap) -> Result<&mut Self, ValidationError> {
        self.add_action(Action::new(
            view_id,
            ActionKind::BitmapReflection(BitmapReflectionAction {
                method: method.to_string(),
                bitmap,
                bitmap_id: 0,
            }),
        ))
    }

    pub fn set_text_view_text(&mut self, view_id: i32, text: impl Into<String>) -> Result<&mut Self, ValidationError> {
        self.set_char_sequence(view_id, "setText", text)
    }

    pub fn set_text_color(&mut self, view_id: i32, color: i32) -> Result<&mut Self, ValidationError> {
        self.set_int(view_id, "setTextColor", color)
    }

    pub fn set_view_visibility(&mut self, view_id: i32, visibility: i32) -> Result<&mut Self, ValidationError> {
        self.set_int(view_id, "setVisibility", visibility)
    }

    pub fn set_image_view_resource(&mut self, view_id: i32, res_id: i32) -> Result<&mut Self, ValidationError> {
        self.set_int(view_id, "setImageResource", res_id)
    }

    pub fn set_image_view_uri(&mut self, view_id: i32, uri: impl Into<String>) -> Result<&mut Self, ValidationError> {
        self.set_uri(view_id, "setImageURI", uri)
    }

    pub fn set_image_view_icon(&mut self, view_id: i32, icon: Icon) -> Result<&mut Self, ValidationError> {
        self.set_icon(view_id, "setImageIcon", icon)
    }

    pub fn set_image_view_bitmap(&mut self, view_id: i32, bitmap: Bitmap) -> Result<&mut Self, ValidationError> {
        self.set_bitmap(view_id, "setImageBitmap", bitmap)
    }

    pub fn set_progress_bar(
        &mut self,
        view_id: i32,
        max: i32,
        progress: i32,
        indeterminate: bool,
    ) -> Result<&mut Self, ValidationError> {
        self.set_boolean(view_id, "setIndeterminate", indeterminate)?;
        if !indeterminate {
            self.set_int(view_id, "setMax", max)?;
            self.set_int(view_id, "setProgress", progress)?;
        }
        Ok(self)
    }

    pub fn set_displayed_child(&mut self, view_id: i32, child: i32) -> Result<&mut Self, ValidationError> {
        self.set_int(view_id, "setDisplayedChild", child)
    }

    pub fn set_scroll_position(&mut self, view_id: i32, position: i32) -> Result<&mut Self, ValidationError> {
        self.set_int(view_id, "smoothScrollToPosition", position)
    }

    pub fn set_relative_scroll_position(&mut self, view_id: i32, offset: i32) -> Result<&mut Self, ValidationError> {
        self.set_int(view_id, "smoothScrollBy", offset)
    }

    /// Setter fed from a resource resolved when the action is applied.
    pub fn set_resource_value(
        &mut self,
        view_id: i32,
        method: &str,
        param: ParamType,
        kind: ResourceKind,
        res_id: i32,
    ) -> Result<&mut Self, ValidationError> {
        self.add_action(Action::new(
            view_id,
            ActionKind::ResourceReflection(ResourceReflectionAction {
                method: method.to_string(),
                param,
                kind,
                res_id,
            }),
        ))
    }

    pub fn set_color(&mut self, view_id: i32, method: &str, color_res: i32) -> Result<&mut Self, ValidationError> {
        self.set_resource_value(view_id, method, ParamType::Int, ResourceKind::Color, color_res)
    }

    pub fn set_color_state_list(
        &mut self,
        view_id: i32,
        method: &str,
        list_res: i32,
    ) -> Result<&mut Self, ValidationError> {
        self.set_resource_value(
            view_id,
            method,
            ParamType::ColorStateList,
            ResourceKind::ColorStateList,
            list_res,
        )
    }

    pub fn set_int_dimen(&mut self, view_id: i32, method: &str, dimen_res: i32) -> Result<&mut Self, ValidationError> {
        self.set_resource_value(
            view_id,
            method,
            ParamType::Int,
            ResourceKind::DimensionPixelSize,
            dimen_res,
        )
    }

    pub fn set_char_sequence_res(
        &mut self,
        view_id: i32,
        method: &str,
        string_res: i32,
    ) -> Result<&mut Self, ValidationError> {
        self.set_resource_value(
            view_id,
            method,
            ParamType::CharSequence,
            ResourceKind::String,
            string_res,
        )
    }

    /// Setter fed from a theme attribute resolved when the action is applied.
    pub fn set_attribute_value(
        &mut self,
        view_id: i32,
        method: &str,
        param: ParamType,
        kind: ResourceKind,
        attr_id: i32,
    ) -> Result<&mut Self, ValidationError> {
        self.add_action(Action::new(
            view_id,
            ActionKind::AttributeReflection(AttributeReflectionAction {
                method: method.to_string(),
                param,
                kind,
                attr_id,
            }),
        ))
    }

    pub fn set_color_attr(&mut self, view_id: i32, method: &str, attr_id: i32) -> Result<&mut Self, ValidationError> {
        self.set_attribute_value(view_id, method, ParamType::Int, ResourceKind::Color, attr_id)
    }

    /// Setter fed from a dimension in `unit`, converted when applied.
    pub fn set_dimension(
        &mut self,
        view_id: i32,
        method: &str,
        param: ParamType,
        value: f32,
        unit: ComplexUnit,
    ) -> Result<&mut Self, ValidationError> {
        self.add_action(Action::new(
            view_id,
            ActionKind::DimensionReflection(DimensionReflectionAction {
                method: method.to_string(),
                param,
                value,
                unit,
            }),
        ))
    }

    /// Setter receiving `light` or `dark` depending on the night mode when applied.
    pub fn set_night_mode_value(
        &mut self,
        view_id: i32,
        method: &str,
        light: ReflectionValue,
        dark: ReflectionValue,
    ) -> Result<&mut Self, ValidationError> {
        let param = light.param_type();
        self.add_action(Action::new(
            view_id,
            ActionKind::NightModeReflection(NightModeReflectionAction {
                method: method.to_string(),
                param,
                light,
                dark,
            }),
        ))
    }

    pub fn set_color_int(
        &mut self,
        view_id: i32,
        method: &str,
        light: i32,
        dark: i32,
    ) -> Result<&mut Self, ValidationError> {
        self.set_night_mode_value(view_id, method, ReflectionValue::Int(light), ReflectionValue::Int(dark))
    }

    pub fn set_on_click_response(
        &mut self,
        view_id: i32,
        response: RemoteResponse,
    ) -> Result<&mut Self, ValidationError> {
        self.add_action(Action::new(view_id, ActionKind::ClickResponse(ResponseAction { response })))
    }

    pub fn set_on_click_pending_intent(
        &mut self,
        view_id: i32,
        pending: PendingIntent,
    ) -> Result<&mut Self, ValidationError> {
        self.set_on_click_response(view_id, RemoteResponse::Launch(pending))
    }

    pub fn set_on_click_fill_in_intent(
        &mut self,
        view_id: i32,
        fill_in: Intent,
    ) -> Result<&mut Self, ValidationError> {
        self.set_on_click_response(view_id, RemoteResponse::FillIn(fill_in))
    }

    pub fn set_on_checked_change_response(
        &mut self,
        view_id: i32,
        response: RemoteResponse,
    ) -> Result<&mut Self, ValidationError> {
        self.add_action(Action::new(
            view_id,
            ActionKind::CheckedChangeResponse(ResponseAction { response }),
        ))
    }

    pub fn set_pending_intent_template(
        &mut self,
        view_id: i32,
        pending: PendingIntent,
    ) -> Result<&mut Self, ValidationError> {
        self.add_action(Action::new(
            view_id,
            ActionKind::PendingIntentTemplate(TemplateAction { pending }),
        ))
    }

    /// Binds an adapter view to a collection a remote factory will produce.
    pub fn set_remote_adapter(&mut self, view_id: i32, intent: Intent) -> Result<&mut Self, ValidationError> {
        self.add_action(Action::new(
            view_id,
            ActionKind::LegacyAdapterIntent(AdapterIntentAction { intent }),
        ))
    }

    pub fn set_remote_adapter_items(
        &mut self,
        view_id: i32,
        items: RemoteCollectionItems,
    ) -> Result<&mut Self, ValidationError> {
        self.add_action(Action::new(
            view_id,
            ActionKind::CollectionItems(CollectionItemsAction {
                source: CollectionSource::Inline(Arc::new(items)),
            }),
        ))
    }

    pub fn set_empty_view(&mut self, view_id: i32, empty_view_id: i32) -> Result<&mut Self, ValidationError> {
        self.add_action(Action::new(view_id, ActionKind::EmptyView(EmptyViewAction { empty_view_id })))
    }

    pub fn show_next(&mut self, view_id: i32) -> Result<&mut Self, ValidationError> {
        self.add_action(Action::new(
            view_id,
            ActionKind::ContentNavigation(NavigationAction { next: true }),
        ))
    }

    pub fn show_previous(&mut self, view_id: i32) -> Result<&mut Self, ValidationError> {
        self.add_action(Action::new(
            view_id,
            ActionKind::ContentNavigation(NavigationAction { next: false }),
        ))
    }

    /// Appends `nested` as a child of the container `view_id`.
    pub fn add_view(&mut self, view_id: i32, nested: RemoteViews) -> Result<&mut Self, ValidationError> {
        self.add_nested(view_id, nested, None, None)
    }

    pub fn add_view_at(
        &mut self,
        view_id: i32,
        nested: RemoteViews,
        index: usize,
    ) -> Result<&mut Self, ValidationError> {
        self.add_nested(view_id, nested, Some(index), None)
    }

    /// Appends `nested` under a stable id so a reapply can recycle its view.
    pub fn add_stable_view(
        &mut self,
        view_id: i32,
        nested: RemoteViews,
        stable_id: i32,
    ) -> Result<&mut Self, ValidationError> {
        self.add_nested(view_id, nested, None, Some(stable_id))
    }

    fn add_nested(
        &mut self,
        view_id: i32,
        nested: RemoteViews,
        index: Option<usize>,
        stable_id: Option<i32>,
    ) -> Result<&mut Self, ValidationError> {
        self.add_action(Action::new(
            view_id,
            ActionKind::AddView(AddViewAction {
                nested: Box::new(nested),
                index,
                stable_id,
            }),
        ))
    }

    pub fn remove_all_views(&mut self, view_id: i32) -> Result<&mut Self, ValidationError> {
        self.add_action(Action::new(view_id, ActionKind::RemoveViews(RemoveViewsAction { keep_id: None })))
    }

    pub fn remove_all_views_except(&mut self, view_id: i32, keep_id: i32) -> Result<&mut Self, ValidationError> {
        self.add_action(Action::new(
            view_id,
            ActionKind::RemoveViews(RemoveViewsAction {
                keep_id: Some(keep_id),
            }),
        ))
    }

    pub fn remove_from_parent(&mut self, view_id: i32) -> Result<&mut Self, ValidationError> {
        self.add_action(Action::new(view_id, ActionKind::RemoveFromParent))
    }

    pub fn set_view_padding(
        &mut self,
        view_id: i32,
        left: i32,
        top: i32,
        right: i32,
        bottom: i32,
    ) -> Result<&mut Self, ValidationError> {
        self.add_action(Action::new(
            view_id,
            ActionKind::Padding(PaddingAction {
                left,
                top,
                right,
                bottom,
            }),
        ))
    }

    pub fn set_view_layout(
        &mut self,
        view_id: i32,
        property: LayoutProperty,
        value: Dimension,
    ) -> Result<&mut Self, ValidationError> {
        self.add_action(Action::new(
            view_id,
            ActionKind::LayoutParam(LayoutParamAction { property, value }),
        ))
    }

    pub fn set_text_view_text_size(
        &mut self,
        view_id: i32,
        unit: ComplexUnit,
        size: f32,
    ) -> Result<&mut Self, ValidationError> {
        self.add_action(Action::new(view_id, ActionKind::TextSize(TextSizeAction { unit, size })))
    }

    pub fn set_text_view_compound_drawables(
        &mut self,
        view_id: i32,
        drawables: [Option<Icon>; 4],
        relative: bool,
    ) -> Result<&mut Self, ValidationError> {
        self.add_action(Action::new(
            view_id,
            ActionKind::CompoundDrawables(CompoundDrawablesAction {
                relative,
                drawables,
            }),
        ))
    }

    pub fn set_drawable_tint(
        &mut self,
        view_id: i32,
        background: bool,
        color: i32,
        mode: BlendMode,
    ) -> Result<&mut Self, ValidationError> {
        self.add_action(Action::new(
            view_id,
            ActionKind::DrawableTint(DrawableTintAction {
                background,
                color,
                mode,
            }),
        ))
    }

    pub fn set_ripple_drawable_color(
        &mut self,
        view_id: i32,
        color: ColorStateList,
    ) -> Result<&mut Self, ValidationError> {
        self.add_action(Action::new(view_id, ActionKind::RippleColor(RippleColorAction { color })))
    }

    pub fn set_int_tag(&mut self, view_id: i32, key: i32, value: i32) -> Result<&mut Self, ValidationError> {
        self.add_action(Action::new(view_id, ActionKind::IntTag(IntTagAction { key, value })))
    }

    pub fn set_compound_button_checked(&mut self, view_id: i32, checked: bool) -> Result<&mut Self, ValidationError> {
        self.add_action(Action::new(
            view_id,
            ActionKind::CompoundButtonChecked(CheckedAction { checked }),
        ))
    }

    pub fn set_radio_group_checked(&mut self, view_id: i32, checked_id: i32) -> Result<&mut Self, ValidationError> {
        self.add_action(Action::new(
            view_id,
            ActionKind::RadioGroupChecked(RadioCheckAction { checked_id }),
        ))
    }

    pub fn set_view_outline_preferred_radius(
        &mut self,
        view_id: i32,
        value: Dimension,
    ) -> Result<&mut Self, ValidationError> {
        self.add_action(Action::new(view_id, ActionKind::OutlineRadius(OutlineRadiusAction { value })))
    }
}

impl Clone for RemoteViews {
    fn clone(&self) -> Self {
        let mut copy = Self {
            app: Arc::clone(&self.app),
            layout_id: self.layout_id,
            light_background_layout_id: self.light_background_layout_id,
            view_id: self.view_id,
            actions: self.actions.clone(),
            variants: self.variants.clone(),
            ideal_size: self.ideal_size,
            flags: self.flags,
            provider_instance_id: self.provider_instance_id,
            draw_instructions: self.draw_instructions.clone(),
            caches: CacheHandle::detached(),
        };
        if self.caches.is_root() {
            copy.reconstruct_caches();
        }
        copy
    }
}

impl PartialEq for RemoteViews {
    fn eq(&self, other: &Self) -> bool {
        self.app == other.app
            && self.layout_id == other.layout_id
            && self.light_background_layout_id == other.light_background_layout_id
            && self.view_id == other.view_id
            && self.actions == other.actions
            && self.variants == other.variants
            && self.ideal_size == other.ideal_size
            && self.flags == other.flags
            && self.provider_instance_id == other.provider_instance_id
            && self.draw_instructions == other.draw_instructions
    }
}

impl fmt::Debug for RemoteViews {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteViews")
            .field("package", &self.app.package)
            .field("layout_id", &self.layout_id)
            .field("view_id", &self.view_id)
            .field("actions", &self.actions)
            .field("variants", &self.variants)
            .field("ideal_size", &self.ideal_size)
            .field("flags", &self.flags)
            .field("root", &self.caches.is_root())
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct WireViewsRef<'a> {
    package: &'a str,
    uid: i32,
    view_id: i32,
    flags: u32,
    provider_instance_id: i64,
    ideal_size: Option<SizeF>,
    body: WireBodyRef<'a>,
}

#[derive(Serialize)]
enum WireBodyRef<'a> {
    Layout {
        layout_id: i32,
        light_background_layout_id: i32,
        draw_instructions: Option<&'a DrawInstructions>,
        actions: &'a [Action],
    },
    Orientation {
        landscape: &'a RemoteViews,
        portrait: &'a RemoteViews,
    },
    Sized(&'a [RemoteViews]),
}

#[derive(Deserialize)]
struct WireViews {
    package: String,
    uid: i32,
    view_id: i32,
    flags: u32,
    provider_instance_id: i64,
    ideal_size: Option<SizeF>,
    body: WireBody,
}

#[derive(Deserialize)]
enum WireBody {
    Layout {
        layout_id: i32,
        light_background_layout_id: i32,
        draw_instructions: Option<DrawInstructions>,
        actions: Vec<Action>,
    },
    Orientation {
        landscape: Box<RemoteViews>,
        portrait: Box<RemoteViews>,
    },
    Sized(Vec<RemoteViews>),
}

impl Serialize for RemoteViews {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let body = match &self.variants {
            Variants::None => WireBodyRef::Layout {
                layout_id: self.layout_id,
                light_background_layout_id: self.light_background_layout_id,
                draw_instructions: self.draw_instructions.as_ref(),
                actions: &self.actions,
            },
            Variants::Orientation {
                landscape,
                portrait,
            } => WireBodyRef::Orientation {
                landscape,
                portrait,
            },
            Variants::Sized(variants) => WireBodyRef::Sized(variants),
        };
        WireViewsRef {
            package: &self.app.package,
            uid: self.app.uid,
            view_id: self.view_id,
            flags: self.flags.bits(),
            provider_instance_id: self.provider_instance_id,
            ideal_size: self.ideal_size,
            body,
        }
        .serialize(serializer)
    }
}

impl TryFrom<WireViews> for RemoteViews {
    type Error = ValidationError;

    fn try_from(wire: WireViews) -> Result<Self, ValidationError> {
        let (layout_id, light_background_layout_id, draw_instructions, actions, variants) = match wire.body {
            WireBody::Layout {
                layout_id,
                light_background_layout_id,
                draw_instructions,
                actions,
            } => (layout_id, light_background_layout_id, draw_instructions, actions, Variants::None),
            WireBody::Orientation {
                landscape,
                portrait,
            } => {
                if landscape.has_multiple_layouts() || portrait.has_multiple_layouts() {
                    return Err(ValidationError::ConflictingVariants);
                }
                (NO_ID, NO_ID, None, Vec::new(), Variants::Orientation { landscape, portrait })
            }
            WireBody::Sized(variants) => {
                if variants.len() < 2 {
                    return Err(ValidationError::EmptySizeMap);
                }
                if variants.len() > MAX_INIT_VIEW_COUNT {
                    return Err(ValidationError::TooManySizes {
                        count: variants.len(),
                        max: MAX_INIT_VIEW_COUNT,
                    });
                }
                if variants
                    .iter()
                    .any(|variant| variant.has_multiple_layouts() || variant.ideal_size.is_none())
                {
                    return Err(ValidationError::MissingField("ideal_size"));
                }
                (NO_ID, NO_ID, None, Vec::new(), Variants::Sized(variants))
            }
        };

        Ok(Self {
            app: Arc::new(ApplicationInfo::new(wire.package, wire.uid)),
            layout_id,
            light_background_layout_id,
            view_id: wire.view_id,
            actions,
            variants,
            ideal_size: wire.ideal_size,
            flags: ApplyFlags::from_bits_truncate(wire.flags),
            provider_instance_id: wire.provider_instance_id,
            draw_instructions,
            caches: CacheHandle::detached(),
        })
    }
}

impl<'de> Deserialize<'de> for RemoteViews {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let _frame = Descent::enter::<D::Error>(&DECODE_FRAMES, MAX_DECODE_DEPTH)?;
        let wire = WireViews::deserialize(deserializer)?;
        RemoteViews::try_from(wire).map_err(de::Error::custom)
    }
}

thread_local! {
    static DECODE_NESTING_LIMIT: Cell<usize> = const { Cell::new(MAX_NESTED_VIEWS) };
    static DECODE_NESTING: Cell<usize> = const { Cell::new(0) };
    static DECODE_FRAMES: Cell<usize> = const { Cell::new(0) };
    static DECODE_VIOLATION: Cell<Option<(usize, usize)>> = const { Cell::new(None) };
}

/// Bounds how deeply subtree additions decoded on this thread may nest,
/// until dropped.
///
/// Outside a scope the untrusted limit applies.
pub(crate) struct DecodeScope {
    previous_limit: usize,
}

impl DecodeScope {
    pub(crate) fn enter(trusted_system_caller: bool) -> Self {
        let limit = if trusted_system_caller {
            MAX_DECODE_DEPTH
        } else {
            MAX_NESTED_VIEWS
        };
        DECODE_VIOLATION.set(None);
        Self {
            previous_limit: DECODE_NESTING_LIMIT.replace(limit),
        }
    }

    /// The nesting violation that aborted decoding, if any.
    pub(crate) fn violation(&self) -> Option<ValidationError> {
        DECODE_VIOLATION
            .get()
            .map(|(depth, max)| ValidationError::TooManyNestedViews { depth, max })
    }
}

impl Drop for DecodeScope {
    fn drop(&mut self) {
        DECODE_NESTING_LIMIT.set(self.previous_limit);
        DECODE_VIOLATION.set(None);
    }
}

/// One level of recursion into a tree being decoded.
struct Descent(&'static LocalKey<Cell<usize>>);

impl Descent {
    fn enter<E: de::Error>(counter: &'static LocalKey<Cell<usize>>, max: usize) -> Result<Self, E> {
        let depth = counter.get() + 1;
        if depth > max {
            DECODE_VIOLATION.set(Some((depth, max)));
            return Err(E::custom(ValidationError::TooManyNestedViews { depth, max }));
        }
        counter.set(depth);
        Ok(Self(counter))
    }
}

impl Drop for Descent {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

/// Decodes the subtree of an addition, refusing it before recursing once the
/// nesting limit is reached.
pub(crate) fn deserialize_nested<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Box<RemoteViews>, D::Error> {
    let _level = Descent::enter::<D::Error>(&DECODE_NESTING, DECODE_NESTING_LIMIT.get())?;
    Box::<RemoteViews>::deserialize(deserializer)
}
