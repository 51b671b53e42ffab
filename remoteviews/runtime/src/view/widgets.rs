//! A small generic widget set: property-bag widgets, a class allow-list and
//! a template-driven inflater.

use std::any::Any;
use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::ActionError;
use crate::remote_views::DrawInstructions;
use crate::value::{Icon, ParamType, ReflectionValue};
use crate::view::{LayoutInflater, MethodRegistry, NodeId, ViewTraits, ViewTree, Widget, WidgetCommit};

/// Class name used for views rendering draw instructions.
pub const DRAW_INSTRUCTIONS_CLASS: &str = "DrawInstructionsPlayer";

/// Widget that records every reflected property it receives.
#[derive(Debug, Clone)]
pub struct BasicWidget {
    class: String,
    traits: ViewTraits,
    properties: BTreeMap<String, ReflectionValue>,
}

impl BasicWidget {
    pub fn new(class: impl Into<String>, traits: ViewTraits) -> Self {
        Self {
            class: class.into(),
            traits,
            properties: BTreeMap::new(),
        }
    }

    pub fn property(&self, key: &str) -> Option<&ReflectionValue> {
        self.properties.get(key)
    }

    pub fn properties(&self) -> &BTreeMap<String, ReflectionValue> {
        &self.properties
    }

    /// Stores `value` under `key` on a widget that must be a [`BasicWidget`].
    pub fn store(widget: &mut dyn Widget, key: &str, value: &ReflectionValue) -> Result<(), ActionError> {
        let class = widget.class_name().to_string();
        let basic = widget
            .as_any_mut()
            .downcast_mut::<BasicWidget>()
            .ok_or(ActionError::WrongTargetType {
                view_id: crate::resources::NO_ID,
                class,
                expected: "BasicWidget",
            })?;
        basic.properties.insert(key.to_string(), value.clone());
        Ok(())
    }
}

impl Widget for BasicWidget {
    fn class_name(&self) -> &str {
        &self.class
    }

    fn traits(&self) -> ViewTraits {
        self.traits
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Static description of a layout resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutTemplate {
    pub class: String,
    #[serde(default = "no_id")]
    pub view_id: i32,
    #[serde(default)]
    pub children: Vec<LayoutTemplate>,
}

fn no_id() -> i32 {
    crate::resources::NO_ID
}

impl LayoutTemplate {
    pub fn new(class: impl Into<String>, view_id: i32) -> Self {
        Self {
            class: class.into(),
            view_id,
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: LayoutTemplate) -> Self {
        self.children.push(child);
        self
    }
}

struct ClassSpec {
    traits: ViewTraits,
    parent: Option<&'static str>,
}

/// Host-declared view classes and layouts.
pub struct WidgetCatalog {
    classes: FxHashMap<String, ClassSpec>,
    layouts: FxHashMap<i32, LayoutTemplate>,
}

impl WidgetCatalog {
    /// An empty catalog: nothing may be inflated.
    pub fn empty() -> Self {
        Self {
            classes: FxHashMap::default(),
            layouts: FxHashMap::default(),
        }
    }

    /// The standard class hierarchy most remote layouts use.
    pub fn standard() -> Self {
        let mut catalog = Self::empty();
        let group = ViewTraits::GROUP;
        for (class, traits, parent) in [
            ("View", ViewTraits::empty(), None),
            ("TextView", ViewTraits::TEXT, Some("View")),
            ("Button", ViewTraits::TEXT, Some("TextView")),
            ("Chronometer", ViewTraits::TEXT, Some("TextView")),
            ("CompoundButton", ViewTraits::TEXT | ViewTraits::COMPOUND_BUTTON, Some("Button")),
            ("CheckBox", ViewTraits::TEXT | ViewTraits::COMPOUND_BUTTON, Some("CompoundButton")),
            ("Switch", ViewTraits::TEXT | ViewTraits::COMPOUND_BUTTON, Some("CompoundButton")),
            ("RadioButton", ViewTraits::TEXT | ViewTraits::COMPOUND_BUTTON, Some("CompoundButton")),
            ("ImageView", ViewTraits::IMAGE, Some("View")),
            ("ImageButton", ViewTraits::IMAGE, Some("ImageView")),
            ("ProgressBar", ViewTraits::empty(), Some("View")),
            ("ViewGroup", group, Some("View")),
            ("FrameLayout", group, Some("ViewGroup")),
            ("LinearLayout", group, Some("ViewGroup")),
            ("RelativeLayout", group, Some("ViewGroup")),
            ("GridLayout", group, Some("ViewGroup")),
            ("RadioGroup", group | ViewTraits::RADIO_GROUP, Some("LinearLayout")),
            ("ViewFlipper", group | ViewTraits::ANIMATOR, Some("FrameLayout")),
            ("AdapterView", group | ViewTraits::ADAPTER_VIEW, Some("ViewGroup")),
            ("ListView", group | ViewTraits::ADAPTER_VIEW, Some("AdapterView")),
            ("GridView", group | ViewTraits::ADAPTER_VIEW, Some("AdapterView")),
            (
                "StackView",
                group | ViewTraits::ADAPTER_VIEW | ViewTraits::ANIMATOR,
                Some("AdapterView"),
            ),
            (DRAW_INSTRUCTIONS_CLASS, ViewTraits::empty(), Some("View")),
        ] {
            catalog.allow_class(class, traits, parent);
        }
        catalog
    }

    pub fn allow_class(
        &mut self,
        class: &str,
        traits: ViewTraits,
        parent: Option<&'static str>,
    ) -> &mut Self {
        self.classes
            .insert(class.to_string(), ClassSpec { traits, parent });
        self
    }

    pub fn add_layout(&mut self, layout_id: i32, template: LayoutTemplate) -> &mut Self {
        self.layouts.insert(layout_id, template);
        self
    }

    pub fn is_allowed(&self, class: &str) -> bool {
        self.classes.contains_key(class)
    }

    /// Instantiates an allow-listed class.
    pub fn create(&self, class: &str) -> Result<Box<dyn Widget>, ActionError> {
        let spec = self
            .classes
            .get(class)
            .ok_or_else(|| ActionError::ClassNotAllowed(class.to_string()))?;
        Ok(Box::new(BasicWidget::new(class, spec.traits)))
    }

    /// Registry holding the class chain and the standard setters of this catalog.
    pub fn method_registry(&self) -> MethodRegistry {
        let mut registry = MethodRegistry::new();
        for (class, spec) in &self.classes {
            registry.register_class(class, spec.parent);
        }
        register_standard_setters(&mut registry);
        registry
    }

    fn build(&self, tree: &mut ViewTree, template: &LayoutTemplate) -> Result<NodeId, ActionError> {
        let widget = self.create(&template.class)?;
        let node = tree.insert(template.view_id, widget);
        for child in &template.children {
            let child_node = match self.build(tree, child) {
                Ok(child_node) => child_node,
                Err(err) => {
                    tree.remove(node);
                    return Err(err);
                }
            };
            tree.add_child(node, child_node, None)?;
        }
        Ok(node)
    }
}

impl LayoutInflater for WidgetCatalog {
    fn inflate(&self, tree: &mut ViewTree, package: &str, layout_id: i32) -> Result<NodeId, ActionError> {
        let template = self
            .layouts
            .get(&layout_id)
            .ok_or(ActionError::UnknownLayout(layout_id))?;
        tracing::trace!(package, layout_id, class = %template.class, "inflating layout");
        self.build(tree, template)
    }

    fn inflate_draw_instructions(
        &self,
        tree: &mut ViewTree,
        instructions: &DrawInstructions,
    ) -> Result<NodeId, ActionError> {
        let mut widget = BasicWidget::new(DRAW_INSTRUCTIONS_CLASS, ViewTraits::empty());
        widget.properties.insert(
            "instructions".to_string(),
            ReflectionValue::Int(instructions.len() as i32),
        );
        Ok(tree.insert(crate::resources::NO_ID, Box::new(widget)))
    }
}

fn store_as(key: &'static str) -> impl Fn(&mut dyn Widget, &ReflectionValue) -> Result<(), ActionError> + Send + Sync + 'static {
    move |widget, value| BasicWidget::store(widget, key, value)
}

fn load_image(key: &'static str) -> impl Fn(&ReflectionValue) -> Result<WidgetCommit, ActionError> + Send + Sync + 'static {
    move |value| {
        let source = match value {
            ReflectionValue::Uri(uri) => uri.clone(),
            ReflectionValue::Icon(Some(Icon::Uri(uri))) => Some(uri.clone()),
            _ => None,
        };
        if let Some(uri) = &source {
            if !uri.contains(':') {
                return Err(ActionError::Load {
                    what: uri.clone(),
                    reason: "uri has no scheme".to_string(),
                });
            }
        }
        let value = value.clone();
        Ok(Box::new(move |widget: &mut dyn Widget| BasicWidget::store(widget, key, &value)))
    }
}

fn register_standard_setters(registry: &mut MethodRegistry) {
    use ParamType as P;

    for (class, method, param, key) in [
        ("View", "setAlpha", P::Float, "alpha"),
        ("View", "setVisibility", P::Int, "visibility"),
        ("View", "setEnabled", P::Boolean, "enabled"),
        ("View", "setBackgroundColor", P::Int, "background_color"),
        ("View", "setBackgroundResource", P::Int, "background_resource"),
        ("View", "setBackgroundTintList", P::ColorStateList, "background_tint"),
        ("View", "setBackgroundTintBlendMode", P::BlendMode, "background_tint_mode"),
        ("View", "setContentDescription", P::CharSequence, "content_description"),
        ("View", "setMinimumHeight", P::Int, "minimum_height"),
        ("View", "setMinimumWidth", P::Int, "minimum_width"),
        ("View", "setElevation", P::Float, "elevation"),
        ("TextView", "setText", P::CharSequence, "text"),
        ("TextView", "setHint", P::CharSequence, "hint"),
        ("TextView", "setTextColor", P::Int, "text_color"),
        ("TextView", "setTextColor", P::ColorStateList, "text_color_list"),
        ("TextView", "setMaxLines", P::Int, "max_lines"),
        ("TextView", "setLetterSpacing", P::Float, "letter_spacing"),
        ("TextView", "setFontFeatureSettings", P::String, "font_features"),
        ("Chronometer", "setBase", P::Long, "base"),
        ("Chronometer", "setStarted", P::Boolean, "started"),
        ("ImageView", "setImageBitmap", P::Bitmap, "image"),
        ("ImageView", "setImageResource", P::Int, "image_resource"),
        ("ImageView", "setImageAlpha", P::Int, "image_alpha"),
        ("ImageView", "setColorFilter", P::Int, "color_filter"),
        ("ImageView", "setImageTintList", P::ColorStateList, "image_tint"),
        ("ImageView", "setImageTintBlendMode", P::BlendMode, "image_tint_mode"),
        ("ImageView", "setImageLevel", P::Int, "image_level"),
        ("ProgressBar", "setProgress", P::Int, "progress"),
        ("ProgressBar", "setMax", P::Int, "max"),
        ("ProgressBar", "setIndeterminate", P::Boolean, "indeterminate"),
        ("ViewFlipper", "setDisplayedChild", P::Int, "displayed_child"),
        ("ViewFlipper", "setFlipInterval", P::Int, "flip_interval"),
        ("AdapterView", "setSelection", P::Int, "selection"),
        ("AdapterView", "smoothScrollToPosition", P::Int, "scroll_position"),
        ("AdapterView", "smoothScrollBy", P::Int, "scroll_by"),
        ("AdapterView", "scrollBy", P::Int, "scroll_by"),
        ("View", "setIntent", P::Intent, "intent"),
        ("View", "setExtras", P::Bundle, "extras"),
        ("View", "setShortcutChar", P::Char, "shortcut"),
        ("View", "setRotationByte", P::Byte, "rotation_byte"),
        ("View", "setRotationShort", P::Short, "rotation_short"),
        ("View", "setScale", P::Double, "scale"),
    ] {
        registry.register(class, method, param, store_as(key));
    }

    registry.register_with_preparer(
        "ImageView",
        "setImageURI",
        P::Uri,
        store_as("image_uri"),
        load_image("image_uri"),
    );
    registry.register_with_preparer(
        "ImageView",
        "setImageIcon",
        P::Icon,
        store_as("image_icon"),
        load_image("image_icon"),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inflation_respects_allow_list() {
        let mut catalog = WidgetCatalog::empty();
        catalog
            .allow_class("FrameLayout", ViewTraits::GROUP, None)
            .add_layout(1, LayoutTemplate::new("FrameLayout", 10).with_child(LayoutTemplate::new("WebView", 11)));

        let mut tree = ViewTree::new();
        let err = catalog.inflate(&mut tree, "com.example", 1).expect_err("WebView is not allowed");
        assert_eq!(err, ActionError::ClassNotAllowed("WebView".to_string()));
        assert!(tree.is_empty());
    }

    #[test]
    fn inflation_builds_template_tree() {
        let mut catalog = WidgetCatalog::standard();
        catalog.add_layout(
            1,
            LayoutTemplate::new("LinearLayout", 10)
                .with_child(LayoutTemplate::new("TextView", 11))
                .with_child(LayoutTemplate::new("ImageView", 12)),
        );

        let mut tree = ViewTree::new();
        let root = catalog.inflate(&mut tree, "com.example", 1).expect("inflate");
        assert_eq!(tree.view_ids(root), vec![10, 11, 12]);
        assert_eq!(tree.node(root).expect("root").class_name(), "LinearLayout");
        assert_eq!(
            catalog.inflate(&mut tree, "com.example", 2).expect_err("unknown"),
            ActionError::UnknownLayout(2)
        );
    }

    #[test]
    fn uri_preparer_validates_before_commit() {
        let registry = WidgetCatalog::standard().method_registry();
        let resolved = registry
            .resolve("ImageButton", ParamType::Uri, "setImageURI")
            .expect("inherited");
        let bad = resolved
            .prepare(&ReflectionValue::Uri(Some("nothing".into())))
            .expect("has preparer");
        assert!(matches!(bad, Err(ActionError::Load { .. })));

        let commit = resolved
            .prepare(&ReflectionValue::Uri(Some("content://img/1".into())))
            .expect("has preparer")
            .expect("valid uri");
        let mut widget = BasicWidget::new("ImageButton", ViewTraits::IMAGE);
        commit(&mut widget).expect("commit");
        assert_eq!(
            widget.property("image_uri"),
            Some(&ReflectionValue::Uri(Some("content://img/1".into())))
        );
    }
}
