//! Shared fixtures: a small widget catalog, resource table and engine.

use std::sync::Arc;

use crate::engine::Engine;
use crate::remote_views::RemoteViews;
use crate::resources::{ComplexUnit, ResourceTable, ResourceValue};
use crate::view::{LayoutTemplate, WidgetCatalog};

pub(crate) const PACKAGE: &str = "com.example.widget";

pub(crate) const ACCENT_DAY: i32 = 0xff20_40ffu32 as i32;
pub(crate) const ACCENT_NIGHT: i32 = 0xff80_a0ffu32 as i32;

pub(crate) mod ids {
    pub(crate) const CARD_LAYOUT: i32 = 0x7f0b_0001;
    pub(crate) const ITEM_LAYOUT: i32 = 0x7f0b_0002;
    pub(crate) const WIDE_LAYOUT: i32 = 0x7f0b_0003;

    pub(crate) const ROOT: i32 = 0x7f08_0001;
    pub(crate) const TITLE: i32 = 0x7f08_0002;
    pub(crate) const ICON: i32 = 0x7f08_0003;
    pub(crate) const CONTAINER: i32 = 0x7f08_0004;
    pub(crate) const LIST: i32 = 0x7f08_0005;
    pub(crate) const CHECK: i32 = 0x7f08_0006;
    pub(crate) const FLIPPER: i32 = 0x7f08_0007;
    pub(crate) const ITEM_ROOT: i32 = 0x7f08_0010;
    pub(crate) const ITEM_TEXT: i32 = 0x7f08_0011;

    pub(crate) const ACCENT_COLOR: i32 = 0x7f06_0001;
    pub(crate) const GAP_DIMEN: i32 = 0x7f05_0001;
    pub(crate) const LABEL_STRING: i32 = 0x7f0e_0001;
    pub(crate) const ACCENT_ATTR: i32 = 0x7f03_0001;
}

/// Catalog with the card, item and wide layouts registered.
pub(crate) fn catalog() -> WidgetCatalog {
    let mut catalog = WidgetCatalog::standard();
    catalog
        .add_layout(
            ids::CARD_LAYOUT,
            LayoutTemplate::new("FrameLayout", ids::ROOT)
                .with_child(LayoutTemplate::new("TextView", ids::TITLE))
                .with_child(LayoutTemplate::new("ImageView", ids::ICON))
                .with_child(LayoutTemplate::new("LinearLayout", ids::CONTAINER))
                .with_child(LayoutTemplate::new("ListView", ids::LIST))
                .with_child(LayoutTemplate::new("CheckBox", ids::CHECK))
                .with_child(LayoutTemplate::new("ViewFlipper", ids::FLIPPER)),
        )
        .add_layout(
            ids::ITEM_LAYOUT,
            LayoutTemplate::new("FrameLayout", ids::ITEM_ROOT)
                .with_child(LayoutTemplate::new("TextView", ids::ITEM_TEXT)),
        )
        .add_layout(
            ids::WIDE_LAYOUT,
            LayoutTemplate::new("LinearLayout", ids::ROOT)
                .with_child(LayoutTemplate::new("TextView", ids::TITLE))
                .with_child(LayoutTemplate::new("LinearLayout", ids::CONTAINER)),
        );
    catalog
}

pub(crate) fn resources() -> ResourceTable {
    let mut table = ResourceTable::new();
    table
        .define(ids::CARD_LAYOUT, "layout/card")
        .define(ids::ITEM_LAYOUT, "layout/item")
        .define(ids::WIDE_LAYOUT, "layout/wide")
        .define(ids::ROOT, "id/root")
        .define(ids::TITLE, "id/title")
        .define(ids::ICON, "id/icon")
        .define(ids::CONTAINER, "id/container")
        .define(ids::LIST, "id/list")
        .define(ids::CHECK, "id/check")
        .define(ids::FLIPPER, "id/flipper")
        .define(ids::ITEM_ROOT, "id/item_root")
        .define(ids::ITEM_TEXT, "id/item_text")
        .define_value(ids::ACCENT_COLOR, "color/accent", ResourceValue::Color(ACCENT_DAY))
        .define_night_value(ids::ACCENT_COLOR, ResourceValue::Color(ACCENT_NIGHT))
        .define_value(
            ids::GAP_DIMEN,
            "dimen/gap",
            ResourceValue::Dimension {
                value: 8.0,
                unit: ComplexUnit::Dip,
            },
        )
        .define_value(ids::LABEL_STRING, "string/label", ResourceValue::String("Label".into()))
        .define_attribute(ids::ACCENT_ATTR, "attr/colorAccent", ids::ACCENT_COLOR);
    table
}

pub(crate) fn engine() -> Engine {
    let catalog = catalog();
    let registry = catalog.method_registry();
    Engine::new(Arc::new(registry), Arc::new(catalog), Arc::new(resources()))
}

/// An item tree whose text view shows `text`.
pub(crate) fn item(text: &str) -> RemoteViews {
    let mut item = RemoteViews::new(PACKAGE, ids::ITEM_LAYOUT);
    item.set_text_view_text(ids::ITEM_TEXT, text)
        .expect("item text");
    item
}
