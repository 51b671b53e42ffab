use std::error::Error;
use std::fs;
use std::process;
use std::sync::Arc;

use remoteviews_runtime::config::HostConfig;
use remoteviews_runtime::resources::ResourceValue;
use remoteviews_runtime::{ApplyParams, Engine, LayoutTemplate, ResourceTable, WidgetCatalog, host};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "REMOTE_VIEWS_LOG";

const MAIN_LAYOUT: i32 = 0x7f0b_0001;
const ROW_LAYOUT: i32 = 0x7f0b_0002;
const ROOT_ID: i32 = 0x7f08_0001;
const TITLE_ID: i32 = 0x7f08_0002;
const ICON_ID: i32 = 0x7f08_0003;
const LIST_ID: i32 = 0x7f08_0004;
const ROW_TEXT_ID: i32 = 0x7f08_0005;
const ACCENT_COLOR: i32 = 0x7f06_0001;

/// Layouts read from the same file as the resource table.
#[derive(Debug, Default, Deserialize)]
struct LayoutFile {
    #[serde(default)]
    layouts: Vec<LayoutEntry>,
}

#[derive(Debug, Deserialize)]
struct LayoutEntry {
    id: i32,
    template: LayoutTemplate,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run() {
        tracing::error!(%err, "remote views host failed");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let config = HostConfig::from_env();
    tracing::debug!(?config, "loaded host config");

    let (catalog, resources) = match &config.resources {
        Some(path) => {
            let raw = fs::read_to_string(path)?;
            let resources = ResourceTable::from_json(&raw)?;
            let layouts: LayoutFile = serde_json::from_str(&raw)?;
            let mut catalog = WidgetCatalog::standard();
            for entry in layouts.layouts {
                catalog.add_layout(entry.id, entry.template);
            }
            tracing::info!(path = %path.display(), "loaded resources");
            (catalog, resources)
        }
        None => builtin(),
    };

    let registry = catalog.method_registry();
    let engine = Engine::new(Arc::new(registry), Arc::new(catalog), Arc::new(resources));
    host::run(engine, &config, ApplyParams::default())?;
    Ok(())
}

/// A card with a title, an icon and a list of text rows.
fn builtin() -> (WidgetCatalog, ResourceTable) {
    let mut catalog = WidgetCatalog::standard();
    catalog
        .add_layout(
            MAIN_LAYOUT,
            LayoutTemplate::new("LinearLayout", ROOT_ID)
                .with_child(LayoutTemplate::new("TextView", TITLE_ID))
                .with_child(LayoutTemplate::new("ImageView", ICON_ID))
                .with_child(LayoutTemplate::new("ListView", LIST_ID)),
        )
        .add_layout(
            ROW_LAYOUT,
            LayoutTemplate::new("TextView", ROW_TEXT_ID),
        );

    let mut resources = ResourceTable::new();
    resources
        .define(MAIN_LAYOUT, "layout/main")
        .define(ROW_LAYOUT, "layout/row")
        .define(ROOT_ID, "id/root")
        .define(TITLE_ID, "id/title")
        .define(ICON_ID, "id/icon")
        .define(LIST_ID, "id/list")
        .define(ROW_TEXT_ID, "id/row_text")
        .define_value(ACCENT_COLOR, "color/accent", ResourceValue::Color(0xff33_66ccu32 as i32))
        .define_night_value(ACCENT_COLOR, ResourceValue::Color(0xff99_bbeeu32 as i32));

    (catalog, resources)
}
