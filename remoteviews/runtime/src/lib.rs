//! Remote view descriptions: build a tree of layout actions in one process,
//! ship it in a compact wire form and apply it to live views in another.

pub mod action;
pub mod bitmap;
pub mod cache;
pub mod codec;
pub mod collection;
pub mod collector;
pub mod config;
pub mod engine;
pub mod error;
pub mod host;
pub mod intent;
pub mod protocol;
pub mod remote_views;
pub mod resources;
pub mod value;
pub mod view;

#[cfg(test)]
mod test_support;

pub use crate::action::{Action, ActionKind, MergeBehavior};
pub use crate::bitmap::Bitmap;
pub use crate::codec::{DecodeOptions, WireForm};
pub use crate::collection::RemoteCollectionItems;
pub use crate::collector::{CollectionCollector, FactoryConnector, RemoteCollectionFactory};
pub use crate::config::{CollectorConfig, HostConfig};
pub use crate::engine::{ApplyListener, ApplyParams, ApplyTask, Engine};
pub use crate::error::{
    ActionError, ApplyError, CodecError, Error, HostError, RemoteError, Result, ValidationError,
};
pub use crate::intent::{ComponentName, Intent, PendingIntent, RemoteResponse};
pub use crate::protocol::{HOST_TO_PRODUCER_CAP, HostEnvelope, PRODUCER_TO_HOST_CAP, ProducerEnvelope};
pub use crate::remote_views::{ApplyFlags, RemoteViews};
pub use crate::resources::{DeviceConfiguration, Orientation, ResourceResolver, ResourceTable, SizeF};
pub use crate::value::{ParamType, ReflectionValue};
pub use crate::view::{InteractionHandler, LayoutTemplate, NodeId, ViewTree, WidgetCatalog};
pub use serde_json;
