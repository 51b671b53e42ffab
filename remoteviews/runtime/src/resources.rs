//! Resource resolution seam and device configuration.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::ActionError;
use crate::value::{ColorStateList, ParamType, ReflectionValue};

/// "No id" marker shared by views, layouts and resources.
pub const NO_ID: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SizeF {
    pub width: f32,
    pub height: f32,
}

impl SizeF {
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn area(self) -> f32 {
        self.width * self.height
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
}

/// Device state that resource resolution and variant selection depend on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfiguration {
    pub orientation: Orientation,
    pub night_mode: bool,
    /// Pixels per density-independent pixel.
    pub density: f32,
    pub font_scale: f32,
}

impl Default for DeviceConfiguration {
    fn default() -> Self {
        Self {
            orientation: Orientation::Portrait,
            night_mode: false,
            density: 1.0,
            font_scale: 1.0,
        }
    }
}

/// Unit of a complex dimension value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComplexUnit {
    Px,
    Dip,
    Sp,
    Pt,
    In,
    Mm,
}

impl ComplexUnit {
    /// Converts `value` in this unit to pixels.
    pub fn to_px(self, value: f32, config: &DeviceConfiguration) -> f32 {
        let xdpi = config.density * 160.0;
        match self {
            Self::Px => value,
            Self::Dip => value * config.density,
            Self::Sp => value * config.density * config.font_scale,
            Self::Pt => value * xdpi / 72.0,
            Self::In => value * xdpi,
            Self::Mm => value * xdpi / 25.4,
        }
    }
}

/// How a resource should be read for a setter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Color,
    ColorStateList,
    Dimension,
    DimensionPixelOffset,
    DimensionPixelSize,
    String,
    Integer,
    Float,
    Boolean,
}

impl ResourceKind {
    const fn label(self) -> &'static str {
        match self {
            Self::Color => "color",
            Self::ColorStateList => "color state list",
            Self::Dimension | Self::DimensionPixelOffset | Self::DimensionPixelSize => "dimension",
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
        }
    }
}

/// Raw value stored in a resource table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResourceValue {
    Color(i32),
    ColorStateList(ColorStateList),
    Dimension { value: f32, unit: ComplexUnit },
    String(String),
    Integer(i32),
    Float(f32),
    Boolean(bool),
}

/// Consumer-side resource system.
pub trait ResourceResolver: Send + Sync {
    /// Fully qualified name (`type/entry`) of a resource id.
    fn name_of(&self, id: i32) -> Option<String>;

    /// Resource id for a fully qualified name.
    fn id_of(&self, name: &str) -> Option<i32>;

    /// Value of a resource for the given night mode.
    fn value(&self, id: i32, night_mode: bool) -> Option<ResourceValue>;

    /// Resource id a theme attribute points at.
    fn theme_attribute(&self, attr: i32) -> Option<i32>;
}

/// Resolves resource `id` as `kind`, producing a setter argument of type `param`.
pub fn resolve_resource(
    resolver: &dyn ResourceResolver,
    config: &DeviceConfiguration,
    id: i32,
    kind: ResourceKind,
    param: ParamType,
) -> Result<ReflectionValue, ActionError> {
    let value = resolver
        .value(id, config.night_mode)
        .ok_or(ActionError::ResourceNotFound(id))?;
    let wrong = || ActionError::WrongResourceType {
        id,
        expected: kind.label(),
    };

    let resolved = match (kind, value) {
        (ResourceKind::Color, ResourceValue::Color(color)) => match param {
            ParamType::ColorStateList => {
                ReflectionValue::ColorStateList(Some(ColorStateList::value_of(color)))
            }
            _ => ReflectionValue::Int(color),
        },
        (ResourceKind::ColorStateList, ResourceValue::ColorStateList(list)) => {
            ReflectionValue::ColorStateList(Some(list))
        }
        (ResourceKind::ColorStateList, ResourceValue::Color(color)) => {
            ReflectionValue::ColorStateList(Some(ColorStateList::value_of(color)))
        }
        (ResourceKind::Dimension, ResourceValue::Dimension { value, unit }) => {
            ReflectionValue::Float(unit.to_px(value, config))
        }
        (ResourceKind::DimensionPixelOffset, ResourceValue::Dimension { value, unit }) => {
            ReflectionValue::Int(unit.to_px(value, config) as i32)
        }
        (ResourceKind::DimensionPixelSize, ResourceValue::Dimension { value, unit }) => {
            ReflectionValue::Int(pixel_size(unit.to_px(value, config)))
        }
        (ResourceKind::String, ResourceValue::String(text)) => match param {
            ParamType::String => ReflectionValue::String(Some(text)),
            _ => ReflectionValue::CharSequence(Some(text)),
        },
        (ResourceKind::Integer, ResourceValue::Integer(value)) => ReflectionValue::Int(value),
        (ResourceKind::Float, ResourceValue::Float(value)) => ReflectionValue::Float(value),
        (ResourceKind::Boolean, ResourceValue::Boolean(value)) => ReflectionValue::Boolean(value),
        _ => return Err(wrong()),
    };

    if resolved.param_type() != param {
        return Err(wrong());
    }
    Ok(resolved)
}

/// Rounds a pixel dimension the way layout sizes are rounded: never to zero
/// unless the value is zero.
pub fn pixel_size(px: f32) -> i32 {
    let rounded = (px + 0.5) as i32;
    if rounded != 0 {
        rounded
    } else if px == 0.0 {
        0
    } else if px > 0.0 {
        1
    } else {
        -1
    }
}

#[derive(Debug, Clone)]
struct ResourceEntry {
    day: Option<ResourceValue>,
    night: Option<ResourceValue>,
}

/// In-memory resource table.
#[derive(Debug, Clone, Default)]
pub struct ResourceTable {
    names: FxHashMap<i32, String>,
    ids: FxHashMap<String, i32>,
    entries: FxHashMap<i32, ResourceEntry>,
    attributes: FxHashMap<i32, i32>,
}

impl ResourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a named id with no value (view ids, layouts).
    pub fn define(&mut self, id: i32, name: impl Into<String>) -> &mut Self {
        let name = name.into();
        self.ids.insert(name.clone(), id);
        self.names.insert(id, name);
        self
    }

    pub fn define_value(
        &mut self,
        id: i32,
        name: impl Into<String>,
        value: ResourceValue,
    ) -> &mut Self {
        self.define(id, name);
        self.entries
            .entry(id)
            .or_insert(ResourceEntry {
                day: None,
                night: None,
            })
            .day = Some(value);
        self
    }

    /// Night-mode override for an already defined value.
    pub fn define_night_value(&mut self, id: i32, value: ResourceValue) -> &mut Self {
        self.entries
            .entry(id)
            .or_insert(ResourceEntry {
                day: None,
                night: None,
            })
            .night = Some(value);
        self
    }

    pub fn define_attribute(&mut self, attr: i32, name: impl Into<String>, target: i32) -> &mut Self {
        self.define(attr, name);
        self.attributes.insert(attr, target);
        self
    }

    /// Builds a table from its JSON description.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let file: ResourceTableFile = serde_json::from_str(raw)?;
        let mut table = Self::new();
        for entry in file.resources {
            match entry.value {
                Some(value) => table.define_value(entry.id, entry.name, value),
                None => table.define(entry.id, entry.name),
            };
            if let Some(night) = entry.night {
                table.define_night_value(entry.id, night);
            }
        }
        for attr in file.attributes {
            table.define_attribute(attr.id, attr.name, attr.resource);
        }
        Ok(table)
    }
}

impl ResourceResolver for ResourceTable {
    fn name_of(&self, id: i32) -> Option<String> {
        self.names.get(&id).cloned()
    }

    fn id_of(&self, name: &str) -> Option<i32> {
        self.ids.get(name).copied()
    }

    fn value(&self, id: i32, night_mode: bool) -> Option<ResourceValue> {
        let entry = self.entries.get(&id)?;
        if night_mode && entry.night.is_some() {
            return entry.night.clone();
        }
        entry.day.clone()
    }

    fn theme_attribute(&self, attr: i32) -> Option<i32> {
        self.attributes.get(&attr).copied()
    }
}

#[derive(Debug, Deserialize)]
struct ResourceTableFile {
    #[serde(default)]
    resources: Vec<ResourceFileEntry>,
    #[serde(default)]
    attributes: Vec<AttributeFileEntry>,
}

#[derive(Debug, Deserialize)]
struct ResourceFileEntry {
    id: i32,
    name: String,
    #[serde(default)]
    value: Option<ResourceValue>,
    #[serde(default)]
    night: Option<ResourceValue>,
}

#[derive(Debug, Deserialize)]
struct AttributeFileEntry {
    id: i32,
    name: String,
    resource: i32,
}
