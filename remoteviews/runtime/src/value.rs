//! Values carried by reflective setters.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::bitmap::Bitmap;
use crate::intent::Intent;

/// Argument type of a reflective setter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ParamType {
    Boolean,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    Char,
    String,
    CharSequence,
    Uri,
    Bitmap,
    Bundle,
    Intent,
    ColorStateList,
    Icon,
    BlendMode,
}

impl ParamType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Byte => "byte",
            Self::Short => "short",
            Self::Int => "int",
            Self::Long => "long",
            Self::Float => "float",
            Self::Double => "double",
            Self::Char => "char",
            Self::String => "String",
            Self::CharSequence => "CharSequence",
            Self::Uri => "Uri",
            Self::Bitmap => "Bitmap",
            Self::Bundle => "Bundle",
            Self::Intent => "Intent",
            Self::ColorStateList => "ColorStateList",
            Self::Icon => "Icon",
            Self::BlendMode => "BlendMode",
        }
    }

    /// Values of these types may need I/O to resolve.
    pub const fn prefers_async_apply(self) -> bool {
        matches!(self, Self::Uri | Self::Icon)
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Color state list reduced to a default color plus state-specific overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorStateList {
    pub default_color: i32,
    /// `(state set, color)` pairs checked in order.
    pub states: Vec<(Vec<i32>, i32)>,
}

impl ColorStateList {
    pub fn value_of(color: i32) -> Self {
        Self {
            default_color: color,
            states: Vec::new(),
        }
    }
}

/// Porter-Duff and advanced blend modes used by tints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlendMode {
    Clear,
    Src,
    Dst,
    SrcOver,
    DstOver,
    SrcIn,
    DstIn,
    SrcOut,
    DstOut,
    SrcAtop,
    DstAtop,
    Xor,
    Plus,
    Modulate,
    Screen,
    Overlay,
    Darken,
    Lighten,
    Multiply,
}

/// Image source understood by image-like widgets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Icon {
    Resource { package: String, id: i32 },
    Bitmap(Bitmap),
    Uri(String),
    Data(#[serde(with = "crate::bitmap::base64_bytes")] Vec<u8>),
}

impl Icon {
    pub fn uri(&self) -> Option<&str> {
        match self {
            Self::Uri(uri) => Some(uri),
            _ => None,
        }
    }
}

/// Argument of a reflective setter, tagged by its [`ParamType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReflectionValue {
    Boolean(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Char(char),
    String(Option<String>),
    CharSequence(Option<String>),
    Uri(Option<String>),
    Bitmap(Option<Bitmap>),
    Bundle(BTreeMap<String, String>),
    Intent(Option<Intent>),
    ColorStateList(Option<ColorStateList>),
    Icon(Option<Icon>),
    BlendMode(Option<BlendMode>),
}

impl ReflectionValue {
    pub const fn param_type(&self) -> ParamType {
        match self {
            Self::Boolean(_) => ParamType::Boolean,
            Self::Byte(_) => ParamType::Byte,
            Self::Short(_) => ParamType::Short,
            Self::Int(_) => ParamType::Int,
            Self::Long(_) => ParamType::Long,
            Self::Float(_) => ParamType::Float,
            Self::Double(_) => ParamType::Double,
            Self::Char(_) => ParamType::Char,
            Self::String(_) => ParamType::String,
            Self::CharSequence(_) => ParamType::CharSequence,
            Self::Uri(_) => ParamType::Uri,
            Self::Bitmap(_) => ParamType::Bitmap,
            Self::Bundle(_) => ParamType::Bundle,
            Self::Intent(_) => ParamType::Intent,
            Self::ColorStateList(_) => ParamType::ColorStateList,
            Self::Icon(_) => ParamType::Icon,
            Self::BlendMode(_) => ParamType::BlendMode,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::String(text) | Self::CharSequence(text) => text.as_deref(),
            _ => None,
        }
    }

    /// Externally referenced URIs, for permission granting.
    pub fn visit_uris(&self, visitor: &mut dyn FnMut(&str)) {
        match self {
            Self::Uri(Some(uri)) => visitor(uri),
            Self::Icon(Some(icon)) => {
                if let Some(uri) = icon.uri() {
                    visitor(uri);
                }
            }
            Self::Intent(Some(intent)) => intent.visit_uris(visitor),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_uri_and_icon_prefer_async() {
        assert!(ParamType::Uri.prefers_async_apply());
        assert!(ParamType::Icon.prefers_async_apply());
        assert!(!ParamType::Bitmap.prefers_async_apply());
        assert!(!ParamType::CharSequence.prefers_async_apply());
    }

    #[test]
    fn uris_are_found_inside_icons() {
        let mut seen = Vec::new();
        ReflectionValue::Icon(Some(Icon::Uri("content://a/1".into())))
            .visit_uris(&mut |uri| seen.push(uri.to_string()));
        ReflectionValue::Uri(None).visit_uris(&mut |uri| seen.push(uri.to_string()));
        assert_eq!(seen, vec!["content://a/1".to_string()]);
    }
}
