//! Intents, pending intents and interaction responses.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComponentName {
    pub package: String,
    pub class: String,
}

impl ComponentName {
    pub fn new(package: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            class: class.into(),
        }
    }
}

/// Description of an operation to perform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    pub action: Option<String>,
    pub data: Option<String>,
    pub component: Option<ComponentName>,
    pub extras: BTreeMap<String, String>,
    pub flags: i32,
}

impl Intent {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: Some(action.into()),
            ..Self::default()
        }
    }

    pub fn for_component(component: ComponentName) -> Self {
        Self {
            component: Some(component),
            ..Self::default()
        }
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extras.insert(key.into(), value.into());
        self
    }

    /// Canonical URI form; two intents addressing the same source share it.
    pub fn to_uri(&self) -> String {
        let mut uri = String::from("intent:");
        if let Some(data) = &self.data {
            uri.push_str(data);
        }
        uri.push_str("#Intent;");
        if let Some(action) = &self.action {
            let _ = write!(uri, "action={action};");
        }
        if let Some(component) = &self.component {
            let _ = write!(uri, "component={}/{};", component.package, component.class);
        }
        if self.flags != 0 {
            let _ = write!(uri, "launchFlags=0x{:x};", self.flags);
        }
        for (key, value) in &self.extras {
            let _ = write!(uri, "S.{key}={value};");
        }
        uri.push_str("end");
        uri
    }

    /// Copies fields of `other` into the unset fields of `self`; extras are merged.
    pub fn fill_in(&mut self, other: &Intent) {
        if self.action.is_none() {
            self.action.clone_from(&other.action);
        }
        if self.data.is_none() {
            self.data.clone_from(&other.data);
        }
        if self.component.is_none() {
            self.component.clone_from(&other.component);
        }
        self.flags |= other.flags;
        for (key, value) in &other.extras {
            self.extras.insert(key.clone(), value.clone());
        }
    }

    pub fn visit_uris(&self, visitor: &mut dyn FnMut(&str)) {
        if let Some(data) = &self.data {
            visitor(data);
        }
    }
}

/// Opaque, producer-granted token for launching an intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingIntent {
    pub creator_package: String,
    pub request_code: i32,
    pub intent: Intent,
}

impl PendingIntent {
    pub fn new(creator_package: impl Into<String>, request_code: i32, intent: Intent) -> Self {
        Self {
            creator_package: creator_package.into(),
            request_code,
            intent,
        }
    }
}

/// What happens when a view is clicked or its checked state changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteResponse {
    /// Launch a fixed pending intent.
    Launch(PendingIntent),
    /// Fill in the template registered on the nearest ancestor.
    FillIn(Intent),
    /// A pending intent already combined with its fill-in.
    Combined {
        pending: PendingIntent,
        fill_in: Intent,
    },
}

impl RemoteResponse {
    pub fn pending_intent(&self) -> Option<&PendingIntent> {
        match self {
            Self::Launch(pending) | Self::Combined { pending, .. } => Some(pending),
            Self::FillIn(_) => None,
        }
    }

    pub fn fill_in(&self) -> Option<&Intent> {
        match self {
            Self::FillIn(fill_in) | Self::Combined { fill_in, .. } => Some(fill_in),
            Self::Launch(_) => None,
        }
    }

    pub fn visit_uris(&self, visitor: &mut dyn FnMut(&str)) {
        if let Some(pending) = self.pending_intent() {
            pending.intent.visit_uris(visitor);
        }
        if let Some(fill_in) = self.fill_in() {
            fill_in.visit_uris(visitor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_is_canonical_for_equal_intents() {
        let a = Intent::for_component(ComponentName::new("com.example", "ListService"))
            .with_data("content://list/1")
            .with_extra("b", "2")
            .with_extra("a", "1");
        let b = Intent::for_component(ComponentName::new("com.example", "ListService"))
            .with_data("content://list/1")
            .with_extra("a", "1")
            .with_extra("b", "2");
        assert_eq!(a.to_uri(), b.to_uri());
        assert_eq!(
            a.to_uri(),
            "intent:content://list/1#Intent;component=com.example/ListService;S.a=1;S.b=2;end"
        );
    }

    #[test]
    fn fill_in_keeps_template_fields() {
        let mut template = Intent::new("open").with_extra("source", "widget");
        template.fill_in(&Intent::new("ignored").with_data("item://3").with_extra("row", "3"));
        assert_eq!(template.action.as_deref(), Some("open"));
        assert_eq!(template.data.as_deref(), Some("item://3"));
        assert_eq!(template.extras.len(), 2);
    }
}
