//! Allow-list of remotely invocable setters with a memoizing resolver.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::error::ActionError;
use crate::value::{ParamType, ReflectionValue};
use crate::view::Widget;

pub type Setter =
    Arc<dyn Fn(&mut dyn Widget, &ReflectionValue) -> Result<(), ActionError> + Send + Sync>;

/// Cheap UI-thread mutation produced by a background preparation step.
pub type WidgetCommit = Box<dyn FnOnce(&mut dyn Widget) -> Result<(), ActionError> + Send>;

/// Background half of a setter: does the expensive resolution off the UI thread.
pub type Preparer =
    Arc<dyn Fn(&ReflectionValue) -> Result<WidgetCommit, ActionError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MethodKey {
    class: String,
    param: ParamType,
    method: String,
}

struct MethodEntry {
    setter: Setter,
    preparer: Option<Preparer>,
    remotable: bool,
}

/// A setter resolved for a concrete class.
#[derive(Clone)]
pub struct ResolvedMethod {
    method: Arc<str>,
    param: ParamType,
    setter: Setter,
    preparer: Option<Preparer>,
}

impl ResolvedMethod {
    pub fn invoke(&self, widget: &mut dyn Widget, value: &ReflectionValue) -> Result<(), ActionError> {
        self.check(value)?;
        (self.setter)(widget, value)
    }

    pub fn has_preparer(&self) -> bool {
        self.preparer.is_some()
    }

    /// Runs the background half, or returns `None` when the setter has none.
    pub fn prepare(&self, value: &ReflectionValue) -> Option<Result<WidgetCommit, ActionError>> {
        let preparer = self.preparer.as_ref()?;
        Some(self.check(value).and_then(|()| preparer(value)))
    }

    fn check(&self, value: &ReflectionValue) -> Result<(), ActionError> {
        if value.param_type() == self.param {
            Ok(())
        } else {
            Err(ActionError::ArgumentMismatch {
                method: self.method.to_string(),
                expected: self.param,
                actual: value.param_type(),
            })
        }
    }
}

impl fmt::Debug for ResolvedMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedMethod")
            .field("method", &self.method)
            .field("param", &self.param)
            .field("async", &self.preparer.is_some())
            .finish()
    }
}

/// Setters registered per view class, inherited by subclasses.
///
/// Registration happens up front through `&mut self`; afterwards the
/// registry is shared and only the resolution cache mutates, under one lock.
#[derive(Default)]
pub struct MethodRegistry {
    parents: FxHashMap<String, String>,
    methods: FxHashMap<MethodKey, MethodEntry>,
    cache: Mutex<FxHashMap<MethodKey, ResolvedMethod>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `class`, optionally inheriting the setters of `parent`.
    pub fn register_class(&mut self, class: &str, parent: Option<&str>) -> &mut Self {
        if let Some(parent) = parent {
            self.parents.insert(class.to_string(), parent.to_string());
        }
        self
    }

    pub fn register<F>(&mut self, class: &str, method: &str, param: ParamType, setter: F) -> &mut Self
    where
        F: Fn(&mut dyn Widget, &ReflectionValue) -> Result<(), ActionError> + Send + Sync + 'static,
    {
        self.insert(class, method, param, Arc::new(setter), None, true)
    }

    /// Registers a setter whose value can be prepared off the UI thread.
    pub fn register_with_preparer<F, P>(
        &mut self,
        class: &str,
        method: &str,
        param: ParamType,
        setter: F,
        preparer: P,
    ) -> &mut Self
    where
        F: Fn(&mut dyn Widget, &ReflectionValue) -> Result<(), ActionError> + Send + Sync + 'static,
        P: Fn(&ReflectionValue) -> Result<WidgetCommit, ActionError> + Send + Sync + 'static,
    {
        self.insert(
            class,
            method,
            param,
            Arc::new(setter),
            Some(Arc::new(preparer)),
            true,
        )
    }

    /// Declares a setter that exists locally but may not be invoked remotely.
    pub fn register_local<F>(
        &mut self,
        class: &str,
        method: &str,
        param: ParamType,
        setter: F,
    ) -> &mut Self
    where
        F: Fn(&mut dyn Widget, &ReflectionValue) -> Result<(), ActionError> + Send + Sync + 'static,
    {
        self.insert(class, method, param, Arc::new(setter), None, false)
    }

    fn insert(
        &mut self,
        class: &str,
        method: &str,
        param: ParamType,
        setter: Setter,
        preparer: Option<Preparer>,
        remotable: bool,
    ) -> &mut Self {
        self.methods.insert(
            MethodKey {
                class: class.to_string(),
                param,
                method: method.to_string(),
            },
            MethodEntry {
                setter,
                preparer,
                remotable,
            },
        );
        self.cache.get_mut().clear();
        self
    }

    /// Resolves `method(param)` on `class`, walking up the class chain.
    pub fn resolve(
        &self,
        class: &str,
        param: ParamType,
        method: &str,
    ) -> Result<ResolvedMethod, ActionError> {
        let key = MethodKey {
            class: class.to_string(),
            param,
            method: method.to_string(),
        };

        let mut cache = self.cache.lock();
        if let Some(resolved) = cache.get(&key) {
            return Ok(resolved.clone());
        }

        let mut current = Some(class);
        while let Some(candidate) = current {
            let lookup = MethodKey {
                class: candidate.to_string(),
                param,
                method: method.to_string(),
            };
            if let Some(entry) = self.methods.get(&lookup) {
                if !entry.remotable {
                    return Err(ActionError::NotRemotable {
                        class: class.to_string(),
                        method: method.to_string(),
                    });
                }
                let resolved = ResolvedMethod {
                    method: Arc::from(method),
                    param,
                    setter: entry.setter.clone(),
                    preparer: entry.preparer.clone(),
                };
                tracing::trace!(class, method, %param, declared_on = candidate, "resolved setter");
                cache.insert(key, resolved.clone());
                return Ok(resolved);
            }
            current = self.parents.get(candidate).map(String::as_str);
        }

        Err(ActionError::MethodNotFound {
            class: class.to_string(),
            method: method.to_string(),
            param,
        })
    }

    /// Number of memoized resolutions.
    pub fn cached_len(&self) -> usize {
        self.cache.lock().len()
    }
}

impl fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodRegistry")
            .field("classes", &self.parents.len())
            .field("methods", &self.methods.len())
            .finish_non_exhaustive()
    }
}
