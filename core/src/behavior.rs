use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::composite::MemberCall;
use crate::error::Result;

/// A callable member of a behavior. Receives the dispatching instance
/// context and the call arguments.
pub type MemberFn = Arc<dyn Fn(&mut MemberCall<'_>, &[Value]) -> Result<Value> + Send + Sync>;

/// An initialization hook, run once per instance construction.
pub type InitFn = Arc<dyn Fn(&mut MemberCall<'_>, &[Value]) -> Result<()> + Send + Sync>;

/// One unit of behavior: named methods, field defaults, and an optional
/// initialization hook. Roots and contributors both carry one.
///
/// Built with a chained builder:
///
/// ```ignore
/// let b = Behavior::new("audit")
///     .field("entries", json!(0))
///     .method("record", |call, _args| { ... });
/// ```
#[derive(Clone)]
pub struct Behavior {
    name: String,
    methods: BTreeMap<String, MemberFn>,
    fields: BTreeMap<String, Value>,
    init: Option<InitFn>,
}

impl Behavior {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            methods: BTreeMap::new(),
            fields: BTreeMap::new(),
            init: None,
        }
    }

    /// Add a named method. A newer composition layer defining the same name
    /// shadows this one.
    pub fn method<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&mut MemberCall<'_>, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.methods.insert(name.to_string(), Arc::new(f));
        self
    }

    /// Add a field default, copied into instance state at construction.
    pub fn field(mut self, name: &str, value: Value) -> Self {
        self.fields.insert(name.to_string(), value);
        self
    }

    /// Set the initialization hook for this layer.
    pub fn on_init<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut MemberCall<'_>, &[Value]) -> Result<()> + Send + Sync + 'static,
    {
        self.init = Some(Arc::new(f));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method_names(&self) -> Vec<&str> {
        self.methods.keys().map(String::as_str).collect()
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.keys().map(String::as_str).collect()
    }

    /// Field accessor, used for hash-attribute key derivation among other
    /// things.
    pub fn field_value(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub(crate) fn methods(&self) -> &BTreeMap<String, MemberFn> {
        &self.methods
    }

    pub(crate) fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub(crate) fn init(&self) -> Option<&InitFn> {
        self.init.as_ref()
    }
}

impl fmt::Debug for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Behavior")
            .field("name", &self.name)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .field("init", &self.init.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_accumulates_members() {
        let behavior = Behavior::new("audit")
            .method("record", |_call, _args| Ok(json!(null)))
            .method("flush", |_call, _args| Ok(json!(null)))
            .field("entries", json!(0));

        assert_eq!(behavior.name(), "audit");
        assert_eq!(behavior.method_names(), vec!["flush", "record"]);
        assert_eq!(behavior.field_names(), vec!["entries"]);
        assert_eq!(behavior.field_value("entries"), Some(&json!(0)));
        assert!(behavior.field_value("missing").is_none());
    }

    #[test]
    fn test_debug_lists_member_names_not_closures() {
        let behavior = Behavior::new("audit")
            .method("record", |_call, _args| Ok(json!(null)))
            .on_init(|_call, _args| Ok(()));

        let printed = format!("{behavior:?}");
        assert!(printed.contains("audit"));
        assert!(printed.contains("record"));
        assert!(printed.contains("init: true"));
    }
}
