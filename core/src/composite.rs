use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::behavior::{InitFn, MemberFn};
use crate::error::{CoreError, Result};
use crate::linearize::ResolutionOrder;

struct MethodSlot {
    func: MemberFn,
    origin: String,
}

/// The generated artifact: an immutable member table layered from a
/// resolution order. For a fixed order the composite is pure — the same
/// order always yields behaviorally identical dispatch. Handed-out
/// composites are snapshots; later registrations never mutate them.
pub struct Composite {
    name: String,
    layers: Vec<String>,
    methods: BTreeMap<String, MethodSlot>,
    defaults: BTreeMap<String, FieldSlot>,
    /// Fallback-most first, so newer layers observe older layers' setup.
    inits: Vec<(String, InitFn)>,
}

struct FieldSlot {
    value: Value,
    origin: String,
}

impl Composite {
    /// Walk the order front to back; the first definition of each member
    /// name wins, with root-defined members as the fallback.
    pub(crate) fn from_order(order: &ResolutionOrder, name: &str) -> Arc<Self> {
        let mut methods: BTreeMap<String, MethodSlot> = BTreeMap::new();
        let mut defaults: BTreeMap<String, FieldSlot> = BTreeMap::new();
        let mut inits: Vec<(String, InitFn)> = Vec::new();
        for desc in order.layers() {
            let behavior = desc.behavior();
            for (member, func) in behavior.methods() {
                methods.entry(member.clone()).or_insert_with(|| MethodSlot {
                    func: Arc::clone(func),
                    origin: desc.name().to_string(),
                });
            }
            for (field, value) in behavior.fields() {
                defaults.entry(field.clone()).or_insert_with(|| FieldSlot {
                    value: value.clone(),
                    origin: desc.name().to_string(),
                });
            }
            if let Some(init) = behavior.init() {
                inits.push((desc.name().to_string(), Arc::clone(init)));
            }
        }
        inits.reverse();
        Arc::new(Self {
            name: name.to_string(),
            layers: order.layer_names().iter().map(|n| (*n).to_string()).collect(),
            methods,
            defaults,
            inits,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Layer names in resolution order, newest first, root last.
    pub fn layer_names(&self) -> Vec<&str> {
        self.layers.iter().map(String::as_str).collect()
    }

    pub fn member_names(&self) -> Vec<&str> {
        self.methods.keys().map(String::as_str).collect()
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.defaults.keys().map(String::as_str).collect()
    }

    pub fn has_member(&self, member: &str) -> bool {
        self.methods.contains_key(member)
    }

    /// The layer whose definition of `member` won.
    pub fn origin_of(&self, member: &str) -> Option<&str> {
        self.methods.get(member).map(|slot| slot.origin.as_str())
    }

    pub fn default_field(&self, field: &str) -> Option<&Value> {
        self.defaults.get(field).map(|slot| &slot.value)
    }

    /// Construct an instance: field defaults become initial state, then each
    /// layer's initialization hook runs exactly once, fallback-most first.
    pub fn instantiate(self: &Arc<Self>, args: &[Value]) -> Result<CompositeInstance> {
        let mut state: BTreeMap<String, Value> = self
            .defaults
            .iter()
            .map(|(field, slot)| (field.clone(), slot.value.clone()))
            .collect();
        for (_, init) in &self.inits {
            let mut call = MemberCall {
                composite: self,
                state: &mut state,
            };
            (**init)(&mut call, args)?;
        }
        Ok(CompositeInstance {
            composite: Arc::clone(self),
            state,
        })
    }

    /// Serializable description for diagnostics.
    pub fn describe(&self) -> CompositeSpec {
        CompositeSpec {
            name: self.name.clone(),
            layers: self.layers.clone(),
            members: self
                .methods
                .iter()
                .map(|(member, slot)| (member.clone(), slot.origin.clone()))
                .collect(),
            fields: self
                .defaults
                .iter()
                .map(|(field, slot)| (field.clone(), slot.origin.clone()))
                .collect(),
        }
    }

    fn dispatch(&self, state: &mut BTreeMap<String, Value>, member: &str, args: &[Value]) -> Result<Value> {
        let slot = self.methods.get(member).ok_or_else(|| CoreError::MemberNotFound {
            composite: self.name.clone(),
            member: member.to_string(),
        })?;
        let mut call = MemberCall {
            composite: self,
            state,
        };
        (*slot.func)(&mut call, args)
    }
}

impl fmt::Debug for Composite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Composite")
            .field("name", &self.name)
            .field("layers", &self.layers)
            .field("members", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Serializable description of a composite for diagnostics: which layer won
/// each member and field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeSpec {
    pub name: String,
    pub layers: Vec<String>,
    pub members: BTreeMap<String, String>,
    pub fields: BTreeMap<String, String>,
}

/// One constructed object: a shared composite plus per-instance state. The
/// composite reference is a snapshot — instances built before a later
/// registration keep the member set they were built with.
pub struct CompositeInstance {
    composite: Arc<Composite>,
    state: BTreeMap<String, Value>,
}

impl CompositeInstance {
    /// Dispatch a member call. A miss is a typed error, not a silent
    /// default.
    pub fn call(&mut self, member: &str, args: &[Value]) -> Result<Value> {
        self.composite.dispatch(&mut self.state, member, args)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.state.get(field)
    }

    pub fn set(&mut self, field: &str, value: Value) {
        self.state.insert(field.to_string(), value);
    }

    pub fn composite(&self) -> &Arc<Composite> {
        &self.composite
    }
}

impl fmt::Debug for CompositeInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeInstance")
            .field("composite", &self.composite.name)
            .field("state", &self.state)
            .finish()
    }
}

/// Context handed to members and initialization hooks: instance state plus
/// re-dispatch into the owning composite, so one layer can fall through to
/// another layer's member.
pub struct MemberCall<'a> {
    composite: &'a Composite,
    state: &'a mut BTreeMap<String, Value>,
}

impl MemberCall<'_> {
    /// Re-dispatch into the composite's member table.
    pub fn call(&mut self, member: &str, args: &[Value]) -> Result<Value> {
        self.composite.dispatch(self.state, member, args)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.state.get(field)
    }

    pub fn set(&mut self, field: &str, value: Value) {
        self.state.insert(field.to_string(), value);
    }

    pub fn composite_name(&self) -> &str {
        &self.composite.name
    }
}
