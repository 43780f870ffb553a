pub mod error;
pub mod keyed;
pub mod point;
pub mod scope;

// Re-export key types for convenience.
pub use error::{PointError, Result};
pub use keyed::KeyedExtensionPoint;
pub use point::ExtensionPoint;
pub use scope::ExtensionScope;

// The engine types callers need alongside the handles.
pub use stratum_core::{
    Behavior, Composite, CompositeInstance, CompositeSpec, ContributorDescriptor, CoreError,
    FamilyKey, MemberCall, PointConfig, PointId, RegistrySnapshot,
};
