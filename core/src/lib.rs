pub mod behavior;
pub mod builder;
pub mod composite;
pub mod descriptor;
pub mod error;
pub mod linearize;
pub mod registry;

// Re-export key types for convenience.
pub use behavior::{Behavior, InitFn, MemberFn};
pub use builder::CompositeBuilder;
pub use composite::{Composite, CompositeInstance, CompositeSpec, MemberCall};
pub use descriptor::{ContributorDescriptor, ContributorId, FamilyKey, PointId};
pub use error::{CoreError, Result};
pub use linearize::{ResolutionOrder, linearize};
pub use registry::{
    ContributorRecord, ExtensionRegistry, PointConfig, PointSnapshot, RegisterOutcome,
    RegistrySnapshot, RootHandle,
};
