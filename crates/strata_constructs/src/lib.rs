//! # strata_constructs
//!
//! Resource constructs for Strata.
//!
//! Each construct validates its properties against the scope it is defined
//! in, registers one template resource and exposes attribute references.
//! Properties that may be unknown until synthesis take a
//! [`Resolvable`](strata_core::Resolvable); checks on them run through the
//! deferred pipeline.
//!
//! ## Example
//!
//! ```rust
//! use strata_constructs::{Nodegroup, NodegroupProps};
//! use strata_core::{App, RenderInputs};
//!
//! let mut app = App::default();
//! let stack = app.add_scope(app.root(), "Stack").unwrap();
//!
//! let desired = app.parameter::<u32>("Desired");
//! let props = NodegroupProps::new("prod")
//!     .with_desired_size(desired)
//!     .with_max_size(6u32);
//! Nodegroup::new(&mut app, stack, "Workers", props).unwrap();
//!
//! let template = app.synth(&RenderInputs::new().with("Desired", 3)).unwrap();
//! assert!(template.resource("StackWorkers").is_some());
//! ```

use serde_json::{json, Value};
use strata_core::ScopeId;

pub mod cache_policy;
pub mod error;
pub mod nodegroup;
pub mod place_index;
pub mod queue;

pub use cache_policy::{
    CacheCookieBehavior, CacheHeaderBehavior, CachePolicy, CachePolicyProps, CachePolicyRef,
    CacheQueryStringBehavior, ImportedCachePolicy, ManagedCachePolicy,
};
pub use error::{ConstructError, ConstructResult};
pub use nodegroup::{
    CapacityType, LaunchTemplateSpec, Nodegroup, NodegroupAmiType, NodegroupProps, Taint, TaintEffect,
};
pub use place_index::{DataSource, IntendedUse, PlaceIndex, PlaceIndexProps};
pub use queue::{DeadLetterQueue, DeduplicationScope, FifoThroughputLimit, Queue, QueueEncryption, QueueProps};

/// Common surface of every construct.
pub trait Construct {
    /// The scope the construct was defined in.
    fn scope(&self) -> ScopeId;

    /// Logical id of the construct's main resource.
    fn logical_id(&self) -> &str;
}

/// `{"Ref": logical_id}`.
pub fn reference(logical_id: &str) -> Value {
    json!({ "Ref": logical_id })
}

/// `{"Fn::GetAtt": [logical_id, attribute]}`.
pub fn get_att(logical_id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [logical_id, attribute] })
}
