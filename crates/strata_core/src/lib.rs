//! # strata_core
//!
//! Core of the Strata construct library.
//!
//! This crate provides the scope tree with hierarchical context, feature flag
//! resolution, and the deferred-value pipeline every construct uses to
//! validate and derive properties whether or not their values are known yet.
//!
//! # Architecture
//!
//! - **Tree**: Arena of scopes; context lookups walk towards the root
//! - **Flags**: Registry of flag defaults and retired flags, resolved per scope
//! - **Tokens**: Typed placeholders for values known only at render time
//! - **Deferred pipeline**: Runs checks now or during the resolution pass
//! - **App**: Owns all of the above and renders the template
//!
//! # Example
//!
//! ```rust
//! use strata_core::{App, RenderInputs, Resolvable, ValidationError};
//!
//! let mut app = App::default();
//! let group = app.add_scope(app.root(), "Workers").unwrap();
//! let desired = app.parameter::<u32>("DesiredSize");
//!
//! app.with_resolved(
//!     group,
//!     (Resolvable::Deferred(desired), Resolvable::Literal(10u32)),
//!     |(desired, max)| {
//!         if desired > max {
//!             return Err(ValidationError::new(format!("{} > {}", desired, max)));
//!         }
//!         Ok(())
//!     },
//! )
//! .unwrap();
//!
//! assert!(app.synth(&RenderInputs::new().with("DesiredSize", 4)).is_ok());
//! ```

pub mod app;
pub mod context;
pub mod deferred;
pub mod error;
pub mod flags;
pub mod token;
pub mod tree;
pub mod validate;

// Re-export main types for convenience
pub use app::{App, Template, TemplateResource, PATH_METADATA};
pub use context::{parse_context_arg, truthy, ContextFile, CONTEXT_FILE};
pub use deferred::{DeferredPipeline, Owner, RenderInputs, ResolveInputs, TokenTable};
pub use error::{CoreError, CoreResult};
pub use flags::{FeatureFlags, FlagDefaults, FlagDefinition, FlagRegistry, RETIRED_FLAGS};
pub use token::{Resolvable, Token, TokenId};
pub use tree::{Annotation, ConstructTree, ScopeId};
pub use validate::{ValidationError, ValidationResult};
