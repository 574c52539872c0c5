//! Error types and the process-wide error surface.
//!
//! This module declares focused, composable error types used across the
//! storage, index and scheduling subsystems, together with the **error
//! surface**: a process-wide reporter callback through which every subsystem
//! signals failures.
//!
//! ## Goals
//! * **Specificity:** Each error type models a single failure mode (e.g.
//!   stale entity handles, duplicate component installation, cyclic system
//!   dependencies).
//! * **Ergonomics:** All errors implement [`std::error::Error`] and
//!   [`fmt::Display`], and provide `From<T>` conversions into the aggregate
//!   [`EcsError`].
//! * **Actionability:** Structured fields (offending raw id, recorded vs.
//!   supplied version, component type names) make logs useful without
//!   reproducing the issue.
//!
//! ## Reporting model
//! The engine does not unwind through its public operations. Failures are
//! routed to a globally registered handler via [`report`]; after reporting,
//! the operation either no-ops (lookup misses) or proceeds with the
//! documented degraded post-state (invariant violations). The default
//! handler panics, which makes violations fail fast in development; hosts
//! that prefer collection or logging install their own handler with
//! [`set_error_handler`].
//!
//! ## Display vs. Debug
//! * [`fmt::Display`] is optimized for operator logs (short, imperative
//!   phrasing).
//! * [`fmt::Debug`] (derived) retains full structure for diagnostics.

use std::fmt;

use parking_lot::RwLock;

use crate::engine::types::{ComponentTypeId, EntityVersion, RawEntityId};

/// Result alias used by the fallible entry points of the engine.
pub type EcsResult<T> = Result<T, EcsError>;

/// Errors concerning entity identity and liveness.
///
/// ### Example
/// ```ignore
/// if versions[raw_id as usize] != entity.version() {
///     report(EntityError::Stale {
///         raw_id,
///         recorded_version: versions[raw_id as usize],
///         supplied_version: entity.version(),
///     }.into());
///     return;
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityError {
    /// The raw id is out of range or its slot is not alive.
    NotFound {
        /// Offending raw id.
        raw_id: RawEntityId,
    },

    /// The handle's version does not match the recorded version.
    Stale {
        /// Offending raw id.
        raw_id: RawEntityId,
        /// Version currently recorded for the slot.
        recorded_version: EntityVersion,
        /// Version carried by the supplied handle.
        supplied_version: EntityVersion,
    },

    /// The slot's version counter wrapped; the raw id is retired.
    VersionExhausted {
        /// Retired raw id.
        raw_id: RawEntityId,
    },

    /// An entity was transferred to the manager that already owns it.
    SelfTransfer {
        /// Offending raw id.
        raw_id: RawEntityId,
    },

    /// Two managers involved in a transfer use different component factories.
    ForeignFactory,
}

impl fmt::Display for EntityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityError::NotFound { raw_id } => {
                write!(f, "entity {} does not exist in this manager", raw_id)
            }
            EntityError::Stale { raw_id, recorded_version, supplied_version } => write!(
                f,
                "entity {} is stale (recorded version {}, supplied version {})",
                raw_id, recorded_version, supplied_version
            ),
            EntityError::VersionExhausted { raw_id } => {
                write!(f, "entity slot {} exhausted its version counter and was retired", raw_id)
            }
            EntityError::SelfTransfer { raw_id } => {
                write!(f, "entity {} transferred to the manager that already owns it", raw_id)
            }
            EntityError::ForeignFactory => {
                f.write_str("entity transfer between managers with different component factories")
            }
        }
    }
}

impl std::error::Error for EntityError {}

/// Errors concerning component installation and lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentError {
    /// The entity already holds a component of this type.
    ///
    /// The incoming instance is leaked; the previously installed instance
    /// stays in place.
    AlreadyPresent {
        /// Entity that holds the duplicate.
        raw_id: RawEntityId,
        /// Component type involved.
        type_id: ComponentTypeId,
    },

    /// A query re-used an existing index signature with a different
    /// component order; the cached rows cannot be reinterpreted.
    SignatureOrderMismatch {
        /// Component type that first disagreed.
        type_id: ComponentTypeId,
    },
}

impl fmt::Display for ComponentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentError::AlreadyPresent { raw_id, type_id } => write!(
                f,
                "entity {} already has a component of type {}; the new instance leaks",
                raw_id, type_id
            ),
            ComponentError::SignatureOrderMismatch { type_id } => write!(
                f,
                "index signature queried with conflicting component order (near {})",
                type_id
            ),
        }
    }
}

impl std::error::Error for ComponentError {}

/// Errors raised by the component factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactoryError {
    /// The component type id was never registered.
    UnknownType {
        /// Unregistered type.
        type_id: ComponentTypeId,
    },

    /// The component type was registered without clone support.
    CloneUnsupported {
        /// Component type lacking a clone callable.
        type_id: ComponentTypeId,
    },
}

impl fmt::Display for FactoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactoryError::UnknownType { type_id } => {
                write!(f, "unknown component type: '{}'", type_id)
            }
            FactoryError::CloneUnsupported { type_id } => {
                write!(f, "component type '{}' was registered without clone support", type_id)
            }
        }
    }
}

impl std::error::Error for FactoryError {}

/// Errors concerning system registration and the dependency graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// A system id was registered twice.
    DuplicateSystem {
        /// Offending system id.
        system_id: String,
    },

    /// An ordering or incompatibility declaration names an unknown system.
    UnknownSystem {
        /// Unresolved system id.
        system_id: String,
    },

    /// The declared ordering edges form a cycle.
    CyclicDependency,
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::DuplicateSystem { system_id } => {
                write!(f, "system registered twice: '{}'", system_id)
            }
            GraphError::UnknownSystem { system_id } => {
                write!(f, "dependency declaration names unknown system: '{}'", system_id)
            }
            GraphError::CyclicDependency => {
                f.write_str("system dependency graph contains a cycle")
            }
        }
    }
}

impl std::error::Error for GraphError {}

/// Errors raised while driving a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// A system panicked during `update`; the tick was aborted.
    SystemFailed {
        /// Id of the failing system.
        system_id: String,
    },

    /// `update` was called before `init` finalized the dependency graph.
    NotInitialized,

    /// A registration call arrived after `init` finalized the graph.
    RegistrationAfterInit,

    /// A deferred operation addressed an entity-manager key that was never
    /// registered.
    UnknownManagerKey,
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionError::SystemFailed { system_id } => {
                write!(f, "system '{}' failed; tick aborted", system_id)
            }
            ExecutionError::NotInitialized => {
                f.write_str("systems manager used before init() was called")
            }
            ExecutionError::RegistrationAfterInit => {
                f.write_str("registration attempted after init() finalized the graph")
            }
            ExecutionError::UnknownManagerKey => {
                f.write_str("deferred operation addressed an unregistered entity manager")
            }
        }
    }
}

impl std::error::Error for ExecutionError {}

/// Aggregate error for every subsystem of the engine.
///
/// `From<T>` conversions are implemented for the per-subsystem error types
/// so low-level code can write `?` (or call [`report`]) with a single,
/// expressive type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EcsError {
    /// Entity identity or liveness violation.
    Entity(EntityError),
    /// Component installation or lookup violation.
    Component(ComponentError),
    /// Component factory lookup miss.
    Factory(FactoryError),
    /// System registration or dependency graph violation.
    Graph(GraphError),
    /// Tick execution failure.
    Execution(ExecutionError),
}

impl fmt::Display for EcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcsError::Entity(e) => write!(f, "{e}"),
            EcsError::Component(e) => write!(f, "{e}"),
            EcsError::Factory(e) => write!(f, "{e}"),
            EcsError::Graph(e) => write!(f, "{e}"),
            EcsError::Execution(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for EcsError {}

impl From<EntityError> for EcsError {
    fn from(e: EntityError) -> Self { EcsError::Entity(e) }
}
impl From<ComponentError> for EcsError {
    fn from(e: ComponentError) -> Self { EcsError::Component(e) }
}
impl From<FactoryError> for EcsError {
    fn from(e: FactoryError) -> Self { EcsError::Factory(e) }
}
impl From<GraphError> for EcsError {
    fn from(e: GraphError) -> Self { EcsError::Graph(e) }
}
impl From<ExecutionError> for EcsError {
    fn from(e: ExecutionError) -> Self { EcsError::Execution(e) }
}

/// Signature of the process-wide error handler.
pub type ErrorHandler = Box<dyn Fn(&EcsError) + Send + Sync>;

static ERROR_HANDLER: RwLock<Option<ErrorHandler>> = RwLock::new(None);

/// Installs the process-wide error handler.
///
/// All subsystems route failures through the installed handler. Replacing
/// the handler mid-run is allowed; reports in flight finish against the
/// handler they observed.
pub fn set_error_handler(handler: ErrorHandler) {
    *ERROR_HANDLER.write() = Some(handler);
}

/// Removes the installed handler, restoring the panicking default.
pub fn clear_error_handler() {
    *ERROR_HANDLER.write() = None;
}

/// Reports a failure through the error surface.
///
/// With no handler installed this panics with the error's display text, so
/// invariant violations surface immediately in development builds and tests.
pub fn report(error: EcsError) {
    let guard = ERROR_HANDLER.read();
    match guard.as_ref() {
        Some(handler) => handler(&error),
        None => panic!("unhandled ECS error: {error}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn installed_handler_receives_reports() {
        let hits = Arc::new(AtomicUsize::new(0));
        let observed = hits.clone();
        set_error_handler(Box::new(move |_| {
            observed.fetch_add(1, Ordering::SeqCst);
        }));

        report(EntityError::NotFound { raw_id: 3 }.into());
        report(GraphError::CyclicDependency.into());
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        clear_error_handler();
    }

    #[test]
    fn display_messages_are_single_line() {
        let errors: Vec<EcsError> = vec![
            EntityError::Stale { raw_id: 1, recorded_version: 4, supplied_version: 3 }.into(),
            ComponentError::AlreadyPresent {
                raw_id: 2,
                type_id: ComponentTypeId::of::<u32>(),
            }
            .into(),
            FactoryError::UnknownType { type_id: ComponentTypeId::of::<u64>() }.into(),
            ExecutionError::NotInitialized.into(),
        ];
        for error in errors {
            assert!(!format!("{error}").contains('\n'));
        }
    }
}
