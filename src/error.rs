//! Error types for the module runtime.

use std::fmt;

/// Errors the runtime raises or reports.
///
/// Most variants correspond to programming errors and are returned directly
/// to the caller. Errors raised inside a module's `prepare`/`start`/`stop`
/// body are *not* returned this way — they are captured into the owning
/// tree's exception list instead (see [`crate::ModuleHandle::exceptions`]).
///
/// # Examples
///
/// ```rust
/// use modtree::CoreError;
///
/// let e = CoreError::Timeout { what: "borrow".into() };
/// println!("{e}");
/// ```
#[derive(Debug, Clone)]
pub enum CoreError {
    /// Operation on a module whose base initializer was never invoked.
    ///
    /// The originating check (`_check_init`) guarded against a subclass
    /// author forgetting to call the base constructor before using a
    /// module. `ModuleHandle` has no such construction path — every
    /// instance is produced fully formed by [`crate::ModuleHandle::new_root`]
    /// or the tree-building helpers, so this variant can never actually be
    /// constructed here; it is kept for parity with the error table and for
    /// embedders that want to match on it exhaustively.
    NotInitialized { path: String },
    /// `add_module` with a name that already exists among the node's children.
    DuplicateName { parent: String, name: String },
    /// Descriptor node lacks a `type` and was not declared in code.
    UnknownType { path: String },
    /// A string module reference could not be resolved to a registered factory.
    Resolve { reference: String },
    /// A user module constructor/factory returned an error.
    InstantiationFailed { path: String, message: String },
    /// A second value was registered under a type identity already occupied
    /// in the same [`crate::Context`].
    Duplicate { type_name: &'static str },
    /// `put`/`get`/`add_teardown_callback` on a closed [`crate::Context`].
    Closed,
    /// `unwrap()` called on a [`crate::BorrowToken`] that was already dropped.
    AlreadyDropped,
    /// A phase, borrow, freed, or close deadline elapsed.
    Timeout { what: String },
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::NotInitialized { path } => {
                write!(f, "module not initialized: {path}")
            }
            CoreError::DuplicateName { parent, name } => {
                write!(f, "duplicate child name {name:?} under module {parent}")
            }
            CoreError::UnknownType { path } => {
                write!(f, "descriptor node {path} has no type and is not declared in code")
            }
            CoreError::Resolve { reference } => {
                write!(f, "could not resolve module reference {reference:?}")
            }
            CoreError::InstantiationFailed { path, message } => {
                write!(f, "constructing module {path} failed: {message}")
            }
            CoreError::Duplicate { type_name } => {
                write!(f, "a value of type {type_name} is already published in this context")
            }
            CoreError::Closed => write!(f, "context is closed"),
            CoreError::AlreadyDropped => write!(f, "borrow token already dropped"),
            CoreError::Timeout { what } => write!(f, "timed out: {what}"),
        }
    }
}

impl std::error::Error for CoreError {}

/// Result type used throughout the runtime.
pub type CoreResult<T> = Result<T, CoreError>;
