//! Error types for operations that fail before they ever reach a
//! diagnostic-worthy semantic check -- malformed caller input, not user
//! source errors. Semantic errors proper go through `DiagnosticEngine` and
//! return `None`, per the null-propagation policy; these are for "this
//! shouldn't happen unless the caller misused the API."

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unsupported integer width {0}, expected one of 1, 8, 16, 32, 64")]
    UnsupportedWidth(u32),

    #[error("type `{0}` is already declared")]
    TypeAlreadyDeclared(String),

    #[error("template `{0}` expects {expected} argument(s), found {found}", expected = .expected, found = .found)]
    TemplateArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("`{0}` is not a template")]
    NotATemplate(String),

    #[error("module `{0}` was not found on any import path")]
    ModuleNotFound(String),

    #[error("import of `{0}` forms a cycle")]
    CircularImport(String),
}

#[derive(Debug, Error)]
pub enum CastError {
    #[error("cannot cast between composite types `{from}` and `{to}`")]
    CompositeCast { from: String, to: String },

    #[error("cannot cast non-pointer type `{0}` to a pointer type")]
    NonPointerToPointer(String),

    #[error("pointer cast from `{from}` to `{to}` violates pointee compatibility")]
    PointerCastPolicy { from: String, to: String },

    #[error("vector cast requires matching element counts, found {from} and {to}")]
    VecSizeMismatch { from: usize, to: usize },

    #[error("cannot cast to enum type `{0}`")]
    CastToEnum(String),
}

#[derive(Debug, Error)]
pub enum ModuleLoadError {
    #[error("file `{0}` could not be read")]
    Io(String),
    #[error("file `{0}` was already loaded; skipping")]
    AlreadyLoaded(String),
}
