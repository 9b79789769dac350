//! Validation modules

pub mod rules;

pub use rules::{CheckKind, FileValidator, ManagedFileValidator};
