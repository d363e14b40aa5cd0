// src/api/mod.rs
pub mod convert;
pub mod defaults;
pub mod internal;
pub mod scheme;
pub mod v1alpha1;
pub mod v1beta2;

pub use scheme::{new_registry, GroupVersionKind, InternalDocument, Registry};
