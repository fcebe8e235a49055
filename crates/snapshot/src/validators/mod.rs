//! Semantic validators layered on top of schema validation.

mod composition;
mod meta;
mod xrd;

pub use composition::CompositionValidator;
pub use meta::MetaValidator;
pub use xrd::{clean_field_path, XrdValidator};
