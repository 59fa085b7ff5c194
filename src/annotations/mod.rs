//! Map annotations: which elements the viewport shows and how they look.

mod manager;
mod symbols;

pub use manager::{
    is_visible, recompute, AnnotationToken, Delta, RenderedSet, ViewportAnnotationManager,
    CLUSTER_BOOSTED, CLUSTER_DEFAULT, DEFAULT_CUTOFF_MILES,
};
pub use symbols::{resolve_symbol, DEFAULT_SYMBOL};
