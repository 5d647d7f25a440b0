//! Pure string primitives used by resolution and cleanup.
//!
//! # Responsibility
//! - Canonicalize raw names for comparison (`normalize`).
//! - Score name similarity with token-order-insensitive edit similarity.
//! - Classify obvious non-entities and noise names.
//!
//! # Invariants
//! - Everything in this module is deterministic and side-effect free.

pub mod noise;
pub mod normalize;
pub mod similarity;
pub mod titles;

pub use normalize::{normalize, NormalForm};
pub use similarity::token_sort_ratio;
