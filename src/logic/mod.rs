//! Logic modules: pure decisions over module metadata.
//!
//! # Modules
//!
//! - `resolver`: dependency validation (discovery-time filter, load-time ordering)

pub mod resolver;
