//! chavrusa-board/crates/cb-core/src/lib.rs
//!
//! The central domain logic and interface definitions for the board.

pub mod availability;
pub mod error;
pub mod models;
pub mod relay;
pub mod service;
pub mod traits;
pub mod validation;

// Re-exporting for easier access in other crates
pub use error::*;
pub use models::*;
pub use service::BoardService;
pub use traits::*;
