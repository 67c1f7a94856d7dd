pub mod entities;
pub mod errors;
pub mod normalization;
pub mod params;
pub mod queue;
pub mod undo;

pub use entities::*;
pub use errors::*;
pub use normalization::*;
pub use params::*;
pub use queue::*;
pub use undo::*;
