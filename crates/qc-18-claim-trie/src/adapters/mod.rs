pub mod memory_cache;
pub mod memory_db;

pub use memory_cache::*;
pub use memory_db::*;
