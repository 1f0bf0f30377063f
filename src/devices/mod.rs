// devices/mod.rs
mod catalog;
mod state;

pub use catalog::Catalog;
pub use state::BulbStateStore;
