pub mod models;
pub mod pool;
pub mod queries;
pub mod store;
