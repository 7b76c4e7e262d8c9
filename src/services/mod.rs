pub mod cache;
pub mod embedding;
pub mod entitlement;
pub mod feedback;
pub mod kafka;
pub mod preference;
pub mod recommendation;
pub mod refiner;
pub mod storage;
pub mod sync;
pub mod vector_db;
