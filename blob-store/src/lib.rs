pub mod error;
pub mod local;
pub mod memory;
pub mod store;

pub use error::StoreError;
pub use local::LocalDirStore;
pub use memory::MemoryStore;
pub use store::{Download, ListPage, ListRequest, ObjectEntry, ObjectStore};
