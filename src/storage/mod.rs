pub mod pool;
pub mod schema;
pub mod sqlite;

pub use pool::{ConnectionPool, PooledConnection};
pub use sqlite::{EventTable, StoredEvent};
