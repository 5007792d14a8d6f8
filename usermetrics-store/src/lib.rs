/*!
# usermetrics-store: data store connector for user metric queries

This crate is the collaborator the metric engine talks to. It executes
parameterized queries against named store instances and returns fully drained
rows of scalar [`Value`]s.

## Key pieces

- [`StorageBackend`]: the engine-agnostic query interface (DuckDB built in)
- [`Connector`]: named instances, one fresh connection per handle
- [`ConnectionHandle`]: a scoped connection, read-only or read-write, closed on drop
- [`StoreContext`]: routing plus a lazily opened, shared read-only handle
- [`config`]: layered settings (embedded defaults, files, environment, CLI)

## Usage

```rust,no_run
use umstore_core::{Connector, StoreContext, Value};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let connector = Connector::new();
    connector
        .register("replica", Box::new(umstore_core::DuckDbBackend::new_in_memory()?))
        .await;
    let context = StoreContext::new(connector, "replica");

    let handle = context.shared().await?;
    let rows = handle.query("SELECT ? + 1", &[Value::Int(41)]).await?;
    println!("{:?}", rows);
    Ok(())
}
```
*/

pub mod config;
pub mod context;
pub mod error;
pub mod storage;

pub use context::StoreContext;
pub use error::{Result, StoreError};
pub use storage::connector::{AccessMode, ConnectionHandle, Connector};
pub use storage::duckdb::DuckDbBackend;
pub use storage::{Row, StorageBackend, Value};
