//! # Conductor Repository
//!
//! The durable job store.
//!
//! ```text
//! Scheduler / Distributor / Reconciler / Retry Engine
//!   ↓  Arc<dyn JobStore>
//! MySqlJobStore | InMemoryJobStore
//!   ↓
//! MySQL (migrations/ at the workspace root)
//! ```

pub mod memory;
pub mod mysql;
pub mod pool;
pub mod traits;

pub use memory::InMemoryJobStore;
pub use mysql::*;
pub use pool::*;
pub use traits::*;
