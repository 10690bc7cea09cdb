pub mod store;

pub use store::{AuditEntry, AuditLog, BlockStore, MemoryStore, StoreError, ValidatorTable};
