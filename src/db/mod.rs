// controller-restore/src/db/mod.rs
pub(crate) mod mongo_shell;

pub use mongo_shell::MongoShellDatabase;
