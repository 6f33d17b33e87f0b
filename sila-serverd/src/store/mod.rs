pub mod db;

pub use db::{IdentityStore, StoredIdentity};
