mod accounts;
pub mod db;
mod groups;
mod keys;
pub mod keystore;
pub mod models;
mod permissions;
mod tables;

pub use db::{Database, DatabaseError};
pub use keystore::KeyStore;
pub use tables::*;
