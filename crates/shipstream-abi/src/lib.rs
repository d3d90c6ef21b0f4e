//! # shipstream-abi
//!
//! Schema-driven binary codec for Antelope-family chains.
//!
//! An [`Abi`] document describes structs, variants, aliases, actions and
//! tables. A [`TypeTable`] compiles that document once and can then decode
//! serialized bytes into `serde_json::Value` trees (and encode them back).
//! The same machinery decodes the state-history wire protocol, action
//! payloads, contract table rows and binary `abi_def` blobs.
//!
//! ## Value representation
//! - structs → JSON objects, variants → `["case_name", value]`
//! - 64/128-bit integers → decimal strings
//! - `bytes` and checksums → upper-case hex
//! - `name`, `symbol`, `asset`, keys and time types → their canonical text form

pub mod abi;
pub mod buffer;
pub mod builtin;
pub mod error;
pub mod name;
pub mod types;

pub use abi::{Abi, AbiAction, AbiField, AbiStruct, AbiTable, AbiTypeDef, AbiVariant};
pub use buffer::{SerialReader, SerialWriter};
pub use builtin::Builtin;
pub use error::AbiError;
pub use name::Name;
pub use types::TypeTable;
