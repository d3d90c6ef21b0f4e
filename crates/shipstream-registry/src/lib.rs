//! # shipstream-registry
//!
//! Historical ABI cache for ShipStream.
//!
//! ## Pieces
//! 1. **[`LocalAbiProvider`]**: per-account ABI history keyed by block number,
//!    fed by on-chain `setabi` actions and lazily by a schema source
//! 2. **[`StaticSchemaSource`]**: in-memory source for tests and replays
//! 3. **`RpcSchemaSource`**: chain API client (`remote` feature)
//!
//! The public-facing API is the `AbiProvider` trait from `shipstream-core`.

pub mod local;
#[cfg(feature = "remote")]
pub mod remote;
pub mod source;

pub use local::LocalAbiProvider;
pub use source::StaticSchemaSource;

#[cfg(feature = "remote")]
pub use remote::RpcSchemaSource;
