//! Data carried between the facades and the backend.
//!
//! Records are owned by the remote service; these types only describe the
//! fields the storefront reads or writes and serialize as the JSON the
//! backend speaks.

pub mod product;
pub mod session;
pub mod upload;
