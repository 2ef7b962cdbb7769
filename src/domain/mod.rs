//! Domain layer types and invariants.

pub mod signature;

pub use signature::{ContentIdentity, RequestSignature, SignatureError};
