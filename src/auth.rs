//! Identity-domain identifiers, opaque access tokens, and unverified claim extraction.

pub mod claims;
pub mod id;
pub mod token;

pub use claims::*;
pub use id::*;
pub use token::*;
