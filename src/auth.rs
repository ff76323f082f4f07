//! Auth-domain identifiers, role sets, token claims, verification, and issuance.

pub mod id;
pub mod issuer;
pub mod principal;
pub mod role;
pub mod token;
pub mod verifier;

pub use id::*;
pub use issuer::*;
pub use principal::*;
pub use role::*;
pub use token::{claims::*, secret::*};
pub use verifier::*;
