//! Bearer token wrappers and the claim schema they carry.

pub mod claims;
pub mod secret;
