//! Domain models shared by the verifiers, the migration coordinator and the
//! HTTP layer.

pub mod auth;
pub mod migration;
