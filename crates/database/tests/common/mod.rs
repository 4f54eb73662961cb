//! Common test utilities and fixtures.

pub mod database;
pub mod tracked;

#[allow(unused_imports)]
pub use database::*;
#[allow(unused_imports)]
pub use tracked::*;
