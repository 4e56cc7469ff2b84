// src/models/mod.rs
pub mod ride;
pub mod user;

pub use ride::*;
pub use user::*;
