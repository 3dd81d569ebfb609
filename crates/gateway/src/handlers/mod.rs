//! API handlers module

pub mod admin;
pub mod authors;
pub mod health;
pub mod publications;
