//! API handlers module

pub mod chat;
pub mod collections;
pub mod health;
