//! Wire types shared between the host and the plugins

pub mod chat;
