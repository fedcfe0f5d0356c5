//! Protocol module

pub mod config;
pub mod deflate;
pub mod extension;
pub mod frame;
pub mod message;

pub use self::{
    config::{WebSocketCompressionConfig, WebSocketConfig},
    frame::Role,
    message::Message,
};
