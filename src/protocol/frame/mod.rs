//! Frame module

pub mod coding;

#[allow(clippy::module_inception)]
mod frame;
mod mask;

pub use self::{
    frame::{Frame, FrameHeader, Role},
    mask::{apply_mask, generate as generate_mask},
};
