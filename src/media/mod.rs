// SPDX-License-Identifier: GPL-3.0-only

//! Frame and drawing-surface types shared by sources, effects and sinks

pub mod frame;
pub mod surface;

pub use frame::{Frame, FrameLedger, Picture};
pub use surface::RenderSurface;
