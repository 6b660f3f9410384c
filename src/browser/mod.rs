//! Chrome DevTools backend.

pub mod client;
pub mod host;
pub mod scripts;
pub mod surface;

pub use client::{BrowserClient, CaptureStream};
pub use host::CdpHost;
pub use surface::BrowserSurface;
