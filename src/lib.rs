//! Browser task recording with viewport-relative element resolution.
//!
//! The geometry core runs against the [`dom::DomHost`] seam; [`browser`]
//! implements it over the Chrome DevTools Protocol and [`service`] exposes
//! replay helpers and live recording as an FGP daemon.

pub mod browser;
pub mod config;
pub mod dom;
pub mod error;
pub mod geometry;
pub mod models;
pub mod recording;
pub mod service;

pub use error::{ResolveError, ResolveResult};
