//! Rocket server for single-image chat completions.
//!
//! The binary in this crate registers no backbones. A deployment links its
//! decoder implementations through [`BackboneRegistry`] and calls [`run`]:
//!
//! ```no_run
//! use clap::Parser;
//! use vision_chat_server::{Args, BackboneRegistry, run};
//!
//! #[rocket::main]
//! async fn main() -> anyhow::Result<()> {
//!     vision_chat_server::logging::init();
//!     let mut registry = BackboneRegistry::new();
//!     // registry.register("my-decoder", my_decoder::load);
//!     run(Args::parse(), registry).await
//! }
//! ```

#[macro_use]
extern crate rocket;

pub mod app;
pub mod args;
pub mod cors;
pub mod error;
pub mod generation;
pub mod logging;
pub mod models;
pub mod routes;
pub mod state;
#[cfg(test)]
mod testing;

pub use app::{build_rocket, load_state, run, server_figment};
pub use args::Args;
pub use state::AppState;
pub use vision_chat_core::BackboneRegistry;
