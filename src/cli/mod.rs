//! Command-line front end.

mod app;
mod args;

pub use app::App;
pub use args::Cli;
