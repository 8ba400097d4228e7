#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::map_unwrap_or,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::redundant_closure_for_method_calls,
    clippy::similar_names,
    clippy::single_match_else,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

pub mod analyzer;
pub mod bot;
pub mod collector;
pub mod config;
pub mod directory;
pub mod providers;
pub mod related;
pub mod summarizer;
pub mod transport;
pub mod util;

pub use config::Config;
