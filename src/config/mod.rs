pub mod schema;

pub use schema::{AnalysisConfig, Config, DiscordConfig};
