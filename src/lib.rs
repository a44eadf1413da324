pub mod config;
pub mod error;
pub mod lexer;
pub mod model;
pub mod parser;
pub mod playback;
pub mod semantic;
pub mod tree;

pub use config::Config;
pub use error::*;
pub use model::*;
pub use parser::parse;
pub use playback::SoundEventTable;
pub use semantic::{analyse, Analysis};
pub use tree::{Locator, Node, NodeKind};

/// Parse and analyse LDP source text with the default configuration.
/// This is the main entry point for the library.
pub fn compile(source: &str) -> Result<Analysis, ScoreError> {
    compile_with_config(source, &Config::default())
}

/// Parse and analyse LDP source text.
pub fn compile_with_config(source: &str, config: &Config) -> Result<Analysis, ScoreError> {
    let tree = parse(source)?;
    analyse(&tree, config)
}
