pub mod chunker;
pub mod loader;
pub mod pipeline;
