pub mod params;
pub mod schema;

pub use params::Params;
pub use schema::{
    AgentConfig, BrowserConfig, Config, ModelConfig, PromptConfig, SessionConfig, Size,
    StorageConfig,
};
