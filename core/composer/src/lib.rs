pub mod api;
pub mod composer;
pub mod config;
pub mod templates;

pub use api::{router, AppState};
pub use composer::{
    sources_from, Composer, ResponseGenerator, NOTHING_FOUND_MESSAGE, TROUBLE_PROCESSING_MESSAGE,
};
pub use config::ComposerConfig;
pub use templates::TemplateRenderer;
