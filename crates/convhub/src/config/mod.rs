pub mod loader;
pub mod schema;

pub use loader::{default_settings, load_settings, load_settings_from_str};
pub use schema::{ConverterSettings, LogSettings, Settings};
