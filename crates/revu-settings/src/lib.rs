//! # revu-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** ([`RevuSettings::default()`])
//! 2. **User file** (`~/.revu/settings.json`, deep-merged over defaults)
//! 3. **Environment variables** (`REVU_*` overrides, highest priority)

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings_from_path, settings_path};
pub use types::*;
