//! Tunables for the tunnel manager, loaded from TOML.
//!
//! The manager itself is configuration-free: everything it needs (which
//! SSH binary to spawn, which rule tool to invoke, timing) arrives
//! through a [`Settings`] value. [`SettingsLoader`] builds one from the
//! system file and the user file, with user scalars overriding.

mod error;
mod loader;
mod schema;

pub use error::SettingsError;
pub use loader::{SettingsLoader, SYSTEM_SETTINGS_PATH, USER_SETTINGS_DIR, USER_SETTINGS_FILE};
pub use schema::Settings;
