use std::{env, path::PathBuf};

use crate::config::DEFAULT_SANDCORE_HOME;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Environment variable that overrides the sandcore home directory.
pub const SANDCORE_HOME_ENV_VAR: &str = "SANDCORE_HOME";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Loads variables from a `.env` file in the working directory or its parents, if there is one.
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!("loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!("failed to load .env file: {}", e),
    }
}

/// Returns the home directory from `SANDCORE_HOME`, or the default if it is not set.
pub fn get_sandcore_home_path() -> PathBuf {
    match env::var(SANDCORE_HOME_ENV_VAR) {
        Ok(home) if !home.is_empty() => PathBuf::from(home),
        _ => {
            tracing::debug!(
                "{} is not set, using default: {}",
                SANDCORE_HOME_ENV_VAR,
                DEFAULT_SANDCORE_HOME.display()
            );
            DEFAULT_SANDCORE_HOME.clone()
        }
    }
}
