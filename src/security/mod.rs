//! Security module
//!
//! API key storage for the evaluator and refiner backends.

pub mod keyring;

use anyhow::Result;

/// Store the API key in the OS keyring (file fallback)
pub fn set_api_key(key: &str) -> Result<()> {
    keyring::set_api_key(key)
}

/// Resolve the API key, checking `env_var` first
pub fn get_api_key(env_var: &str) -> Result<String> {
    keyring::get_api_key(env_var)
}

pub fn delete_api_key() -> Result<()> {
    keyring::delete_api_key()
}

pub fn has_api_key(env_var: &str) -> bool {
    keyring::has_api_key(env_var)
}
