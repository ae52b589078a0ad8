//! Keyring integration for the evaluator API key
//! Falls back to file storage if keyring is unavailable

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

const SERVICE_NAME: &str = "news-select";
const API_KEY_USERNAME: &str = "llm-api-key";
const API_KEY_FILE: &str = "api_key.txt";

/// Get the path for the fallback API key file
fn api_key_file_path() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "news-select", "news-select")
        .context("Failed to get project directories")?;
    let dir = base.config_dir();
    fs::create_dir_all(dir).context("Failed to create config directory")?;
    Ok(dir.join(API_KEY_FILE))
}

/// Set API key - tries keyring first, falls back to file
pub fn set_api_key(key: &str) -> Result<()> {
    if let Ok(entry) = keyring::Entry::new(SERVICE_NAME, API_KEY_USERNAME) {
        if entry.set_password(key).is_ok() {
            // Also save to file as backup in case keyring retrieval fails
            let _ = save_to_file(key);
            return Ok(());
        }
    }

    save_to_file(key)?;
    println!("Note: Using file-based storage (keyring unavailable)");
    Ok(())
}

fn save_to_file(key: &str) -> Result<()> {
    let path = api_key_file_path()?;
    fs::write(&path, key).context("Failed to write API key file")?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))
            .context("Failed to set file permissions")?;
    }

    Ok(())
}

fn from_env(env_var: &str) -> Option<String> {
    std::env::var(env_var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Get API key - environment variable, then keyring, then file
pub fn get_api_key(env_var: &str) -> Result<String> {
    if let Some(key) = from_env(env_var) {
        return Ok(key);
    }

    if let Ok(entry) = keyring::Entry::new(SERVICE_NAME, API_KEY_USERNAME) {
        if let Ok(key) = entry.get_password() {
            return Ok(key);
        }
    }

    let path = api_key_file_path()?;
    let key = fs::read_to_string(&path).with_context(|| {
        format!(
            "No API key found. Set {} or run 'news-select config set-api-key YOUR_KEY' first.",
            env_var
        )
    })?;
    Ok(key.trim().to_string())
}

/// Delete API key from both keyring and file
pub fn delete_api_key() -> Result<()> {
    if let Ok(entry) = keyring::Entry::new(SERVICE_NAME, API_KEY_USERNAME) {
        let _ = entry.delete_credential();
    }

    let path = api_key_file_path()?;
    if path.exists() {
        fs::remove_file(&path).context("Failed to delete API key file")?;
    }

    Ok(())
}

/// Check if an API key is available from any source
pub fn has_api_key(env_var: &str) -> bool {
    if from_env(env_var).is_some() {
        return true;
    }

    if let Ok(entry) = keyring::Entry::new(SERVICE_NAME, API_KEY_USERNAME) {
        if entry.get_password().is_ok() {
            return true;
        }
    }

    if let Ok(path) = api_key_file_path() {
        if path.exists() {
            return true;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_takes_precedence() {
        std::env::set_var("NEWS_SELECT_TEST_KEY_PRESENT", "  sk-test  ");
        assert_eq!(get_api_key("NEWS_SELECT_TEST_KEY_PRESENT").unwrap(), "sk-test");
        assert!(has_api_key("NEWS_SELECT_TEST_KEY_PRESENT"));
    }

    #[test]
    fn test_blank_environment_value_ignored() {
        std::env::set_var("NEWS_SELECT_TEST_KEY_BLANK", "   ");
        assert!(from_env("NEWS_SELECT_TEST_KEY_BLANK").is_none());
    }
}
