use std::collections::HashMap;

use crate::error::{Result, TodoError};

pub(crate) const SERVICE_NAME: &str = "slack-todo";
const TOKEN_ENV: &str = "SLACK_TOKEN";

fn attributes(account: &str) -> HashMap<&str, &str> {
    let mut attrs = HashMap::new();
    attrs.insert("service", SERVICE_NAME);
    attrs.insert("account", account);
    attrs
}

async fn open() -> Result<oo7::Keyring> {
    oo7::Keyring::new()
        .await
        .map_err(|e| TodoError::Config(format!("Failed to connect to keyring: {}", e)))
}

/// Store the Slack token in the system keyring via Secret Service.
pub async fn store_token(account: &str, token: &str) -> Result<()> {
    let keyring = open().await?;
    keyring
        .create_item(
            &format!("Slack todo token ({})", account),
            &attributes(account),
            token.as_bytes(),
            true, // replace existing
        )
        .await
        .map_err(|e| TodoError::Config(format!("Failed to store token: {}", e)))?;
    Ok(())
}

pub async fn load_token(account: &str) -> Result<Option<String>> {
    let keyring = open().await?;
    let items = keyring
        .search_items(&attributes(account))
        .await
        .map_err(|e| TodoError::Config(format!("Failed to search keyring: {}", e)))?;

    let Some(item) = items.first() else {
        return Ok(None);
    };
    let secret = item
        .secret()
        .await
        .map_err(|e| TodoError::Config(format!("Failed to read secret: {}", e)))?;
    let token = String::from_utf8(secret.to_vec())
        .map_err(|e| TodoError::Config(format!("Invalid UTF-8 in secret: {}", e)))?;
    Ok(Some(token))
}

pub async fn delete_token(account: &str) -> Result<()> {
    let keyring = open().await?;
    let items = keyring
        .search_items(&attributes(account))
        .await
        .map_err(|e| TodoError::Config(format!("Failed to search keyring: {}", e)))?;

    for item in items {
        item.delete()
            .await
            .map_err(|e| TodoError::Config(format!("Failed to delete token: {}", e)))?;
    }
    Ok(())
}

/// Non-empty value of `SLACK_TOKEN`, if set.
pub fn token_from_env() -> Option<String> {
    std::env::var(TOKEN_ENV)
        .ok()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// The token to talk to Slack with: `SLACK_TOKEN` wins over the keyring.
pub async fn resolve_token(account: &str) -> Result<String> {
    if let Some(token) = token_from_env() {
        return Ok(token);
    }
    match load_token(account).await {
        Ok(Some(token)) => Ok(token),
        Ok(None) => Err(TodoError::Auth(format!(
            "no token found; set {} or run `todo setup --save-token`",
            TOKEN_ENV
        ))),
        Err(e) => {
            log::warn!("Keyring lookup failed: {}", e);
            Err(TodoError::Auth(format!(
                "no token available ({}); set {}",
                e, TOKEN_ENV
            )))
        }
    }
}
