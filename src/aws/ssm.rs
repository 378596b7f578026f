//! Loads configuration from the SSM Parameter Store.
//!
//! A typical service reads `SSM_PATH` at startup, fetches every parameter
//! below that path and exports it as environment variable:
//!
//! ```rust,ignore
//! let params = ssm::parameters_from_path(&ssm::path_from_env()?).await?;
//! ssm::load_into_env(&params);
//! ```

use anyhow::Context;
use aws_sdk_ssm::Client;
use std::env;

/// A decrypted parameter with its name relative to the requested path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub value: String,
}

/// Reads the parameter path from `SSM_PATH`.
pub fn path_from_env() -> anyhow::Result<String> {
    env::var("SSM_PATH").context("No SSM_PATH provided in environment")
}

/// Fetches all parameters below `path` using the default AWS configuration.
pub async fn parameters_from_path(path: &str) -> anyhow::Result<Vec<Param>> {
    let config = aws_config::load_from_env().await;
    fetch_parameters(&Client::new(&config), path).await
}

/// Fetches all parameters below `path`, following every page.
pub async fn fetch_parameters(client: &Client, path: &str) -> anyhow::Result<Vec<Param>> {
    let mut params = Vec::new();
    let mut next_token = None;

    loop {
        let output = client
            .get_parameters_by_path()
            .path(path)
            .with_decryption(true)
            .set_next_token(next_token)
            .send()
            .await
            .with_context(|| format!("Failed to fetch SSM parameters below '{}'", path))?;

        for parameter in output.parameters.unwrap_or_default() {
            params.push(Param {
                name: strip_path(parameter.name().unwrap_or_default(), path),
                value: parameter.value().unwrap_or_default().to_string(),
            });
        }

        match output.next_token {
            Some(token) if !token.is_empty() => next_token = Some(token),
            _ => break,
        }
    }

    tracing::info!(path, count = params.len(), "Loaded parameters from SSM");

    Ok(params)
}

/// Removes the first occurrence of `path` and any leading slashes from `name`.
pub fn strip_path(name: &str, path: &str) -> String {
    let name = if path.is_empty() {
        name.to_string()
    } else {
        name.replacen(path, "", 1)
    };

    name.trim_start_matches('/').to_string()
}

/// Exports every parameter as environment variable.
///
/// Call this during startup, before any other threads are spawned.
pub fn load_into_env(params: &[Param]) {
    for param in params {
        tracing::debug!(name = %param.name, "Exporting SSM parameter");
        unsafe {
            env::set_var(&param.name, &param.value);
        }
    }
}
