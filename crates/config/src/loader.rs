use std::{collections::HashSet, fmt::Write, path::Path, sync::LazyLock};

use regex::{Captures, Regex};
use secrecy::ExposeSecret;
use serde::Deserialize;
use toml::Value;

use crate::{ChannelType, Config, error::Error};

static ENV_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*env\.([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder pattern should be valid")
});

pub fn load<P: AsRef<Path>>(path: P) -> crate::Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())?;
    let mut raw_config: Value = toml::from_str(&content)?;

    expand_env_vars(&mut Vec::new(), &mut raw_config)?;

    let config = Config::deserialize(raw_config)?;
    validate_channels(&config)?;

    if config.channels.is_empty() {
        log::warn!("No channels configured, every relay request will be rejected");
    }

    Ok(config)
}

fn expand_env_vars<'a>(path: &mut Vec<Result<&'a str, usize>>, value: &'a mut Value) -> crate::Result<()> {
    match value {
        Value::String(s) => {
            if !ENV_PLACEHOLDER.is_match(s) {
                return Ok(());
            }

            let mut missing = None;

            let expanded = ENV_PLACEHOLDER.replace_all(s, |caps: &Captures<'_>| match std::env::var(&caps[1]) {
                Ok(value) => value,
                Err(_) => {
                    missing.get_or_insert_with(|| caps[1].to_string());
                    String::new()
                }
            });

            if let Some(name) = missing {
                return Err(Error::EnvVarSubstitution {
                    path: render_path(path),
                    reason: format!("environment variable `{name}` is not set"),
                });
            }

            *s = expanded.into_owned();
        }
        Value::Array(values) => {
            for (i, value) in values.iter_mut().enumerate() {
                path.push(Err(i));
                expand_env_vars(path, value)?;
                path.pop();
            }
        }
        Value::Table(map) => {
            for (key, value) in map {
                path.push(Ok(key.as_str()));
                expand_env_vars(path, value)?;
                path.pop();
            }
        }
        Value::Integer(_) | Value::Float(_) | Value::Boolean(_) | Value::Datetime(_) => (),
    }

    Ok(())
}

fn render_path(path: &[Result<&str, usize>]) -> String {
    let mut p = String::new();

    for segment in path {
        match segment {
            Ok(s) => {
                p.push_str(s);
                p.push('.');
            }
            Err(i) => {
                if p.ends_with('.') {
                    p.pop();
                }

                let _ = write!(p, "[{i}].");
            }
        }
    }

    if p.ends_with('.') {
        p.pop();
    }

    p
}

pub(crate) fn validate_channels(config: &Config) -> crate::Result<()> {
    let mut seen = HashSet::new();

    for channel in &config.channels {
        if !seen.insert(channel.id) {
            return Err(Error::Validation(format!("channel id {} is used more than once", channel.id)));
        }

        if channel.name.trim().is_empty() {
            return Err(Error::Validation(format!("channel {} has an empty name", channel.id)));
        }

        if channel.r#type == ChannelType::Custom && channel.base_url.is_none() {
            return Err(Error::Validation(format!(
                "channel '{}' is of type custom and needs a base_url",
                channel.name
            )));
        }

        if channel.r#type == ChannelType::Bedrock {
            let parts = channel.key.expose_secret().split('|').count();

            if !(3..=4).contains(&parts) {
                return Err(Error::Validation(format!(
                    "bedrock channel '{}' expects a key of the form region|access_key_id|secret_access_key[|session_token]",
                    channel.name
                )));
            }
        }

        if channel.r#type == ChannelType::VertexAI && channel.key.expose_secret().split('|').count() != 3 {
            return Err(Error::Validation(format!(
                "vertexai channel '{}' expects a key of the form location|project_id|access_token",
                channel.name
            )));
        }
    }

    Ok(())
}
