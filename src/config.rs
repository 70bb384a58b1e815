use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use url::Url;

pub const APP_ID: &str = "com.certchat.CertChat";
pub const APP_NAME: &str = "CertChat";

const DEFAULT_API_URL: &str = "http://localhost:8001";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: Url,
    pub token: Option<String>,
    pub data_dir: PathBuf,
    pub request_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw_url = lookup("CERTCHAT_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let api_url = Url::parse(&raw_url)
            .with_context(|| format!("Invalid CERTCHAT_API_URL: {}", raw_url))?;
        if !matches!(api_url.scheme(), "http" | "https") {
            bail!("CERTCHAT_API_URL must be http or https, got {}", api_url.scheme());
        }

        let token = lookup("CERTCHAT_TOKEN").filter(|t| !t.trim().is_empty());

        let data_dir = match lookup("CERTCHAT_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => Self::default_data_dir(&lookup)?,
        };

        let request_timeout = match lookup("CERTCHAT_TIMEOUT_SECS") {
            Some(secs) => Duration::from_secs(
                secs.parse()
                    .with_context(|| format!("Invalid CERTCHAT_TIMEOUT_SECS: {}", secs))?,
            ),
            None => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };

        Ok(Self {
            api_url,
            token,
            data_dir,
            request_timeout,
        })
    }

    fn default_data_dir<F>(lookup: &F) -> Result<PathBuf>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base = match lookup("XDG_DATA_HOME") {
            Some(dir) => PathBuf::from(dir),
            None => {
                let home = lookup("HOME").context("HOME not set")?;
                PathBuf::from(home).join(".local/share")
            }
        };
        Ok(base.join("certchat"))
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("certchat.db")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[("HOME", "/home/tester")]).unwrap();
        assert_eq!(cfg.api_url.as_str(), "http://localhost:8001/");
        assert!(cfg.token.is_none());
        assert_eq!(cfg.db_path(), PathBuf::from("/home/tester/.local/share/certchat/certchat.db"));
        assert_eq!(cfg.request_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_overrides() {
        let cfg = config(&[
            ("CERTCHAT_API_URL", "https://api.example.com"),
            ("CERTCHAT_TOKEN", "secret"),
            ("CERTCHAT_DATA_DIR", "/tmp/cc"),
            ("CERTCHAT_TIMEOUT_SECS", "5"),
        ])
        .unwrap();
        assert_eq!(cfg.api_url.host_str(), Some("api.example.com"));
        assert_eq!(cfg.token.as_deref(), Some("secret"));
        assert_eq!(cfg.db_path(), PathBuf::from("/tmp/cc/certchat.db"));
        assert_eq!(cfg.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(config(&[("HOME", "/h"), ("CERTCHAT_API_URL", "not a url")]).is_err());
        assert!(config(&[("HOME", "/h"), ("CERTCHAT_API_URL", "ftp://x")]).is_err());
        assert!(config(&[("HOME", "/h"), ("CERTCHAT_TIMEOUT_SECS", "soon")]).is_err());
        assert!(config(&[]).is_err());
    }
}
