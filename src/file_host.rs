//! Authenticated file host.
//!
//! Resource files sit behind a form login. One login per reconciliation
//! run establishes a session cookie; downloads are plain GETs on the same
//! cookie-carrying client.

use std::time::Duration;

use async_trait::async_trait;
use dataset_search_core::{Error, Result};

/// Form credentials for the file host.
#[derive(Clone)]
pub struct LoginCredentials {
    pub username: String,
    pub password: String,
    pub form_build_id: String,
}

impl std::fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .field("form_build_id", &self.form_build_id)
            .finish()
    }
}

impl LoginCredentials {
    /// Read `CATALOGUE_USERNAME`, `CATALOGUE_PASSWORD` and
    /// `CATALOGUE_FORM_BUILD_ID`. `None` when username or password is unset;
    /// the form token may be empty.
    pub fn from_env() -> Option<Self> {
        let username = std::env::var("CATALOGUE_USERNAME").ok()?;
        let password = std::env::var("CATALOGUE_PASSWORD").ok()?;
        Some(Self {
            username,
            password,
            form_build_id: std::env::var("CATALOGUE_FORM_BUILD_ID").unwrap_or_default(),
        })
    }

    /// The fixed login form field set.
    pub fn form_fields(&self) -> [(&'static str, &str); 5] {
        [
            ("name", self.username.as_str()),
            ("pass", self.password.as_str()),
            ("form_build_id", self.form_build_id.as_str()),
            ("form_id", "user_login"),
            ("op", "Log in"),
        ]
    }
}

#[async_trait]
pub trait FileHost: Send + Sync {
    /// Establish an authenticated session. Failure is [`Error::Auth`].
    async fn login(&self, credentials: &LoginCredentials) -> Result<()>;

    /// Download one resource. Failure is [`Error::Fetch`].
    async fn download(&self, url: &str) -> Result<Vec<u8>>;
}

pub struct HttpFileHost {
    client: reqwest::Client,
    login_url: String,
}

impl HttpFileHost {
    pub fn new(login_url: &str, timeout_secs: u64) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            login_url: login_url.to_string(),
        })
    }
}

#[async_trait]
impl FileHost for HttpFileHost {
    async fn login(&self, credentials: &LoginCredentials) -> Result<()> {
        tracing::debug!(url = %self.login_url, user = %credentials.username, "logging in to file host");
        let response = self
            .client
            .post(&self.login_url)
            .form(&credentials.form_fields())
            .send()
            .await
            .map_err(|e| Error::Auth(format!("login request to {} failed: {}", self.login_url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Auth(format!(
                "login to {} returned HTTP {}",
                self.login_url, status
            )));
        }
        Ok(())
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::fetch(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::fetch(url, format!("HTTP {}", status)));
        }

        let bytes = response.bytes().await.map_err(|e| Error::fetch(url, e))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_form_fields() {
        let creds = LoginCredentials {
            username: "analyst".into(),
            password: "s3cret".into(),
            form_build_id: "form-abc".into(),
        };
        let fields = creds.form_fields();
        assert_eq!(fields[0], ("name", "analyst"));
        assert_eq!(fields[1], ("pass", "s3cret"));
        assert_eq!(fields[2], ("form_build_id", "form-abc"));
        assert_eq!(fields[3], ("form_id", "user_login"));
        assert_eq!(fields[4], ("op", "Log in"));
    }

    #[test]
    fn test_debug_hides_password() {
        let creds = LoginCredentials {
            username: "analyst".into(),
            password: "s3cret".into(),
            form_build_id: String::new(),
        };
        let printed = format!("{:?}", creds);
        assert!(printed.contains("analyst"));
        assert!(!printed.contains("s3cret"));
    }
}
