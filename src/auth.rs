//! Broker credential bootstrap
//!
//! The broker issues a daily access token out of band (the OAuth dance is
//! handled by a separate tool). This module only loads the app id and token
//! and formats the `app_id:token` authorization header the broker expects.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing environment variable {0}")]
    MissingVar(&'static str),
    #[error("broker credentials are empty")]
    EmptyCredentials,
}

/// Pre-issued broker credentials.
#[derive(Clone)]
pub struct BrokerCredentials {
    app_id: String,
    access_token: String,
}

impl BrokerCredentials {
    pub fn new(app_id: String, access_token: String) -> Result<Self, AuthError> {
        if app_id.trim().is_empty() || access_token.trim().is_empty() {
            return Err(AuthError::EmptyCredentials);
        }
        Ok(Self { app_id, access_token })
    }

    /// Load credentials from `BROKER_APP_ID` / `BROKER_ACCESS_TOKEN`.
    pub fn from_env() -> Result<Self, AuthError> {
        let app_id =
            std::env::var("BROKER_APP_ID").map_err(|_| AuthError::MissingVar("BROKER_APP_ID"))?;
        let access_token = std::env::var("BROKER_ACCESS_TOKEN")
            .map_err(|_| AuthError::MissingVar("BROKER_ACCESS_TOKEN"))?;
        Self::new(app_id, access_token)
    }

    /// Value for the `Authorization` header on REST calls.
    pub fn auth_header(&self) -> String {
        format!("{}:{}", self.app_id, self.access_token)
    }

    /// Token passed when opening the data stream.
    pub fn stream_token(&self) -> String {
        self.auth_header()
    }

    /// App id for display/logging - redacted.
    pub fn app_id_redacted(&self) -> String {
        if self.app_id.len() > 8 {
            format!("{}...{}", &self.app_id[..4], &self.app_id[self.app_id.len() - 4..])
        } else {
            "****".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_header_format() {
        let creds =
            BrokerCredentials::new("APP123-100".to_string(), "tokenvalue".to_string()).unwrap();
        assert_eq!(creds.auth_header(), "APP123-100:tokenvalue");
    }

    #[test]
    fn test_empty_credentials_rejected() {
        assert!(BrokerCredentials::new("".to_string(), "tok".to_string()).is_err());
        assert!(BrokerCredentials::new("app".to_string(), "  ".to_string()).is_err());
    }

    #[test]
    fn test_app_id_redacted() {
        let creds =
            BrokerCredentials::new("APP123-100XY".to_string(), "tok".to_string()).unwrap();
        let redacted = creds.app_id_redacted();
        assert!(redacted.starts_with("APP1"));
        assert!(redacted.contains("..."));
    }
}
