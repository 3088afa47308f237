use super::error::{CouchStoreError, CouchResult};

const BASE_URL_ENV: &str = "COUCH_BASE_URL";
const DATABASE_ENV: &str = "COUCH_DB";
const USERNAME_ENV: &str = "COUCH_USERNAME";
const PASSWORD_ENV: &str = "COUCH_PASSWORD";

/// Runtime configuration describing how to reach the CouchDB collection documents.
#[derive(Debug, Clone)]
pub struct CouchConfig {
    pub base_url: String,
    pub database: String,
    pub credentials: Option<(String, String)>,
}

impl CouchConfig {
    /// Construct a configuration from explicit base URL and database name.
    pub fn new(base_url: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            database: database.into(),
            credentials: None,
        }
    }

    /// Attach basic-auth credentials to the configuration.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Read the configuration from the environment.
    ///
    /// Returns `Ok(None)` when no CouchDB variable is set at all so the caller can pick
    /// another backend, and an error when the variables are only partially present.
    pub fn from_env() -> CouchResult<Option<Self>> {
        let base_url = std::env::var(BASE_URL_ENV).ok();
        let database = std::env::var(DATABASE_ENV).ok();

        let (base_url, database) = match (base_url, database) {
            (None, None) => return Ok(None),
            (Some(base_url), Some(database)) => (base_url, database),
            (None, Some(_)) => return Err(CouchStoreError::IncompleteEnv { var: BASE_URL_ENV }),
            (Some(_), None) => return Err(CouchStoreError::IncompleteEnv { var: DATABASE_ENV }),
        };

        let mut config = Self::new(base_url, database);
        if let (Ok(username), Ok(password)) =
            (std::env::var(USERNAME_ENV), std::env::var(PASSWORD_ENV))
        {
            config = config.with_credentials(username, password);
        }

        Ok(Some(config))
    }
}
