use crate::{SecurityError, SessionStore};
use cove_core::{SavedSession, SessionKey};

/// Saved sessions kept as JSON in the OS keychain, one entry per
/// login and API origin.
#[derive(Debug, Clone)]
pub struct KeychainSessionStore {
    service_name: String,
}

impl KeychainSessionStore {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    fn entry(&self, key: &SessionKey) -> Result<keyring::Entry, SecurityError> {
        Ok(keyring::Entry::new(&self.service_name, &key.as_username())?)
    }
}

impl SessionStore for KeychainSessionStore {
    fn get_session(&self, key: &SessionKey) -> Result<Option<SavedSession>, SecurityError> {
        match self.entry(key)?.get_password() {
            Ok(secret) => Ok(Some(serde_json::from_str(&secret)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn save_session(&self, session: &SavedSession) -> Result<(), SecurityError> {
        let key = SessionKey {
            login: session.login.clone(),
            api_endpoint_origin: session.api_endpoint_origin.clone(),
        };
        self.entry(&key)?
            .set_password(&serde_json::to_string(session)?)?;
        Ok(())
    }

    fn clear_session(&self, key: &SessionKey) -> Result<(), SecurityError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
