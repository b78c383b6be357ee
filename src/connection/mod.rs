//! Connection string construction for the managed Cosmos DB (MongoDB vCore) store.


use secrecy::{ExposeSecret, SecretString};
use url::form_urlencoded;

use crate::{RagError, Result};

const COSMOS_HOST_SUFFIX: &str = "mongocluster.cosmos.azure.com";
const COSMOS_OPTIONS: &str =
    "tls=true&authMechanism=SCRAM-SHA-256&retrywrites=false&maxIdleTimeMS=120000";

/// Builds the `mongodb+srv` URI for a Cosmos DB vCore cluster.
///
/// The result embeds the password, so it is returned as a [`SecretString`] and
/// must never be printed or logged.
#[derive(Debug, Default)]
pub struct ConnectionStringBuilder<'a> {
    username: Option<&'a str>,
    password: Option<&'a SecretString>,
    resource_name: Option<&'a str>,
}

impl<'a> ConnectionStringBuilder<'a> {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn username(mut self, username: &'a str) -> Self {
        self.username = Some(username);
        self
    }

    #[inline]
    pub fn password(mut self, password: &'a SecretString) -> Self {
        self.password = Some(password);
        self
    }

    #[inline]
    pub fn resource_name(mut self, resource_name: &'a str) -> Self {
        self.resource_name = Some(resource_name);
        self
    }

    /// Percent-encode the credentials and assemble the URI.
    ///
    /// Fails with [`RagError::MissingCredential`] when any part is unset or empty.
    #[inline]
    pub fn build(&self) -> Result<SecretString> {
        let username = required(self.username, "username")?;
        let password = required(
            self.password.map(|secret| secret.expose_secret().as_str()),
            "password",
        )?;
        let resource_name = required(self.resource_name, "resource name")?;

        Ok(SecretString::new(format!(
            "mongodb+srv://{}:{}@{}.{}/?{}",
            encode_component(username),
            encode_component(password),
            resource_name,
            COSMOS_HOST_SUFFIX,
            COSMOS_OPTIONS
        )))
    }
}

/// Form-urlencode a credential: space becomes `+`, reserved characters are escaped
#[inline]
pub fn encode_component(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

fn required<'v>(value: Option<&'v str>, name: &str) -> Result<&'v str> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(RagError::MissingCredential(name.to_string())),
    }
}
