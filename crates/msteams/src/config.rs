use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Bot Framework account settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MsTeamsConfig {
    /// Microsoft App ID (bot registration client ID). Empty disables
    /// outbound authentication, which is what the local emulator expects.
    pub app_id: String,

    /// Microsoft App Password (client secret).
    #[serde(serialize_with = "serialize_secret")]
    pub app_password: Secret<String>,

    /// OAuth tenant segment for Bot Framework token issuance.
    pub oauth_tenant: String,

    /// OAuth scope for Bot Framework connector API.
    pub oauth_scope: String,

    /// Token authority base URL.
    pub login_endpoint: String,
}

impl MsTeamsConfig {
    pub fn has_credentials(&self) -> bool {
        !self.app_id.is_empty() && !self.app_password.expose_secret().is_empty()
    }

    /// `{login_endpoint}/{tenant}/oauth2/v2.0/token`
    pub fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.login_endpoint.trim_end_matches('/'),
            self.oauth_tenant
        )
    }
}

impl std::fmt::Debug for MsTeamsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MsTeamsConfig")
            .field("app_id", &self.app_id)
            .field("app_password", &"[REDACTED]")
            .field("oauth_tenant", &self.oauth_tenant)
            .field("oauth_scope", &self.oauth_scope)
            .field("login_endpoint", &self.login_endpoint)
            .finish()
    }
}

fn serialize_secret<S: serde::Serializer>(
    secret: &Secret<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

impl Default for MsTeamsConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            app_password: Secret::new(String::new()),
            oauth_tenant: "botframework.com".into(),
            oauth_scope: "https://api.botframework.com/.default".into(),
            login_endpoint: "https://login.microsoftonline.com".into(),
        }
    }
}
