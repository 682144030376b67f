//! Google OAuth (Drive, Gmail, Calendar share one app registration).

use sercha_core::domain::ConnectorError;

use crate::pkce::{PkceOAuthHandler, PkceProviderConfig};

pub const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const USER_INFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

pub const DEFAULT_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/drive.readonly",
    "https://www.googleapis.com/auth/gmail.readonly",
    "https://www.googleapis.com/auth/calendar.readonly",
];

pub fn build(
    client_id: String,
    client_secret: String,
    redirect_uri: String,
) -> Result<PkceOAuthHandler, ConnectorError> {
    PkceOAuthHandler::new(PkceProviderConfig {
        client_id,
        client_secret,
        auth_url: AUTH_URL.to_string(),
        token_url: TOKEN_URL.to_string(),
        user_info_url: USER_INFO_URL.to_string(),
        redirect_uri,
        scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
        account_identifier_field: "email",
        setup_hint: "Create an OAuth client in the Google Cloud Console \
                     (APIs & Services > Credentials) and enable the Drive, \
                     Gmail, and Calendar APIs for the project.",
        // Without these Google only returns a refresh token on the very
        // first consent; forcing offline+consent keeps refresh working
        // across repeated authorizations.
        extra_auth_params: &[("access_type", "offline"), ("prompt", "consent")],
    })
}
