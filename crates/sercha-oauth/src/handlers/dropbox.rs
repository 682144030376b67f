//! Dropbox OAuth.

use sercha_core::domain::ConnectorError;

use crate::pkce::{PkceOAuthHandler, PkceProviderConfig};

pub const AUTH_URL: &str = "https://www.dropbox.com/oauth2/authorize";
pub const TOKEN_URL: &str = "https://api.dropboxapi.com/oauth2/token";
pub const USER_INFO_URL: &str = "https://api.dropboxapi.com/2/users/get_current_account";

pub const DEFAULT_SCOPES: &[&str] = &["files.metadata.read", "files.content.read"];

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
        setup_hint: "Create an app at the Dropbox App Console with the \
                     files.metadata.read and files.content.read scopes.",
        extra_auth_params: &[],
    })
}
