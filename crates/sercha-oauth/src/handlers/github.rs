//! GitHub OAuth App flow (the GitHub connector also accepts a PAT, which
//! bypasses this handler entirely).

use sercha_core::domain::ConnectorError;

use crate::pkce::{PkceOAuthHandler, PkceProviderConfig};

pub const AUTH_URL: &str = "https://github.com/login/oauth/authorize";
pub const TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
pub const USER_INFO_URL: &str = "https://api.github.com/user";

pub const DEFAULT_SCOPES: &[&str] = &["repo", "read:user"];

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
        account_identifier_field: "login",
        setup_hint: "Create an OAuth App under GitHub Settings > Developer \
                     settings > OAuth Apps, or use a personal access token \
                     instead if you'd rather skip the browser flow.",
        extra_auth_params: &[],
    })
}
