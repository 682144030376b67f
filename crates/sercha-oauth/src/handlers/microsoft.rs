//! Microsoft identity platform OAuth (OneDrive, Outlook, MS-Cal share one app).

use sercha_core::domain::ConnectorError;

use crate::pkce::{PkceOAuthHandler, PkceProviderConfig};

pub const AUTH_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/authorize";
pub const TOKEN_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/token";
pub const USER_INFO_URL: &str = "https://graph.microsoft.com/v1.0/me";

pub const DEFAULT_SCOPES: &[&str] = &[
    "offline_access",
    "Files.Read.All",
    "Mail.Read",
    "Calendars.Read",
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
        account_identifier_field: "userPrincipalName",
        setup_hint: "Register an app in the Azure Portal (Azure Active \
                     Directory > App registrations) with Files.Read.All, \
                     Mail.Read, and Calendars.Read delegated permissions.",
        extra_auth_params: &[],
    })
}
