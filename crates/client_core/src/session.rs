use shared::domain::UserId;
use url::Url;

/// Authenticated session passed to every collaborator at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub user_id: UserId,
    pub access_token: String,
    pub api_base_url: Url,
    pub ws_url: Url,
}

impl SessionContext {
    pub fn new(
        user_id: UserId,
        access_token: impl Into<String>,
        api_base_url: Url,
        ws_url: Url,
    ) -> Self {
        Self {
            user_id,
            access_token: access_token.into(),
            api_base_url,
            ws_url,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        !self.access_token.trim().is_empty()
    }

    pub fn is_local_user(&self, user_id: &UserId) -> bool {
        &self.user_id == user_id
    }

    /// `{api_base_url}/{path}` without doubling slashes.
    pub fn api_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.api_base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
