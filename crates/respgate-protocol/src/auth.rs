/// Credential material resolved by the (external) account repository. The
/// gateway treats both variants as opaque strings — refresh, expiry, and
/// proxy-URL resolution are out of scope here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    ApiKey(String),
    OAuth { access_token: String },
}

impl Credential {
    pub fn bearer_value(&self) -> &str {
        match self {
            Credential::ApiKey(k) => k,
            Credential::OAuth { access_token } => access_token,
        }
    }

    /// OAuth accounts run under the CLI-mode contract: `store=false` unless
    /// the account explicitly allows store recovery, and `stream` is
    /// forced on regardless of what the client asked for.
    pub fn is_oauth(&self) -> bool {
        matches!(self, Credential::OAuth { .. })
    }
}

/// Resolves the bearer credential for an account. Implemented externally
/// (api-key vault, OAuth token cache); this crate only consumes the result.
pub trait AuthProvider: Send + Sync {
    fn credential_for(&self, account_id: &str) -> Option<Credential>;
}
