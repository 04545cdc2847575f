use alloc::string::String;

use core::fmt;

use serde_json::Value;

use zeroize::Zeroize;

/// Audience of the tokens exchanged for an `OAuth2` access token.
pub const ACCESS_TOKEN_AUDIENCE: &str = "https://oauth2.googleapis.com/token";

/// Audience of custom tokens used to sign in a user.
pub const CUSTOM_TOKEN_AUDIENCE: &str =
    "https://identitytoolkit.googleapis.com/google.identity.identitytoolkit.v1.IdentityToolkit";

/// Scopes requested by default for an access token.
pub const DEFAULT_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform \
    https://www.googleapis.com/auth/firebase.database \
    https://www.googleapis.com/auth/userinfo.email";

// Default token lifetime in seconds.
const DEFAULT_EXPIRY_SECS: u64 = 3600;
// The backend refuses tokens living longer than one hour.
const MAXIMUM_EXPIRY_SECS: u64 = 3600;

/// Service account credentials.
///
/// The private key is wiped from memory when the credentials are dropped.
#[derive(Clone, PartialEq, Eq)]
pub struct ServiceAccount {
    client_email: String,
    project_id: String,
    private_key: String,
}

impl ServiceAccount {
    /// Creates a [`ServiceAccount`].
    #[must_use]
    pub fn new(client_email: &str, project_id: &str, private_key: &str) -> Self {
        Self {
            client_email: client_email.into(),
            project_id: project_id.into(),
            private_key: private_key.into(),
        }
    }

    /// Returns the client email.
    #[must_use]
    pub fn client_email(&self) -> &str {
        &self.client_email
    }

    /// Returns the project identifier.
    #[must_use]
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Returns the private key.
    #[must_use]
    pub fn private_key(&self) -> &str {
        &self.private_key
    }
}

impl fmt::Debug for ServiceAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccount")
            .field("client_email", &self.client_email)
            .field("project_id", &self.project_id)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

impl Drop for ServiceAccount {
    fn drop(&mut self) {
        self.private_key.zeroize();
    }
}

/// The kind of token to generate.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// A token exchanged for an `OAuth2` access token.
    AccessToken {
        /// Space-separated scopes.
        scope: String,
    },
    /// A custom token signing in a user.
    CustomToken {
        /// User identifier.
        uid: String,
        /// Additional claims attached to the user.
        claims: Option<Value>,
    },
}

impl TokenKind {
    /// Creates an access token kind with the [`DEFAULT_SCOPE`].
    #[must_use]
    #[inline]
    pub fn access_token() -> Self {
        Self::access_token_with_scope(DEFAULT_SCOPE)
    }

    /// Creates an access token kind with the given scopes.
    #[must_use]
    #[inline]
    pub fn access_token_with_scope(scope: &str) -> Self {
        Self::AccessToken {
            scope: scope.into(),
        }
    }

    /// Creates a custom token kind for the user `uid`.
    #[must_use]
    #[inline]
    pub fn custom_token(uid: &str) -> Self {
        Self::CustomToken {
            uid: uid.into(),
            claims: None,
        }
    }

    /// Creates a custom token kind for the user `uid` with additional
    /// claims.
    #[must_use]
    #[inline]
    pub fn custom_token_with_claims(uid: &str, claims: Value) -> Self {
        Self::CustomToken {
            uid: uid.into(),
            claims: Some(claims),
        }
    }

    pub(crate) const fn audience(&self) -> &'static str {
        match self {
            Self::AccessToken { .. } => ACCESS_TOKEN_AUDIENCE,
            Self::CustomToken { .. } => CUSTOM_TOKEN_AUDIENCE,
        }
    }
}

/// The token configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenConfig {
    expiry_secs: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenConfig {
    /// Creates a [`TokenConfig`] with a lifetime of one hour.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            expiry_secs: DEFAULT_EXPIRY_SECS,
        }
    }

    /// Sets the token lifetime in seconds.
    ///
    /// The lifetime is clamped between one second and one hour.
    #[must_use]
    pub const fn expiry(mut self, seconds: u64) -> Self {
        self.expiry_secs = if seconds == 0 {
            1
        } else if seconds > MAXIMUM_EXPIRY_SECS {
            MAXIMUM_EXPIRY_SECS
        } else {
            seconds
        };
        self
    }

    /// Returns the token lifetime in seconds.
    #[must_use]
    pub const fn expiry_secs(&self) -> u64 {
        self.expiry_secs
    }
}

/// Authentication data consumed by the token generator.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthData {
    account: ServiceAccount,
    kind: TokenKind,
    config: TokenConfig,
}

impl AuthData {
    /// Creates an [`AuthData`].
    #[must_use]
    #[inline]
    pub fn new(account: ServiceAccount, kind: TokenKind) -> Self {
        Self {
            account,
            kind,
            config: TokenConfig::new(),
        }
    }

    /// Sets the [`TokenConfig`].
    #[must_use]
    #[inline]
    pub fn config(mut self, config: TokenConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the service account.
    #[must_use]
    pub const fn account(&self) -> &ServiceAccount {
        &self.account
    }

    /// Returns the token kind.
    #[must_use]
    pub const fn kind(&self) -> &TokenKind {
        &self.kind
    }

    /// Returns the token configuration.
    #[must_use]
    pub const fn token_config(&self) -> &TokenConfig {
        &self.config
    }
}
