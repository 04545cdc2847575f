use alloc::format;
use alloc::string::String;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, ErrorKind, Result};

use super::auth::{AuthData, TokenKind};

#[derive(Serialize)]
pub(crate) struct Header<'a> {
    alg: &'a str,
    typ: &'a str,
}

impl<'a> Header<'a> {
    pub(crate) const fn new(alg: &'a str) -> Self {
        Self { alg, typ: "JWT" }
    }
}

#[derive(Serialize)]
pub(crate) struct Claims<'a> {
    iss: &'a str,
    sub: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    uid: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    claims: Option<&'a Value>,
}

impl<'a> Claims<'a> {
    pub(crate) fn new(auth: &'a AuthData, issued_at: u64) -> Self {
        let email = auth.account().client_email();
        let (scope, uid, claims) = match auth.kind() {
            TokenKind::AccessToken { scope } => (Some(scope.as_str()), None, None),
            TokenKind::CustomToken { uid, claims } => (None, Some(uid.as_str()), claims.as_ref()),
        };

        Self {
            iss: email,
            sub: email,
            aud: auth.kind().audience(),
            iat: issued_at,
            exp: issued_at.saturating_add(auth.token_config().expiry_secs()),
            scope,
            uid,
            claims,
        }
    }
}

// Appends the base64URL encoding of the JSON form of `value` to `out`.
pub(crate) fn encode_segment<T: Serialize>(value: &T, out: &mut String) -> Result<()> {
    let json = serde_json::to_vec(value).map_err(|e| {
        Error::new(
            ErrorKind::Serialization,
            format!("Json error caused by {e}"),
        )
    })?;
    URL_SAFE_NO_PAD.encode_string(json, out);
    Ok(())
}
