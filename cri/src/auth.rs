//! Decoding of caller-supplied registry credentials.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use stevedore_runtime::RegistryAuth;

use crate::cri_api::AuthConfig;
use crate::error::PullError;

/// Turn a CRI `AuthConfig` into registry credentials.
///
/// A non-empty `auth` token must be base64 of `username:password` and
/// overrides the plain fields; otherwise the plain fields pass through.
/// No auth config, or empty fields, means anonymous.
pub fn decode_auth(config: Option<&AuthConfig>) -> Result<RegistryAuth, PullError> {
    let Some(config) = config else {
        return Ok(RegistryAuth::anonymous());
    };

    if config.auth.is_empty() {
        return Ok(RegistryAuth::from_parts(&config.username, &config.password));
    }

    let decoded = STANDARD
        .decode(config.auth.as_bytes())
        .map_err(PullError::InvalidCredentialEncoding)?;
    let decoded = String::from_utf8_lossy(&decoded);

    let (username, password) = decoded
        .split_once(':')
        .ok_or(PullError::InvalidCredentialFormat)?;

    Ok(RegistryAuth::basic(username, password))
}
