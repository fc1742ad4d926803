// Credential reconstruction. The scheduler hands us three base64-encoded
// blobs (service account key, OAuth client secret, cached OAuth token) via
// secrets; every one of them must decode cleanly before a single network
// call is made. A bad credential fails the whole run up front - nothing
// downstream can succeed without them.

use base64::{engine::general_purpose::STANDARD, Engine};
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential '{name}' is missing or empty")]
    Missing { name: &'static str },

    #[error("credential '{name}' could not be decoded: {detail}")]
    Corrupt { name: &'static str, detail: String },
}

// ============================================================================
// CREDENTIAL BUNDLE
// ============================================================================

/// The three decoded credential artifacts for one run.
///
/// Only the service-account key is consumed directly by the Google clients;
/// the client secret and token cache are opaque artifacts handed to the
/// document store. All three are validated eagerly so a misconfigured
/// deployment fails before it touches the network.
#[derive(Debug)]
pub struct CredentialBundle {
    /// Service-account JSON key (PEM private key inside).
    pub service_account_key: String,
    /// OAuth client secret JSON.
    pub client_secret: String,
    /// Cached OAuth token JSON.
    pub token_cache: String,
}

impl CredentialBundle {
    /// Decodes the bundle from the three encoded inputs.
    ///
    /// Inputs are passed in rather than read from the environment here, so
    /// the decode path stays testable without process-global state.
    pub fn from_encoded(
        service_account_key: Option<&str>,
        client_secret: Option<&str>,
        token_cache: Option<&str>,
    ) -> Result<Self, CredentialError> {
        Ok(Self {
            service_account_key: decode_one("service_account_key", service_account_key)?,
            client_secret: decode_one("client_secret", client_secret)?,
            token_cache: decode_one("token_cache", token_cache)?,
        })
    }
}

fn decode_one(name: &'static str, encoded: Option<&str>) -> Result<String, CredentialError> {
    let encoded = match encoded {
        Some(value) if !value.trim().is_empty() => value.trim(),
        _ => return Err(CredentialError::Missing { name }),
    };

    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| CredentialError::Corrupt {
            name,
            detail: e.to_string(),
        })?;

    if bytes.is_empty() {
        return Err(CredentialError::Corrupt {
            name,
            detail: "decoded payload is empty".to_string(),
        });
    }

    String::from_utf8(bytes).map_err(|e| CredentialError::Corrupt {
        name,
        detail: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine};

    fn enc(s: &str) -> String {
        STANDARD.encode(s)
    }

    #[test]
    fn decodes_a_full_bundle() {
        let bundle = CredentialBundle::from_encoded(
            Some(&enc("{\"private_key\":\"pem\"}")),
            Some(&enc("{\"installed\":{}}")),
            Some(&enc("{\"token\":\"abc\"}")),
        )
        .unwrap();

        assert_eq!(bundle.service_account_key, "{\"private_key\":\"pem\"}");
        assert_eq!(bundle.client_secret, "{\"installed\":{}}");
        assert_eq!(bundle.token_cache, "{\"token\":\"abc\"}");
    }

    #[test]
    fn missing_input_is_reported_by_name() {
        let err = CredentialBundle::from_encoded(None, Some(&enc("x")), Some(&enc("y")))
            .unwrap_err();
        match err {
            CredentialError::Missing { name } => assert_eq!(name, "service_account_key"),
            other => panic!("expected Missing, got {other:?}"),
        }
    }

    #[test]
    fn blank_input_counts_as_missing() {
        let err = CredentialBundle::from_encoded(Some(&enc("x")), Some("   "), Some(&enc("y")))
            .unwrap_err();
        assert!(matches!(
            err,
            CredentialError::Missing {
                name: "client_secret"
            }
        ));
    }

    #[test]
    fn invalid_base64_is_corrupt() {
        let err =
            CredentialBundle::from_encoded(Some("not base64!!!"), Some(&enc("x")), Some(&enc("y")))
                .unwrap_err();
        assert!(matches!(
            err,
            CredentialError::Corrupt {
                name: "service_account_key",
                ..
            }
        ));
    }

    #[test]
    fn empty_payload_is_corrupt() {
        // Valid base64 for a zero-length payload.
        let err = CredentialBundle::from_encoded(Some(&enc("k")), Some(&enc("s")), Some(""))
            .unwrap_err();
        assert!(matches!(
            err,
            CredentialError::Missing {
                name: "token_cache"
            }
        ));

        let err = CredentialBundle::from_encoded(Some(&enc("k")), Some(&enc("s")), Some("===="))
            .unwrap_err();
        assert!(matches!(err, CredentialError::Corrupt { .. }));
    }
}
