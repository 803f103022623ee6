// Request body extraction with JSON error bodies

use axum::async_trait;
use axum::body::Bytes;
use axum::extract::{FromRequest, Request};
use serde::de::DeserializeOwned;

use crate::error::ApiError;

/// JSON body extractor that rejects with `ApiError::BadRequest`.
///
/// An empty body is read as `{}` so that missing required fields surface as
/// field-level validation errors rather than a content-type rejection.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to read request body: {}", e)))?;
        parse_json(&bytes).map(JsonBody)
    }
}

pub fn parse_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ApiError> {
    let body: &[u8] = if bytes.iter().all(u8::is_ascii_whitespace) {
        b"{}"
    } else {
        bytes
    };
    serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid request body: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    #[serde(deny_unknown_fields, rename_all = "camelCase")]
    struct Probe {
        wallet_address: Option<String>,
    }

    #[test]
    fn test_empty_body_is_empty_object() {
        let probe: Probe = parse_json(b"").unwrap();
        assert!(probe.wallet_address.is_none());
        let probe: Probe = parse_json(b"  \n").unwrap();
        assert!(probe.wallet_address.is_none());
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let err = parse_json::<Probe>(br#"{"walletAddress":"0x1","extra":1}"#).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(parse_json::<Probe>(b"{not json").is_err());
    }
}
