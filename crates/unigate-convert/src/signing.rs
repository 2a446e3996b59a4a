use async_trait::async_trait;
use bytes::Bytes;
use hmac::{Hmac, Mac};
use http::{HeaderMap, HeaderValue};
use sha2::Sha256;
use tokio::sync::RwLock;
use unigate_common::GatewayError;
use unigate_protocol::{ChatRequest, ChatResponse};

use crate::converter::{Converter, Secrets, StreamDecoder};
use crate::openai::OpenAiCompatConverter;

type HmacSha256 = Hmac<Sha256>;

/// Sign a canonical string with HMAC-SHA256, returning lowercase hex — the
/// building block every signature-based vendor (Baidu/Tencent TC3-style,
/// AWS SigV4-style) layers its own envelope on top of.
pub fn hmac_sha256_hex(secret: &str, canonical: &str) -> Result<String, GatewayError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| GatewayError::AuthMintError(e.to_string()))?;
    mac.update(canonical.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

struct CachedToken {
    value: String,
    expires_at: std::time::Instant,
}

const TOKEN_REFRESH_LEAD: std::time::Duration = std::time::Duration::from_secs(3600);

/// Converter for vendors that require a signed request (HMAC-SHA256 over a
/// canonical `host/date/path` string) and, optionally, a minted bearer
/// token fetched from `secrets["token_url"]` and cached with a one-hour
/// refresh lead time. Falls back to the OpenAI-compat
/// body shape, since the generic envelope is "OpenAI body + a signed
/// Authorization header" for the providers this converter targets.
#[derive(Default)]
pub struct SignedGenericConverter {
    cached_token: RwLock<Option<CachedToken>>,
}

impl SignedGenericConverter {
    async fn mint_or_reuse_token(&self, secrets: &Secrets) -> Result<Option<String>, GatewayError> {
        let Some(token_url) = secrets.get("token_url") else {
            return Ok(None);
        };

        {
            let guard = self.cached_token.read().await;
            if let Some(cached) = guard.as_ref() {
                if cached.expires_at > std::time::Instant::now() + TOKEN_REFRESH_LEAD {
                    return Ok(Some(cached.value.clone()));
                }
            }
        }

        let client = reqwest::Client::new();
        let mut request = client.post(token_url);
        if let Some(client_id) = secrets.get("client_id") {
            request = request.query(&[("client_id", client_id.as_str())]);
        }
        if let Some(client_secret) = secrets.get("client_secret") {
            request = request.query(&[("client_secret", client_secret.as_str())]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::AuthMintError(format!("token mint request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(GatewayError::AuthMintError(format!(
                "token mint returned {}",
                response.status()
            )));
        }
        let parsed: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GatewayError::AuthMintError(format!("invalid token response: {e}")))?;
        let token = parsed["access_token"]
            .as_str()
            .ok_or_else(|| GatewayError::AuthMintError("missing access_token".to_string()))?
            .to_string();
        let ttl_secs = parsed["expires_in"].as_u64().unwrap_or(3600);

        let mut guard = self.cached_token.write().await;
        *guard = Some(CachedToken {
            value: token.clone(),
            expires_at: std::time::Instant::now() + std::time::Duration::from_secs(ttl_secs),
        });
        Ok(Some(token))
    }
}

#[async_trait]
impl Converter for SignedGenericConverter {
    fn build_request_url(&self, base_url: &str, model: &str, stream: bool) -> String {
        OpenAiCompatConverter.build_request_url(base_url, model, stream)
    }

    async fn build_request_headers(
        &self,
        secrets: &Secrets,
        _stream: bool,
    ) -> Result<HeaderMap, GatewayError> {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));

        if let Some(token) = self.mint_or_reuse_token(secrets).await? {
            let value = format!("Bearer {token}");
            headers.insert(
                "authorization",
                HeaderValue::from_str(&value)
                    .map_err(|e| GatewayError::AuthMintError(e.to_string()))?,
            );
            return Ok(headers);
        }

        let secret_key = secrets
            .get("signing_key")
            .ok_or_else(|| GatewayError::AuthMintError("missing signing_key secret".to_string()))?;
        let date = httpdate_now();
        let host = secrets.get("host").cloned().unwrap_or_default();
        let path = secrets.get("path").cloned().unwrap_or_default();
        let canonical = format!("{host}\n{date}\n{path}");
        let signature = hmac_sha256_hex(secret_key, &canonical)?;
        let key_id = secrets.get("key_id").cloned().unwrap_or_default();
        headers.insert(
            "authorization",
            HeaderValue::from_str(&format!("HMAC-SHA256 Credential={key_id}, Signature={signature}"))
                .map_err(|e| GatewayError::AuthMintError(e.to_string()))?,
        );
        headers.insert(
            "date",
            HeaderValue::from_str(&date).map_err(|e| GatewayError::AuthMintError(e.to_string()))?,
        );
        Ok(headers)
    }

    fn build_request_body(&self, request: &ChatRequest) -> Result<Bytes, GatewayError> {
        OpenAiCompatConverter.build_request_body(request)
    }

    fn parse_response(&self, body: &Bytes) -> Result<ChatResponse, GatewayError> {
        OpenAiCompatConverter.parse_response(body)
    }

    fn new_stream_decoder(&self, model: &str) -> Box<dyn StreamDecoder> {
        OpenAiCompatConverter.new_stream_decoder(model)
    }
}

fn httpdate_now() -> String {
    let now = time::OffsetDateTime::now_utc();
    now.format(&time::format_description::well_known::Rfc2822)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_is_deterministic() {
        let a = hmac_sha256_hex("secret", "canonical").unwrap();
        let b = hmac_sha256_hex("secret", "canonical").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn hmac_differs_with_different_secrets() {
        let a = hmac_sha256_hex("secret-a", "canonical").unwrap();
        let b = hmac_sha256_hex("secret-b", "canonical").unwrap();
        assert_ne!(a, b);
    }
}
