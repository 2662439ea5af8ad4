//! Adapter that runs a JSON hook against a response body

use async_trait::async_trait;
use std::sync::Arc;

use super::{
    normalize_content_encoding, settle, FailurePolicy, HookError, JsonHook, ProxiedResponse,
    ResponseHook, Stage,
};
use crate::json::JsonDocument;

/// Steps of the JSON body protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonStage {
    Normalize,
    Decode,
    Hook,
    Encode,
}

impl Stage for JsonStage {
    fn policy(&self) -> FailurePolicy {
        match self {
            // A body we cannot decompress has undefined contents
            JsonStage::Normalize | JsonStage::Hook => FailurePolicy::AbortChain,
            JsonStage::Decode | JsonStage::Encode => FailurePolicy::ForwardUnmodified,
        }
    }
}

/// Wraps a [`JsonHook`] into a [`ResponseHook`]
///
/// Per response: normalize content encoding, decode the body once, run the
/// hook, then re-encode and fix `Content-Length`. Bodies that are not valid
/// JSON, and documents the hook left unchanged, are forwarded byte-for-byte.
pub struct JsonBodyAdapter {
    inner: Arc<dyn JsonHook>,
}

impl JsonBodyAdapter {
    pub fn new(inner: Arc<dyn JsonHook>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl ResponseHook for JsonBodyAdapter {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    async fn apply(&self, response: &mut ProxiedResponse) -> Result<(), HookError> {
        if settle(JsonStage::Normalize, normalize_content_encoding(response))?.is_none() {
            return Ok(());
        }

        let decoded = JsonDocument::from_slice(&response.body).map_err(HookError::Decode);
        if decoded.is_err() {
            tracing::warn!(
                hook = self.inner.name(),
                body_size = response.body.len(),
                body_preview = %String::from_utf8_lossy(&response.body[..response.body.len().min(200)]),
                "Failed to parse response JSON, skipping hook"
            );
        }
        let Some(mut document) = settle(JsonStage::Decode, decoded)? else {
            return Ok(());
        };

        let before = document.root().clone();
        let hooked = self.inner.apply(response, &mut document).await;
        if settle(JsonStage::Hook, hooked)?.is_none() {
            return Ok(());
        }
        if document.root() == &before {
            tracing::debug!(hook = self.inner.name(), "Document unchanged, keeping original body");
            return Ok(());
        }

        let encoded = document.to_vec().map_err(HookError::Encode);
        let Some(body) = settle(JsonStage::Encode, encoded)? else {
            return Ok(());
        };
        response.replace_body(body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json::PathError;
    use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
    use flate2::{write::GzEncoder, Compression};
    use serde_json::{json, Value};
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Sets `attachment.connection_info.driver_volume_type` to "local"
    #[derive(Default)]
    struct MarkLocal {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl JsonHook for MarkLocal {
        fn name(&self) -> &str {
            "mark_local"
        }

        fn description(&self) -> &str {
            "marks attachments local"
        }

        async fn apply(
            &self,
            _response: &mut ProxiedResponse,
            document: &mut JsonDocument,
        ) -> Result<(), HookError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            document.set("attachment.connection_info.driver_volume_type", "local")?;
            Ok(())
        }
    }

    struct Reject;

    #[async_trait]
    impl JsonHook for Reject {
        fn name(&self) -> &str {
            "reject"
        }

        fn description(&self) -> &str {
            "always fails"
        }

        async fn apply(
            &self,
            _response: &mut ProxiedResponse,
            _document: &mut JsonDocument,
        ) -> Result<(), HookError> {
            Err(HookError::Contract(PathError::NotFound {
                path: "attachment.volume_id".to_string(),
            }))
        }
    }

    fn json_response(body: impl Into<Vec<u8>>) -> ProxiedResponse {
        let body = body.into();
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
        ProxiedResponse::new(StatusCode::OK, headers, body)
    }

    fn content_length(response: &ProxiedResponse) -> usize {
        response
            .header_str(header::CONTENT_LENGTH)
            .unwrap()
            .parse()
            .unwrap()
    }

    #[tokio::test]
    async fn test_rewrites_and_fixes_content_length() {
        let body = r#"{"attachment":{"id":"a1","volume_id":"v1","connection_info":{"driver_volume_type":"iscsi","target_portal":"10.0.0.1:3260"}},"extra":[1,2]}"#;
        let mut response = json_response(body);
        let adapter = JsonBodyAdapter::new(Arc::new(MarkLocal::default()));

        adapter.apply(&mut response).await.unwrap();

        let rewritten: Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(
            rewritten,
            json!({
                "attachment": {
                    "id": "a1",
                    "volume_id": "v1",
                    "connection_info": {
                        "driver_volume_type": "local",
                        "target_portal": "10.0.0.1:3260"
                    }
                },
                "extra": [1, 2]
            })
        );
        assert_eq!(content_length(&response), response.body.len());
        assert_ne!(response.body.len(), body.len());
    }

    #[tokio::test]
    async fn test_malformed_json_is_forwarded_unchanged() {
        let body = b"<html>502 from some load balancer</html>".to_vec();
        let mut response = json_response(body.clone());
        let hook = Arc::new(MarkLocal::default());
        let adapter = JsonBodyAdapter::new(hook.clone());

        adapter.apply(&mut response).await.unwrap();

        assert_eq!(&response.body[..], &body[..]);
        assert_eq!(content_length(&response), body.len());
        assert_eq!(hook.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_gzip_body_is_decoded_then_rewritten() {
        let plain = br#"{"attachment":{"connection_info":{"driver_volume_type":"iscsi"}}}"#;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(plain).unwrap();
        let mut response = json_response(encoder.finish().unwrap());
        response
            .headers
            .insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));

        JsonBodyAdapter::new(Arc::new(MarkLocal::default()))
            .apply(&mut response)
            .await
            .unwrap();

        assert!(response.headers.get(header::CONTENT_ENCODING).is_none());
        assert_eq!(
            &response.body[..],
            br#"{"attachment":{"connection_info":{"driver_volume_type":"local"}}}"#
        );
        assert_eq!(content_length(&response), response.body.len());
    }

    #[tokio::test]
    async fn test_gzip_non_json_is_forwarded_decompressed() {
        let plain = b"plain text error";
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(plain).unwrap();
        let mut response = json_response(encoder.finish().unwrap());
        response
            .headers
            .insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));

        JsonBodyAdapter::new(Arc::new(MarkLocal::default()))
            .apply(&mut response)
            .await
            .unwrap();

        assert_eq!(&response.body[..], &plain[..]);
        assert_eq!(content_length(&response), plain.len());
    }

    #[tokio::test]
    async fn test_corrupt_gzip_aborts() {
        let mut response = json_response(b"not gzip at all".to_vec());
        response
            .headers
            .insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));

        let result = JsonBodyAdapter::new(Arc::new(MarkLocal::default()))
            .apply(&mut response)
            .await;

        assert!(matches!(result, Err(HookError::Decompress(_))));
    }

    /// Reads the document without touching it
    struct Inspect;

    #[async_trait]
    impl JsonHook for Inspect {
        fn name(&self) -> &str {
            "inspect"
        }

        fn description(&self) -> &str {
            "reads only"
        }

        async fn apply(
            &self,
            _response: &mut ProxiedResponse,
            document: &mut JsonDocument,
        ) -> Result<(), HookError> {
            document.get("attachment")?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_unchanged_document_keeps_original_bytes() {
        let body = b"{\n  \"attachment\": {\"id\": \"a1\",   \"status\": \"reserved\"}\n}\n".to_vec();
        let mut response = json_response(body.clone());

        JsonBodyAdapter::new(Arc::new(Inspect))
            .apply(&mut response)
            .await
            .unwrap();

        assert_eq!(&response.body[..], &body[..]);
        assert_eq!(content_length(&response), body.len());
    }

    #[tokio::test]
    async fn test_idempotent_write_keeps_original_bytes() {
        let body = br#"{"attachment": {"connection_info": {"driver_volume_type": "local"}}}"#.to_vec();
        let mut response = json_response(body.clone());

        JsonBodyAdapter::new(Arc::new(MarkLocal::default()))
            .apply(&mut response)
            .await
            .unwrap();

        assert_eq!(&response.body[..], &body[..]);
    }

    #[tokio::test]
    async fn test_hook_error_propagates() {
        let body = br#"{"attachment":{}}"#.to_vec();
        let mut response = json_response(body.clone());

        let result = JsonBodyAdapter::new(Arc::new(Reject)).apply(&mut response).await;

        assert!(matches!(result, Err(HookError::Contract(_))));
        assert_eq!(&response.body[..], &body[..]);
    }

    #[test]
    fn test_stage_policies() {
        assert_eq!(JsonStage::Normalize.policy(), FailurePolicy::AbortChain);
        assert_eq!(JsonStage::Decode.policy(), FailurePolicy::ForwardUnmodified);
        assert_eq!(JsonStage::Hook.policy(), FailurePolicy::AbortChain);
        assert_eq!(JsonStage::Encode.policy(), FailurePolicy::ForwardUnmodified);
    }

    #[test]
    fn test_adapter_reports_inner_identity() {
        let adapter = JsonBodyAdapter::new(Arc::new(MarkLocal::default()));
        assert_eq!(adapter.name(), "mark_local");
        assert_eq!(adapter.description(), "marks attachments local");
    }
}
