//! Content-Encoding normalization

use axum::http::header;
use flate2::read::GzDecoder;
use std::io::Read;

use super::{HookError, ProxiedResponse};

/// Decompress a gzip-encoded body in place
///
/// Removes `Content-Encoding` and resets `Content-Length` to the decompressed
/// size. Any other encoding, or none, leaves the response untouched.
/// Decompression stops with `BodyTooLarge` past `response.body_limit`.
pub fn normalize_content_encoding(response: &mut ProxiedResponse) -> Result<(), HookError> {
    let is_gzip = response
        .header_str(header::CONTENT_ENCODING)
        .map(|enc| enc.trim().eq_ignore_ascii_case("gzip"))
        .unwrap_or(false);
    if !is_gzip {
        return Ok(());
    }

    let decompressed = gunzip(&response.body, response.body_limit)?;
    tracing::debug!(
        original_size = response.body.len(),
        decompressed_size = decompressed.len(),
        "Decompressed gzip response"
    );

    response.headers.remove(header::CONTENT_ENCODING);
    response.replace_body(decompressed);
    Ok(())
}

fn gunzip(bytes: &[u8], limit: usize) -> Result<Vec<u8>, HookError> {
    let mut decompressed = Vec::new();
    GzDecoder::new(bytes)
        .take((limit as u64).saturating_add(1))
        .read_to_end(&mut decompressed)
        .map_err(HookError::Decompress)?;

    if decompressed.len() > limit {
        return Err(HookError::BodyTooLarge { limit });
    }
    Ok(decompressed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue, StatusCode};
    use flate2::{write::GzEncoder, Compression};
    use std::io::Write;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn response_with_encoding(encoding: Option<&'static str>, body: Vec<u8>) -> ProxiedResponse {
        let mut headers = HeaderMap::new();
        if let Some(enc) = encoding {
            headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static(enc));
        }
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
        ProxiedResponse::new(StatusCode::OK, headers, body)
    }

    #[test]
    fn test_no_encoding_is_noop() {
        let body = br#"{"attachment":{}}"#.to_vec();
        let mut response = response_with_encoding(None, body.clone());
        let headers_before = response.headers.clone();

        normalize_content_encoding(&mut response).unwrap();

        assert_eq!(&response.body[..], &body[..]);
        assert_eq!(response.headers, headers_before);
    }

    #[test]
    fn test_other_encodings_are_noop() {
        for enc in ["deflate", "br", "identity", "gzip, br"] {
            let body = b"\x01\x02\x03 not really compressed".to_vec();
            let mut response = response_with_encoding(Some(enc), body.clone());

            normalize_content_encoding(&mut response).unwrap();

            assert_eq!(&response.body[..], &body[..], "encoding {enc}");
            assert_eq!(response.header_str(header::CONTENT_ENCODING), Some(enc));
        }
    }

    #[test]
    fn test_gzip_is_decompressed() {
        let plain = br#"{"attachment":{"volume_id":"v1"}}"#;
        let mut response = response_with_encoding(Some("gzip"), gzip(plain));

        normalize_content_encoding(&mut response).unwrap();

        assert_eq!(&response.body[..], &plain[..]);
        assert!(response.headers.get(header::CONTENT_ENCODING).is_none());
        assert_eq!(
            response.header_str(header::CONTENT_LENGTH),
            Some(plain.len().to_string().as_str())
        );
    }

    #[test]
    fn test_gzip_marker_is_case_insensitive() {
        let plain = b"hello";
        let mut response = response_with_encoding(Some(" GZIP "), gzip(plain));

        normalize_content_encoding(&mut response).unwrap();

        assert_eq!(&response.body[..], &plain[..]);
        assert!(response.headers.get(header::CONTENT_ENCODING).is_none());
    }

    #[test]
    fn test_gzip_expansion_is_capped() {
        let plain = vec![b'0'; 64 * 1024];
        let mut response = response_with_encoding(Some("gzip"), gzip(&plain)).with_body_limit(4096);
        let compressed_len = response.body.len();
        assert!(compressed_len < 4096);

        let result = normalize_content_encoding(&mut response);

        assert!(matches!(result, Err(HookError::BodyTooLarge { limit: 4096 })));
        assert_eq!(response.body.len(), compressed_len);
        assert_eq!(response.header_str(header::CONTENT_ENCODING), Some("gzip"));
    }

    #[test]
    fn test_gzip_exactly_at_limit() {
        let plain = vec![b'x'; 4096];
        let mut response = response_with_encoding(Some("gzip"), gzip(&plain)).with_body_limit(4096);

        normalize_content_encoding(&mut response).unwrap();

        assert_eq!(response.body.len(), 4096);
    }

    #[test]
    fn test_corrupt_gzip_is_an_error() {
        let mut response = response_with_encoding(Some("gzip"), b"definitely not gzip".to_vec());

        let result = normalize_content_encoding(&mut response);

        assert!(matches!(result, Err(HookError::Decompress(_))));
        // Header still describes the untouched body
        assert_eq!(response.header_str(header::CONTENT_ENCODING), Some("gzip"));
    }
}
