//! Parse-queue (`fetch:queue`) and ingress-list (`ingress:urls`) blob
//! encoding. Both use `postcard`, a compact, self-delimited binary format —
//! satisfying spec §6's explicit prohibition on JSON/text formats for the
//! parse-queue without reusing the teacher's own bincode job-queue framing
//! (see DESIGN.md for why postcard was chosen over bincode here).

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResultBlob {
    pub url: String,
    pub domain: String,
    pub depth: u32,
    pub content_bytes: Option<Vec<u8>>,
    pub text_content: Option<String>,
    pub content_type: Option<String>,
    pub crawled_timestamp: i64,
    pub status_code: u16,
    pub is_redirect: bool,
    pub initial_url: String,
}

pub fn encode_fetch_result(blob: &FetchResultBlob) -> Result<Vec<u8>> {
    Ok(postcard::to_allocvec(blob)?)
}

pub fn decode_fetch_result(bytes: &[u8]) -> Result<FetchResultBlob> {
    Ok(postcard::from_bytes(bytes)?)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngressEntry {
    pub url: String,
    pub depth: u32,
}

pub fn encode_ingress_batch(entries: &[IngressEntry]) -> Result<Vec<u8>> {
    Ok(postcard::to_allocvec(entries)?)
}

pub fn decode_ingress_batch(bytes: &[u8]) -> Result<Vec<IngressEntry>> {
    Ok(postcard::from_bytes(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_result_blob_roundtrips() {
        let blob = FetchResultBlob {
            url: "https://example.com/a".to_string(),
            domain: "example.com".to_string(),
            depth: 1,
            content_bytes: None,
            text_content: Some("<html></html>".to_string()),
            content_type: Some("text/html".to_string()),
            crawled_timestamp: 1_700_000_000,
            status_code: 200,
            is_redirect: false,
            initial_url: "https://example.com/a".to_string(),
        };

        let encoded = encode_fetch_result(&blob).unwrap();
        let decoded = decode_fetch_result(&encoded).unwrap();
        assert_eq!(decoded.url, blob.url);
        assert_eq!(decoded.text_content, blob.text_content);
    }

    #[test]
    fn ingress_batch_roundtrips() {
        let entries = vec![
            IngressEntry {
                url: "https://b.test/".to_string(),
                depth: 1,
            },
            IngressEntry {
                url: "https://b.test/x".to_string(),
                depth: 2,
            },
        ];
        let encoded = encode_ingress_batch(&entries).unwrap();
        let decoded = decode_ingress_batch(&encoded).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[1].url, "https://b.test/x");
    }
}
