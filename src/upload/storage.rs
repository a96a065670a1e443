//! Direct-to-storage helpers: signed requests and multipart XML documents.

use std::collections::BTreeMap;

use reqwest::Method;
use serde::{Deserialize, Serialize};

use super::StepError;
use crate::http::{ApiRequest, ApiResponse};
use crate::models::SignedRequest;

/// Turn a server-issued signed request into a transport request.
pub(crate) fn signed_request(signed: &SignedRequest) -> Result<ApiRequest, StepError> {
    let method = Method::from_bytes(signed.method.to_ascii_uppercase().as_bytes())
        .map_err(|_| StepError::Protocol(format!("unsupported method {}", signed.method)))?;
    let mut request = ApiRequest::absolute(method, &signed.url);
    let mut headers: Vec<_> = signed.headers.iter().collect();
    headers.sort();
    for (name, value) in headers {
        request = request.header(name, value);
    }
    Ok(request)
}

#[derive(Debug, Deserialize)]
#[serde(rename = "InitiateMultipartUploadResult")]
struct InitiateResult {
    #[serde(rename = "UploadId")]
    upload_id: String,
}

/// Storage upload id from a multipart initiate response.
pub(crate) fn parse_initiate(response: &ApiResponse) -> Result<String, StepError> {
    let body = response.text().map_err(StepError::Server)?;
    let result: InitiateResult = quick_xml::de::from_str(body)
        .map_err(|e| StepError::Protocol(format!("bad initiate response: {}", e)))?;
    let upload_id = result.upload_id.trim();
    if upload_id.is_empty() {
        return Err(StepError::Protocol("initiate response has an empty UploadId".into()));
    }
    Ok(upload_id.to_string())
}

#[derive(Debug, Serialize)]
#[serde(rename = "CompleteMultipartUpload")]
struct CompleteManifest<'a> {
    #[serde(rename = "Part")]
    parts: Vec<ManifestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct ManifestPart<'a> {
    #[serde(rename = "PartNumber")]
    part_number: u32,
    #[serde(rename = "ETag")]
    etag: &'a str,
}

/// XML manifest listing every part in ascending part order.
pub(crate) fn build_manifest(etags: &BTreeMap<u32, String>) -> Result<String, StepError> {
    let manifest = CompleteManifest {
        parts: etags
            .iter()
            .map(|(part_number, etag)| ManifestPart {
                part_number: *part_number,
                etag,
            })
            .collect(),
    };
    quick_xml::se::to_string(&manifest)
        .map_err(|e| StepError::Protocol(format!("cannot build manifest: {}", e)))
}

/// ETag of an acknowledged part, whatever casing the provider used for the header.
pub(crate) fn part_etag(response: &ApiResponse) -> Result<String, StepError> {
    response
        .header("etag")
        .map(str::to_string)
        .ok_or_else(|| StepError::Protocol("storage response carries no ETag".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_initiate() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<InitiateMultipartUploadResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Bucket>bucket</Bucket>
  <Key>assets/ab/cd/abcd</Key>
  <UploadId>VXBsb2FkIElEIGZvciA2aWWpbmcncyBteS1tb3ZpZS5tMnRzIHVwbG9hZA</UploadId>
</InitiateMultipartUploadResult>"#;
        let response = ApiResponse::new(200).with_body(xml.as_bytes().to_vec());
        assert_eq!(
            parse_initiate(&response).unwrap(),
            "VXBsb2FkIElEIGZvciA2aWWpbmcncyBteS1tb3ZpZS5tMnRzIHVwbG9hZA"
        );
    }

    #[test]
    fn test_parse_initiate_without_upload_id() {
        let response =
            ApiResponse::new(200).with_body(b"<InitiateMultipartUploadResult/>".to_vec());
        assert!(matches!(parse_initiate(&response), Err(StepError::Protocol(_))));
    }

    #[test]
    fn test_manifest_lists_parts_in_order() {
        let mut etags = BTreeMap::new();
        etags.insert(2, "etag-2".to_string());
        etags.insert(1, "etag-1".to_string());

        let xml = build_manifest(&etags).unwrap();
        assert!(xml.starts_with("<CompleteMultipartUpload>"));
        assert!(xml.ends_with("</CompleteMultipartUpload>"));
        let first = xml.find("<PartNumber>1</PartNumber><ETag>etag-1</ETag>").unwrap();
        let second = xml.find("<PartNumber>2</PartNumber><ETag>etag-2</ETag>").unwrap();
        assert!(first < second);
        assert_eq!(xml.matches("<Part>").count(), 2);
    }

    #[test]
    fn test_signed_request_keeps_url_and_headers() {
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "text/plain".to_string());
        let signed = SignedRequest {
            method: "put".into(),
            url: "https://bucket.example/key?X-Amz-Signature=1".into(),
            headers,
        };

        let request = signed_request(&signed).unwrap();
        assert_eq!(request.method, Method::PUT);
        assert!(!request.is_api_request());
        assert_eq!(
            request.headers,
            vec![("Content-Type".to_string(), "text/plain".to_string())]
        );
    }

    #[test]
    fn test_part_etag_any_casing() {
        let response = ApiResponse::new(200).with_header("ETag", "\"d41d8cd9\"");
        assert_eq!(part_etag(&response).unwrap(), "\"d41d8cd9\"");
        assert!(part_etag(&ApiResponse::new(200)).is_err());
    }
}
