//! Tests for Signature V4 signing against the published AWS example.

use super::*;
use chrono::TimeZone;

fn example_signer(session_token: Option<String>) -> SigV4Signer {
    SigV4Signer::new(
        AwsCredentials::new(
            "AKIDEXAMPLE".to_string(),
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_string(),
            session_token,
        ),
        "us-east-1".to_string(),
        "iam",
    )
}

fn example_timestamp() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2015, 8, 30, 12, 36, 0).unwrap()
}

fn example_query() -> Vec<(String, String)> {
    vec![
        ("Version".to_string(), "2010-05-08".to_string()),
        ("Action".to_string(), "ListUsers".to_string()),
    ]
}

fn example_headers() -> Vec<(String, String)> {
    vec![(
        "Content-Type".to_string(),
        "application/x-www-form-urlencoded; charset=utf-8".to_string(),
    )]
}

/// Verify the signing key derivation matches the AWS documentation
#[test]
fn test_signing_key_derivation() {
    let signer = example_signer(None);
    assert_eq!(
        hex::encode(signer.signing_key("20150830")),
        "c4afb1cc5771d871763a393e44b703571b55cc28424d1a5e86da6ed3c154a4b9"
    );
}

/// Verify the full signature for the IAM ListUsers example
#[test]
fn test_signature_matches_published_example() {
    let signer = example_signer(None);
    let query = example_query();
    let headers = example_headers();

    let signed = signer.sign(
        &SigningRequest {
            method: "GET",
            host: "iam.amazonaws.com",
            path: "/",
            query: &query,
            headers: &headers,
            payload_hash: EMPTY_PAYLOAD_SHA256,
        },
        &example_timestamp(),
    );

    let authorization = signed
        .iter()
        .find(|(k, _)| k == "authorization")
        .map(|(_, v)| v.clone())
        .unwrap();
    assert_eq!(
        authorization,
        "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20150830/us-east-1/iam/aws4_request, \
         SignedHeaders=content-type;host;x-amz-date, \
         Signature=5d672d79c15b13162d9279b0855cfba6789a8edb4c82c400e06b5924a6f2b5d7"
    );

    assert!(signed
        .iter()
        .any(|(k, v)| k == "x-amz-date" && v == "20150830T123600Z"));
}

/// Verify temporary credentials add and sign the security token
#[test]
fn test_session_token_is_signed() {
    let signer = example_signer(Some("session-token".to_string()));
    let query = example_query();

    let signed = signer.sign(
        &SigningRequest {
            method: "GET",
            host: "iam.amazonaws.com",
            path: "/",
            query: &query,
            headers: &[],
            payload_hash: EMPTY_PAYLOAD_SHA256,
        },
        &example_timestamp(),
    );

    assert!(signed
        .iter()
        .any(|(k, v)| k == "x-amz-security-token" && v == "session-token"));
    let authorization = &signed[0].1;
    assert!(authorization.contains("SignedHeaders=host;x-amz-date;x-amz-security-token"));
}

#[test]
fn test_canonical_query_string_is_sorted_and_encoded() {
    let query = vec![
        ("b".to_string(), "two words".to_string()),
        ("a".to_string(), "x/y".to_string()),
    ];
    assert_eq!(canonical_query_string(&query), "a=x%2Fy&b=two%20words");
    assert_eq!(canonical_query_string(&[]), "");
}

#[test]
fn test_host_header_includes_non_default_port() {
    let url = url::Url::parse("http://127.0.0.1:4566/queue").unwrap();
    assert_eq!(host_header(&url), "127.0.0.1:4566");

    let url = url::Url::parse("https://sqs.us-east-1.amazonaws.com/").unwrap();
    assert_eq!(host_header(&url), "sqs.us-east-1.amazonaws.com");
}

#[test]
fn test_empty_payload_hash() {
    assert_eq!(sha256_hex(b""), EMPTY_PAYLOAD_SHA256);
}
