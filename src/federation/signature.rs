//! HTTP Signatures for ActivityPub
//!
//! Implements signing and verification per:
//! https://docs.joinmastodon.org/spec/security/
//!
//! Outbound requests always sign the same header set, in the same order:
//! `(request-target) host date digest content-type content-length`.

use crate::error::AppError;
use crate::federation::keys::RelayIdentity;
use crate::federation::resolver::Resolve;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use rsa::pkcs8::DecodePublicKey;
use rsa::signature::Verifier;
use rsa::{RsaPublicKey, pkcs1v15::Signature as Pkcs1v15Signature};
use sha2::{Digest, Sha256};

/// Media type used for every activity the relay sends or acknowledges
pub const ACTIVITY_CONTENT_TYPE: &str = "application/activity+json";

/// Header names covered by outbound signatures, in signing order
pub const SIGNED_HEADERS: [&str; 6] = [
    "(request-target)",
    "host",
    "date",
    "digest",
    "content-type",
    "content-length",
];

/// Inbound `Date` headers further than this from local time are rejected
const MAX_CLOCK_SKEW_SECS: i64 = 12 * 60 * 60;

/// Headers to attach to a signed outbound request
///
/// `host` is included because it was signed; HTTP clients normally set it
/// from the URL and it should not be sent twice.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub host: String,
    pub date: String,
    pub digest: String,
    pub content_type: String,
    pub content_length: String,
    /// Signature header value
    pub signature: String,
}

/// Sign an outbound POST of `body` to `url`.
///
/// # Arguments
/// * `identity` - Relay keypair
/// * `method` - HTTP method (e.g., "POST")
/// * `url` - Full destination URL
/// * `body` - Exact bytes that will be sent
/// * `key_id` - Relay key id (`https://{host}/actor#main-key`)
/// * `now` - Value used for the `Date` header
pub fn sign_request(
    identity: &RelayIdentity,
    method: &str,
    url: &str,
    body: &[u8],
    key_id: &str,
    now: DateTime<Utc>,
) -> Result<SignedRequest, AppError> {
    let parsed_url =
        url::Url::parse(url).map_err(|e| AppError::Validation(format!("Invalid URL: {}", e)))?;

    let host = match (parsed_url.host_str(), parsed_url.port()) {
        (Some(host), Some(port)) => format!("{}:{}", host, port),
        (Some(host), None) => host.to_string(),
        (None, _) => return Err(AppError::Validation("Missing host in URL".to_string())),
    };

    let path_and_query = match parsed_url.query() {
        Some(q) => format!("{}?{}", parsed_url.path(), q),
        None => parsed_url.path().to_string(),
    };

    let request = SignedRequest {
        host,
        date: now.format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
        digest: generate_digest(body),
        content_type: ACTIVITY_CONTENT_TYPE.to_string(),
        content_length: body.len().to_string(),
        signature: String::new(),
    };

    let request_target = format!("{} {}", method.to_lowercase(), path_and_query);
    let values = [
        request_target.as_str(),
        request.host.as_str(),
        request.date.as_str(),
        request.digest.as_str(),
        request.content_type.as_str(),
        request.content_length.as_str(),
    ];
    let pairs: Vec<(&str, &str)> = SIGNED_HEADERS.iter().copied().zip(values).collect();

    Ok(SignedRequest {
        signature: sign_headers(identity, &pairs, key_id),
        ..request
    })
}

/// Build a Signature header value over arbitrary `(name, value)` pairs.
///
/// Names are lowercased; the order given is the order signed.
pub fn sign_headers(identity: &RelayIdentity, headers: &[(&str, &str)], key_id: &str) -> String {
    let signing_string = build_signing_string(headers);
    let header_names: Vec<String> = headers
        .iter()
        .map(|(name, _)| name.to_ascii_lowercase())
        .collect();

    format!(
        "keyId=\"{}\",algorithm=\"rsa-sha256\",headers=\"{}\",signature=\"{}\"",
        key_id,
        header_names.join(" "),
        identity.sign(signing_string.as_bytes())
    )
}

fn build_signing_string(headers: &[(&str, &str)]) -> String {
    headers
        .iter()
        .map(|(name, value)| format!("{}: {}", name.to_ascii_lowercase(), value))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Verify an HTTP request signature
///
/// # Arguments
/// * `method` - HTTP method
/// * `path` - Request path and query
/// * `headers` - All request headers
/// * `body` - Request body (for digest verification)
/// * `public_key_pem` - RSA public key in PEM format
/// * `now` - Reference time for the `Date` freshness check
///
/// # Errors
/// `AppError::Validation` describing the first check that failed
pub fn verify_signature(
    method: &str,
    path: &str,
    headers: &http::HeaderMap,
    body: &[u8],
    public_key_pem: &str,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    // 1. Parse Signature header
    let signature_header = header_value(headers, "signature")?;
    let parsed = parse_signature_header(&signature_header)?;

    // 2. Validate algorithm and required signed headers.
    if parsed.algorithm != "rsa-sha256" && parsed.algorithm != "hs2019" {
        return Err(AppError::Validation(format!(
            "Unsupported signature algorithm: {}",
            parsed.algorithm
        )));
    }

    for required in ["(request-target)", "date", "digest"] {
        if !parsed.headers.iter().any(|h| h == required) {
            return Err(AppError::Validation(format!(
                "Signed headers must include: {}",
                required
            )));
        }
    }

    // 3. Date must be within the accepted clock skew.
    let date_str = header_value(headers, "date")?;
    let date = DateTime::parse_from_rfc2822(&date_str)
        .map_err(|_| AppError::Validation("Invalid Date format".to_string()))?;

    if (now.timestamp() - date.timestamp()).abs() > MAX_CLOCK_SKEW_SECS {
        return Err(AppError::Validation(
            "Date header too old or in future".to_string(),
        ));
    }

    // 4. Digest must match the body. Senders may list several algorithms.
    let digest_str = header_value(headers, "digest")?;
    let expected_digest = generate_digest(body);
    if !digest_str
        .split(',')
        .any(|candidate| candidate.trim() == expected_digest)
    {
        return Err(AppError::Validation("Digest mismatch".to_string()));
    }

    // 5. Reconstruct signing string.
    let mut signing_parts = Vec::with_capacity(parsed.headers.len());
    for header_name in &parsed.headers {
        let value = if header_name == "(request-target)" {
            format!("{} {}", method.to_lowercase(), path)
        } else {
            header_value(headers, header_name)?
        };
        signing_parts.push(format!("{}: {}", header_name, value));
    }
    let signing_string = signing_parts.join("\n");

    // 6. Verify RSA signature.
    let signature_bytes = BASE64
        .decode(&parsed.signature)
        .map_err(|_| AppError::Validation("Invalid signature encoding".to_string()))?;

    let public_key = RsaPublicKey::from_public_key_pem(public_key_pem)
        .or_else(|_| {
            use rsa::pkcs1::DecodeRsaPublicKey;
            RsaPublicKey::from_pkcs1_pem(public_key_pem)
        })
        .map_err(|e| AppError::Validation(format!("Invalid public key: {}", e)))?;

    let verifier = rsa::pkcs1v15::VerifyingKey::<Sha256>::new(public_key);

    let signature = Pkcs1v15Signature::try_from(signature_bytes.as_slice())
        .map_err(|e| AppError::Validation(format!("Invalid signature format: {}", e)))?;

    verifier
        .verify(signing_string.as_bytes(), &signature)
        .map_err(|_| AppError::Validation("Signature verification failed".to_string()))?;

    Ok(())
}

/// Verify an inbound request against the key of the actor named by its
/// `keyId`.
///
/// Never errors: any failure (missing header, unresolvable key owner, bad
/// digest, bad signature) yields `false`.
pub async fn verify_request(
    resolver: &dyn Resolve,
    method: &str,
    path: &str,
    headers: &http::HeaderMap,
    body: &[u8],
) -> bool {
    let key_id = match header_value(headers, "signature")
        .and_then(|header| parse_signature_header(&header))
    {
        Ok(parsed) => parsed.key_id,
        Err(e) => {
            tracing::debug!("Unsigned or malformed request: {}", e);
            return false;
        }
    };

    let owner = key_owner(&key_id);
    let Some(actor) = resolver.actor(owner).await else {
        tracing::debug!(key_id = %key_id, "Could not resolve signing actor");
        return false;
    };

    let Some(public_key) = actor.public_key.as_ref() else {
        tracing::debug!(actor = %actor.id, "Signing actor publishes no key");
        return false;
    };

    match verify_signature(
        method,
        path,
        headers,
        body,
        &public_key.public_key_pem,
        Utc::now(),
    ) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(key_id = %key_id, "Signature rejected: {}", e);
            false
        }
    }
}

/// Actor URI a key id belongs to (the key id without its fragment).
pub fn key_owner(key_id: &str) -> &str {
    key_id.split('#').next().unwrap_or(key_id)
}

fn header_value(headers: &http::HeaderMap, name: &str) -> Result<String, AppError> {
    let values: Vec<&str> = headers
        .get_all(name)
        .iter()
        .map(|value| {
            value
                .to_str()
                .map_err(|_| AppError::Validation(format!("Invalid {} header", name)))
        })
        .collect::<Result<_, _>>()?;

    if values.is_empty() {
        return Err(AppError::Validation(format!("Missing {} header", name)));
    }

    Ok(values.join(", "))
}

/// Parsed Signature header
#[derive(Debug, Clone)]
pub struct ParsedSignature {
    /// Key ID (URL to public key)
    pub key_id: String,
    /// Algorithm (usually rsa-sha256)
    pub algorithm: String,
    /// Signed header names
    pub headers: Vec<String>,
    /// Base64-encoded signature
    pub signature: String,
}

/// Parse Signature header value
///
/// # Format
/// ```text
/// keyId="...",algorithm="...",headers="...",signature="..."
/// ```
///
/// `algorithm` defaults to `rsa-sha256` and `headers` to `date` when absent.
pub fn parse_signature_header(header: &str) -> Result<ParsedSignature, AppError> {
    let mut key_id = None;
    let mut algorithm = None;
    let mut headers = None;
    let mut signature = None;

    for part in header.split(',') {
        let part = part.trim();
        if let Some((key, value)) = part.split_once('=') {
            let key = key.trim();
            let value = value.trim().trim_matches('"');

            match key {
                "keyId" => key_id = Some(value.to_string()),
                "algorithm" => algorithm = Some(value.to_ascii_lowercase()),
                "headers" => {
                    headers = Some(
                        value
                            .split_whitespace()
                            .map(|s| s.to_ascii_lowercase())
                            .collect(),
                    )
                }
                "signature" => signature = Some(value.to_string()),
                _ => {}
            }
        }
    }

    Ok(ParsedSignature {
        key_id: key_id.ok_or_else(|| AppError::Validation("Missing keyId".to_string()))?,
        algorithm: algorithm.unwrap_or_else(|| "rsa-sha256".to_string()),
        headers: headers.unwrap_or_else(|| vec!["date".to_string()]),
        signature: signature
            .ok_or_else(|| AppError::Validation("Missing signature".to_string()))?,
    })
}

/// Generate SHA-256 digest for body
///
/// # Returns
/// `SHA-256=base64(hash)`
pub fn generate_digest(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    let hash = hasher.finalize();
    format!("SHA-256={}", BASE64.encode(hash))
}
