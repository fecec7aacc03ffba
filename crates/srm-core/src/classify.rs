// SPDX-License-Identifier: MIT OR Apache-2.0
//! Wire-response classification, PII sanitation, and the retry
//! backoff schedule.
//!
//! Every regulator response — including transport failures — maps into
//! a closed set of [`ErrorCode`]s. The classification drives three
//! things downstream: the queue item's state transition, the tenant
//! circuit breaker, and the operator-visible failure message.

use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::LazyLock;

/// Base delay of the retry schedule, in seconds.
pub const BACKOFF_BASE_SECS: u64 = 60;

/// Ceiling of the retry schedule, in seconds.
pub const BACKOFF_MAX_SECS: u64 = 3600;

/// Maximum stored length of a sanitized message.
const MESSAGE_MAX_LEN: usize = 500;

// ---------------------------------------------------------------------------
// Transport + response envelope
// ---------------------------------------------------------------------------

/// A transport-layer failure: the request never produced an HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportError {
    /// The request-level timeout elapsed.
    Timeout,
    /// Connection, DNS, or TLS failure.
    Network,
}

impl TransportError {
    /// Raw code recorded in audit logs (`TIMEOUT` / `NETWORK_ERROR`).
    #[must_use]
    pub fn raw_code(&self) -> &'static str {
        match self {
            Self::Timeout => "TIMEOUT",
            Self::Network => "NETWORK_ERROR",
        }
    }
}

/// The outcome of one POST to the regulator, as seen by the classifier.
///
/// Transport failures carry HTTP status `0` and no body. HTTP outcomes
/// carry the status, the raw body text, and the parsed JSON body when
/// parsing succeeded.
#[derive(Debug, Clone)]
pub struct RegulatorResponse {
    /// HTTP status, or 0 for transport failures.
    pub http_status: u16,
    /// Parsed JSON body, when the body parsed.
    pub body: Option<Value>,
    /// Raw body text, retained even when JSON parsing fails.
    pub raw_body: String,
    /// Transport failure, when no HTTP exchange completed.
    pub transport_error: Option<TransportError>,
}

impl RegulatorResponse {
    /// Build from an HTTP status and raw body, attempting JSON parsing.
    #[must_use]
    pub fn from_http(http_status: u16, raw_body: String) -> Self {
        let body = serde_json::from_str(&raw_body).ok();
        Self {
            http_status,
            body,
            raw_body,
            transport_error: None,
        }
    }

    /// Build from a transport failure.
    #[must_use]
    pub fn from_transport(error: TransportError) -> Self {
        Self {
            http_status: 0,
            body: None,
            raw_body: String::new(),
            transport_error: Some(error),
        }
    }
}

/// One entry of the regulator's `listErr` array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    /// Error identifier.
    #[serde(default)]
    pub id: Option<String>,
    /// Regulator return code.
    #[serde(rename = "codRetour", default)]
    pub cod_retour: Option<String>,
    /// Human-readable message.
    #[serde(default)]
    pub mess: Option<String>,
}

/// Extract `listErr` entries from a response body, wherever the
/// regulator nested them (`retourTrans.retourTransActu` for
/// transactions, `retourFer.retourFerActu` for closings, or top-level).
#[must_use]
pub fn wire_errors(body: &Value) -> Vec<WireError> {
    let candidates = [
        body.pointer("/retourTrans/retourTransActu/listErr"),
        body.pointer("/retourFer/retourFerActu/listErr"),
        body.get("listErr"),
    ];
    for list in candidates.into_iter().flatten() {
        if let Some(items) = list.as_array() {
            return items
                .iter()
                .filter_map(|v| serde_json::from_value(v.clone()).ok())
                .collect();
        }
    }
    Vec::new()
}

/// Extract the regulator-assigned transaction id (`psiNoTrans` for
/// transactions, `psiNoFer` for closings) from a response body.
#[must_use]
pub fn regulator_tx_id(body: &Value) -> Option<String> {
    let candidates = [
        body.pointer("/retourTrans/retourTransActu/psiNoTrans"),
        body.pointer("/retourFer/retourFerActu/psiNoFer"),
    ];
    candidates
        .into_iter()
        .flatten()
        .find_map(|v| match v {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

// ---------------------------------------------------------------------------
// Error codes
// ---------------------------------------------------------------------------

/// The closed set of classified outcome codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// 2xx and the body acknowledges the submission.
    Ok,
    /// Timeout, network failure, or 5xx — worth retrying.
    TempUnavailable,
    /// 409: the regulator already holds this submission.
    Duplicate,
    /// 429: slow down and retry.
    RateLimit,
    /// 4xx with a signature-related rejection.
    InvalidSignature,
    /// 4xx with a header- or identifier-related rejection.
    InvalidHeader,
    /// Anything else.
    Unknown,
}

impl ErrorCode {
    /// Stable uppercase code string used in storage and audit logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::TempUnavailable => "TEMP_UNAVAILABLE",
            Self::Duplicate => "DUPLICATE",
            Self::RateLimit => "RATE_LIMIT",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::InvalidHeader => "INVALID_HEADER",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Whether the worker should schedule another attempt.
    #[must_use]
    pub fn retryable(&self) -> bool {
        matches!(self, Self::TempUnavailable | Self::RateLimit)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A classified response outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedError {
    /// Classified code.
    pub code: ErrorCode,
    /// Whether another attempt should be scheduled.
    pub retryable: bool,
    /// HTTP status of the attempt (0 for transport failures).
    pub http_status: u16,
    /// Raw regulator return code or transport code, when present.
    pub raw_code: Option<String>,
    /// Sanitized raw message, when present.
    pub raw_message: Option<String>,
}

impl ClassifiedError {
    /// `true` when the submission was acknowledged.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.code == ErrorCode::Ok
    }

    /// Operator-facing description of this outcome.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self.code {
            ErrorCode::Ok => "delivered".to_string(),
            ErrorCode::TempUnavailable | ErrorCode::RateLimit => {
                "regulator temporarily unavailable; will retry".to_string()
            }
            ErrorCode::Duplicate => "already submitted".to_string(),
            ErrorCode::InvalidSignature | ErrorCode::InvalidHeader | ErrorCode::Unknown => {
                match &self.raw_message {
                    Some(m) => format!("submission rejected: {m}"),
                    None => "submission rejected".to_string(),
                }
            }
        }
    }
}

/// Operator-facing message once the retry budget is exhausted.
#[must_use]
pub fn exhausted_message(attempts: u32) -> String {
    format!("delivery failed after {attempts} attempts")
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

const SIGNATURE_KEYWORDS: &[&str] = &["signa", "empreinte", "fingerprint"];
const HEADER_KEYWORDS: &[&str] = &[
    "entet", "header", "idapprl", "idsev", "idversi", "codcertif", "idpartn", "envirn",
    "identifiant",
];

/// Map a wire response onto the closed [`ErrorCode`] set.
#[must_use]
pub fn classify(response: &RegulatorResponse) -> ClassifiedError {
    if let Some(transport) = response.transport_error {
        return ClassifiedError {
            code: ErrorCode::TempUnavailable,
            retryable: true,
            http_status: 0,
            raw_code: Some(transport.raw_code().to_string()),
            raw_message: None,
        };
    }

    let errors = response.body.as_ref().map(wire_errors).unwrap_or_default();
    let raw_code = errors.iter().find_map(|e| e.cod_retour.clone());
    let raw_message = first_message(&errors, &response.raw_body);
    let status = response.http_status;

    let code = match status {
        200..=299 if errors.is_empty() => ErrorCode::Ok,
        409 => ErrorCode::Duplicate,
        429 => ErrorCode::RateLimit,
        500..=599 => ErrorCode::TempUnavailable,
        _ => {
            // 4xx — and 2xx bodies that nonetheless carry listErr
            // entries — classify by the rejection's keywords.
            let haystack = error_haystack(&errors, &response.raw_body);
            if matches_any(&haystack, SIGNATURE_KEYWORDS) {
                ErrorCode::InvalidSignature
            } else if matches_any(&haystack, HEADER_KEYWORDS) {
                ErrorCode::InvalidHeader
            } else {
                ErrorCode::Unknown
            }
        }
    };

    ClassifiedError {
        code,
        retryable: code.retryable(),
        http_status: status,
        raw_code,
        raw_message: raw_message.map(|m| sanitize_message(&m)),
    }
}

fn first_message(errors: &[WireError], raw_body: &str) -> Option<String> {
    errors
        .iter()
        .find_map(|e| e.mess.clone())
        .or_else(|| (!raw_body.is_empty()).then(|| raw_body.to_string()))
}

fn error_haystack(errors: &[WireError], raw_body: &str) -> String {
    let mut haystack = String::new();
    for e in errors {
        if let Some(c) = &e.cod_retour {
            haystack.push_str(c);
            haystack.push(' ');
        }
        if let Some(m) = &e.mess {
            haystack.push_str(m);
            haystack.push(' ');
        }
    }
    haystack.push_str(raw_body);
    haystack.to_lowercase()
}

fn matches_any(haystack: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| haystack.contains(k))
}

// ---------------------------------------------------------------------------
// PII sanitation
// ---------------------------------------------------------------------------

static UUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}\b")
        .unwrap()
});
static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());
static IBAN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z]{2}\d{2}[A-Z0-9]{10,30}\b").unwrap());
static CARD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:\d[ -]?){12}\d{1,7}\b").unwrap());
static SSN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap());
static SIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{3}[ -]\d{3}[ -]\d{3}\b").unwrap());
static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\+?\d{0,3}[-. (]*\d{3}[-. )]+\d{3}[-. ]?\d{4}\b").unwrap()
});

/// Redact personally identifiable patterns and truncate.
///
/// Each recognized pattern is replaced with its bracketed tag; the
/// result is truncated to 500 characters with a trailing ellipsis.
#[must_use]
pub fn sanitize_message(message: &str) -> String {
    let mut s = UUID_RE.replace_all(message, "[UUID]").into_owned();
    s = EMAIL_RE.replace_all(&s, "[EMAIL]").into_owned();
    s = IBAN_RE.replace_all(&s, "[IBAN]").into_owned();
    s = CARD_RE.replace_all(&s, "[CARD]").into_owned();
    s = SSN_RE.replace_all(&s, "[SSN]").into_owned();
    s = SIN_RE.replace_all(&s, "[SIN]").into_owned();
    s = PHONE_RE.replace_all(&s, "[PHONE]").into_owned();
    if s.chars().count() > MESSAGE_MAX_LEN {
        let mut truncated: String = s.chars().take(MESSAGE_MAX_LEN).collect();
        truncated.push('…');
        return truncated;
    }
    s
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// The jitterless backoff window for a retry count: `(lower, upper)`
/// bounds in milliseconds at jitter factors 0.9 and 1.1.
#[must_use]
pub fn backoff_window(retry_count: u32) -> (u64, u64) {
    let exp = BACKOFF_BASE_SECS.saturating_mul(1u64 << retry_count.min(32));
    let capped = exp.min(BACKOFF_MAX_SECS) * 1000;
    ((capped as f64 * 0.9) as u64, (capped as f64 * 1.1) as u64)
}

/// Jittered exponential backoff in milliseconds:
/// `min(60 · 2ⁿ, 3600) × uniform(0.9, 1.1) × 1000`.
#[must_use]
pub fn backoff_ms(retry_count: u32) -> u64 {
    let exp = BACKOFF_BASE_SECS.saturating_mul(1u64 << retry_count.min(32));
    let capped = exp.min(BACKOFF_MAX_SECS) * 1000;
    let jitter: f64 = rand::thread_rng().gen_range(0.9..=1.1);
    (capped as f64 * jitter) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn transport_failures_are_retryable_with_status_zero() {
        let c = classify(&RegulatorResponse::from_transport(TransportError::Timeout));
        assert_eq!(c.code, ErrorCode::TempUnavailable);
        assert!(c.retryable);
        assert_eq!(c.http_status, 0);
        assert_eq!(c.raw_code.as_deref(), Some("TIMEOUT"));
    }

    #[test]
    fn success_with_psi_number() {
        let body = json!({"retourTrans": {"retourTransActu": {"psiNoTrans": "PSI-001"}}});
        let c = classify(&RegulatorResponse::from_http(200, body.to_string()));
        assert_eq!(c.code, ErrorCode::Ok);
        assert!(!c.retryable);
        assert_eq!(regulator_tx_id(&body).as_deref(), Some("PSI-001"));
    }

    #[test]
    fn duplicate_and_rate_limit_by_status() {
        let c = classify(&RegulatorResponse::from_http(409, String::new()));
        assert_eq!(c.code, ErrorCode::Duplicate);
        assert!(!c.retryable);
        let c = classify(&RegulatorResponse::from_http(429, String::new()));
        assert_eq!(c.code, ErrorCode::RateLimit);
        assert!(c.retryable);
    }

    #[test]
    fn signature_keyword_wins_over_header() {
        let body = json!({"listErr": [{"id": "e1", "codRetour": "40", "mess": "signature invalide"}]});
        let c = classify(&RegulatorResponse::from_http(400, body.to_string()));
        assert_eq!(c.code, ErrorCode::InvalidSignature);
        assert_eq!(c.raw_code.as_deref(), Some("40"));
    }

    #[test]
    fn header_keywords_classify_as_invalid_header() {
        let body = json!({"listErr": [{"id": "e2", "codRetour": "21", "mess": "IDAPPRL manquant"}]});
        let c = classify(&RegulatorResponse::from_http(400, body.to_string()));
        assert_eq!(c.code, ErrorCode::InvalidHeader);
    }

    #[test]
    fn five_hundreds_are_temporarily_unavailable() {
        let c = classify(&RegulatorResponse::from_http(503, "gateway".into()));
        assert_eq!(c.code, ErrorCode::TempUnavailable);
        assert!(c.retryable);
    }

    #[test]
    fn other_4xx_is_unknown_terminal() {
        let c = classify(&RegulatorResponse::from_http(404, "not found".into()));
        assert_eq!(c.code, ErrorCode::Unknown);
        assert!(!c.retryable);
    }

    #[test]
    fn nested_closing_errors_are_found() {
        let body = json!({"retourFer": {"retourFerActu": {"listErr": [
            {"id": "x", "codRetour": "77", "mess": "ferme"}
        ]}}});
        let errs = wire_errors(&body);
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].cod_retour.as_deref(), Some("77"));
    }

    #[test]
    fn sanitizes_each_pattern() {
        let cases = [
            ("contact ops@example.com now", "[EMAIL]", "ops@example.com"),
            ("card 4111 1111 1111 1111 declined", "[CARD]", "4111"),
            ("ssn 123-45-6789 leaked", "[SSN]", "123-45-6789"),
            ("sin 046 454 286 on file", "[SIN]", "046 454 286"),
            ("iban DE89370400440532013000 bad", "[IBAN]", "DE8937"),
            (
                "ref 550e8400-e29b-41d4-a716-446655440000 missing",
                "[UUID]",
                "550e8400",
            ),
            ("call (514) 555-0199 for help", "[PHONE]", "555-0199"),
        ];
        for (input, tag, fragment) in cases {
            let out = sanitize_message(input);
            assert!(out.contains(tag), "{input} → {out}");
            assert!(!out.contains(fragment), "{input} → {out}");
        }
    }

    #[test]
    fn truncates_long_messages_with_ellipsis() {
        let long = "x".repeat(800);
        let out = sanitize_message(&long);
        assert_eq!(out.chars().count(), 501);
        assert!(out.ends_with('…'));
    }

    #[test]
    fn backoff_window_doubles_then_caps() {
        assert_eq!(backoff_window(0), (54_000, 66_000));
        assert_eq!(backoff_window(1), (108_000, 132_000));
        assert_eq!(backoff_window(2), (216_000, 264_000));
        // 60 · 2⁸ = 15360s caps at 3600s.
        assert_eq!(backoff_window(8), (3_240_000, 3_960_000));
    }

    #[test]
    fn backoff_stays_inside_its_window() {
        for n in 0..12 {
            let (lo, hi) = backoff_window(n);
            for _ in 0..16 {
                let ms = backoff_ms(n);
                assert!(ms >= lo && ms <= hi, "retry {n}: {ms} outside [{lo}, {hi}]");
            }
        }
    }

    #[test]
    fn user_messages_follow_the_taxonomy() {
        let c = classify(&RegulatorResponse::from_http(503, String::new()));
        assert_eq!(c.user_message(), "regulator temporarily unavailable; will retry");
        let c = classify(&RegulatorResponse::from_http(409, String::new()));
        assert_eq!(c.user_message(), "already submitted");
        assert_eq!(exhausted_message(4), "delivery failed after 4 attempts");
    }
}
