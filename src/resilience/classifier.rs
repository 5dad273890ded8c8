//! Failure classification.
//!
//! Pure, deterministic mapping from an [`Error`] to an [`ErrorKind`] plus a
//! retryable flag. Groups are evaluated in a fixed priority order; the first
//! group whose status code or message pattern matches wins.

use crate::error_code::ErrorKind;
use crate::Error;
use once_cell::sync::Lazy;
use regex::Regex;

/// Verdict for one failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub kind: ErrorKind,
    pub retryable: bool,
}

impl Classification {
    fn of(kind: ErrorKind) -> Self {
        Self {
            kind,
            retryable: kind.retryable(),
        }
    }

    fn terminal(kind: ErrorKind) -> Self {
        Self {
            kind,
            retryable: false,
        }
    }
}

fn pattern(re: &str) -> Regex {
    Regex::new(re).expect("static classifier pattern")
}

static RATE_LIMITED: Lazy<Regex> = Lazy::new(|| {
    pattern(r"(?i)rate[\s_-]?limit|too many requests|quota|resource[\s_-]?exhausted|throttl")
});
static TIMEOUT: Lazy<Regex> =
    Lazy::new(|| pattern(r"(?i)time[\s_-]?out|timed[\s_-]?out|deadline"));
static AUTH: Lazy<Regex> = Lazy::new(|| {
    pattern(
        r"(?i)unauthori[sz]ed|forbidden|api[\s_-]?key|authenticat|permission[\s_-]denied|invalid[\s_-]credentials|access[\s_-]denied",
    )
});
static TOKEN_LIMIT: Lazy<Regex> = Lazy::new(|| {
    pattern(
        r"(?i)context[\s_-](length|window)|token[\s_-]?limit|maximum context|too many tokens|max(imum)?[\s_-]tokens?[\s_-]exceeded|prompt is too long",
    )
});
static SCHEMA_INVALID: Lazy<Regex> = Lazy::new(|| {
    pattern(r"(?i)schema|validation|invalid json|failed to parse|parse error|malformed")
});
static NETWORK: Lazy<Regex> = Lazy::new(|| {
    pattern(
        r"(?i)network|connection|econnreset|econnrefused|enotfound|eai_again|dns|socket|fetch failed|broken pipe|unreachable",
    )
});

/// Priority order of the message/status groups. This order is part of the
/// contract: a message matching several groups takes the earliest.
fn groups() -> [(ErrorKind, &'static Lazy<Regex>); 6] {
    [
        (ErrorKind::RateLimited, &RATE_LIMITED),
        (ErrorKind::Timeout, &TIMEOUT),
        (ErrorKind::Auth, &AUTH),
        (ErrorKind::TokenLimit, &TOKEN_LIMIT),
        (ErrorKind::SchemaInvalid, &SCHEMA_INVALID),
        (ErrorKind::Network, &NETWORK),
    ]
}

/// Classify a raw failure described by an optional status code and a message.
pub fn classify_message(status: Option<u16>, message: &str) -> Classification {
    let status_kind = status.and_then(ErrorKind::from_http_status);
    for (kind, re) in groups() {
        if status_kind == Some(kind) || re.is_match(message) {
            return Classification::of(kind);
        }
    }
    Classification::of(ErrorKind::Unknown)
}

/// Classify an error raised while attempting a provider call.
pub fn classify(err: &Error) -> Classification {
    match err {
        Error::Provider {
            message, status, ..
        } => classify_message(*status, message),
        Error::Timeout { .. } => Classification::of(ErrorKind::Timeout),
        Error::ModelResolution { kind, .. } => Classification::of(*kind),
        Error::Validation { .. } | Error::Serialization(_) => {
            Classification::of(ErrorKind::SchemaInvalid)
        }
        Error::Exhausted { last, .. } => classify(last),
        Error::Cancelled => Classification::terminal(ErrorKind::Unknown),
        Error::CircuitOpen { .. } => Classification::terminal(ErrorKind::Network),
        Error::Io(io) => classify_io(io),
        other => classify_message(other.status(), &other.to_string()),
    }
}

fn classify_io(err: &std::io::Error) -> Classification {
    use std::io::ErrorKind as Io;
    match err.kind() {
        Io::TimedOut => Classification::of(ErrorKind::Timeout),
        Io::ConnectionRefused
        | Io::ConnectionReset
        | Io::ConnectionAborted
        | Io::NotConnected
        | Io::BrokenPipe
        | Io::AddrNotAvailable => Classification::of(ErrorKind::Network),
        Io::PermissionDenied => Classification::of(ErrorKind::Auth),
        _ => classify_message(None, &err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind_of(msg: &str) -> ErrorKind {
        classify(&Error::provider(msg)).kind
    }

    #[test]
    fn test_message_groups() {
        assert_eq!(kind_of("Rate limit reached for requests"), ErrorKind::RateLimited);
        assert_eq!(kind_of("You exceeded your current quota"), ErrorKind::RateLimited);
        assert_eq!(kind_of("RESOURCE_EXHAUSTED"), ErrorKind::RateLimited);
        assert_eq!(kind_of("Request timed out"), ErrorKind::Timeout);
        assert_eq!(kind_of("deadline exceeded"), ErrorKind::Timeout);
        assert_eq!(kind_of("Incorrect API key provided"), ErrorKind::Auth);
        assert_eq!(kind_of("401 Unauthorized"), ErrorKind::Auth);
        assert_eq!(
            kind_of("This model's maximum context length is 8192 tokens"),
            ErrorKind::TokenLimit
        );
        assert_eq!(kind_of("output failed schema validation"), ErrorKind::SchemaInvalid);
        assert_eq!(kind_of("read ECONNRESET"), ErrorKind::Network);
        assert_eq!(kind_of("fetch failed"), ErrorKind::Network);
        assert_eq!(kind_of("something odd happened"), ErrorKind::Unknown);
    }

    #[test]
    fn test_priority_rate_limit_over_network() {
        let c = classify(&Error::provider("network error: rate limit exceeded"));
        assert_eq!(c.kind, ErrorKind::RateLimited);
        assert!(c.retryable);
    }

    #[test]
    fn test_priority_timeout_over_network() {
        assert_eq!(kind_of("connection timeout"), ErrorKind::Timeout);
    }

    #[test]
    fn test_status_codes() {
        let c = classify(&Error::provider_status(429, "slow down"));
        assert_eq!(c.kind, ErrorKind::RateLimited);
        let c = classify(&Error::provider_status(401, "nope"));
        assert_eq!(c.kind, ErrorKind::Auth);
        assert!(!c.retryable);
        let c = classify(&Error::provider_status(503, "service unavailable"));
        assert_eq!(c.kind, ErrorKind::Network);
        // A rate-limit message outranks a network status.
        let c = classify(&Error::provider_status(503, "quota exceeded"));
        assert_eq!(c.kind, ErrorKind::RateLimited);
    }

    #[test]
    fn test_non_retryable_kinds() {
        assert!(!classify(&Error::provider("invalid api key")).retryable);
        assert!(!classify(&Error::provider("context length exceeded")).retryable);
        assert!(classify(&Error::provider("mystery")).retryable);
    }

    #[test]
    fn test_typed_variants() {
        assert_eq!(
            classify(&Error::Timeout { elapsed_ms: 10 }).kind,
            ErrorKind::Timeout
        );
        assert_eq!(
            classify(&Error::validation_with_context("bad shape", Default::default())).kind,
            ErrorKind::SchemaInvalid
        );
        let resolution = Error::ModelResolution {
            provider: "openai".into(),
            model: "gpt-4o".into(),
            kind: ErrorKind::Auth,
            message: "missing key".into(),
        };
        assert_eq!(classify(&resolution).kind, ErrorKind::Auth);
        assert!(!classify(&Error::Cancelled).retryable);
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(classify(&Error::Io(io)).kind, ErrorKind::Network);
    }

    #[test]
    fn test_every_group_pattern_compiles() {
        for (kind, re) in groups() {
            assert!(!Lazy::force(re).as_str().is_empty(), "{kind:?}");
        }
    }

    #[test]
    fn test_deterministic() {
        let inputs = [
            "rate limit",
            "timeout",
            "bad api key",
            "token limit",
            "schema mismatch",
            "dns failure",
            "???",
        ];
        for msg in inputs {
            let err = Error::provider(msg);
            assert_eq!(classify(&err), classify(&err));
        }
    }
}
