/// Lower-case fragments that mark a failure as tied to the key (quota,
/// permission, validity) rather than to the request. Another key may succeed.
pub const RETRYABLE_SIGNALS: &[&str] = &[
    // rate limit / quota
    "429",
    "too many requests",
    "quota",
    "resource_exhausted",
    // permission / auth
    "permission_denied",
    "service_disabled",
    "has not been used in project",
    "api not enabled",
    "insufficient authentication scopes",
    // invalid key
    "api key not valid",
    "invalid api key",
    "api_key_invalid",
];

/// Case-insensitive substring match against [`RETRYABLE_SIGNALS`].
///
/// Malformed requests, provider 5xx and transport errors do not match: a
/// different key cannot fix them.
pub fn is_retryable(message: &str) -> bool {
    let message = message.to_lowercase();
    RETRYABLE_SIGNALS
        .iter()
        .any(|signal| message.contains(signal))
}
