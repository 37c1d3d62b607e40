//! Bucket key generation.

/// A key that identifies one policy-scoped rate limit bucket.
///
/// Policy checks are scoped by policy name so the same client can hold
/// independent quotas under different policies. Direct checks store the
/// caller's key as given.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey {
    /// The policy this bucket belongs to
    pub scope: String,
    /// The client identifier supplied by the caller
    pub client: String,
}

impl BucketKey {
    /// A bucket for a client under a named policy.
    pub fn scoped(scope: &str, client: &str) -> Self {
        Self {
            scope: scope.to_string(),
            client: client.to_string(),
        }
    }

    /// The string under which the bucket is stored.
    pub fn to_string_key(&self) -> String {
        format!("{}:{}", self.scope, self.client)
    }
}

impl std::fmt::Display for BucketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}
