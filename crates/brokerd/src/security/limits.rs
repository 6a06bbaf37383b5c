//! Structural bounds applied to request parameters.

/// Limits enforced on `params` before content screening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateLimits {
    /// Maximum nesting depth of arrays and objects. The `params` value itself
    /// sits at depth 1.
    pub max_depth: usize,
    /// Maximum number of elements in any array.
    pub max_array_len: usize,
    /// Maximum byte length of any string, keys included.
    pub max_string_bytes: usize,
    /// Maximum number of top-level parameters.
    pub max_params: usize,
}

impl GateLimits {
    /// Default nesting depth.
    pub const DEFAULT_MAX_DEPTH: usize = 10;
    /// Default array length.
    pub const DEFAULT_MAX_ARRAY_LEN: usize = 10_000;
    /// Default string length (1 MiB).
    pub const DEFAULT_MAX_STRING_BYTES: usize = 1024 * 1024;
    /// Default top-level parameter count.
    pub const DEFAULT_MAX_PARAMS: usize = 100;
}

impl Default for GateLimits {
    fn default() -> Self {
        Self {
            max_depth: Self::DEFAULT_MAX_DEPTH,
            max_array_len: Self::DEFAULT_MAX_ARRAY_LEN,
            max_string_bytes: Self::DEFAULT_MAX_STRING_BYTES,
            max_params: Self::DEFAULT_MAX_PARAMS,
        }
    }
}
