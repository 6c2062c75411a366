//! Hash map alias that switches between gxhash and std based on the `gxhash`
//! feature. The delta codec's block lookup table is the hot path that
//! benefits; builds without AES-NI/SSE2 fall back to the std hasher.

#[cfg(feature = "gxhash")]
pub use gxhash::{HashMap, HashMapExt};

#[cfg(not(feature = "gxhash"))]
pub type HashMap<K, V> = std::collections::HashMap<K, V>;

/// Constructor shim so call sites read the same under either hasher
#[cfg(not(feature = "gxhash"))]
pub trait HashMapExt {
    /// Creates a new HashMap with specified capacity
    fn with_capacity(capacity: usize) -> Self;
}

#[cfg(not(feature = "gxhash"))]
impl<K, V> HashMapExt for std::collections::HashMap<K, V> {
    fn with_capacity(capacity: usize) -> Self {
        std::collections::HashMap::with_capacity(capacity)
    }
}
