//! Rate-limiting stack (C4/C5/C6): token bucket, sliding window, and the
//! combined limiter that composes both with auto-throttle's advisory RPM.

pub mod combined;
pub mod sliding_window;
pub mod token_bucket;

pub use combined::CombinedLimiter;
pub use sliding_window::SlidingWindow;
pub use token_bucket::TokenBucket;
