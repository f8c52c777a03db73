/// Wall-clock port used for refill arithmetic and record expiry.
pub trait Clock: Send + Sync {
    /// Returns milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64;
}
