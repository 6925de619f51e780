//! Attempt timing
//!
//! `measure_time_async!` awaits a future and emits a `tracing` event with the
//! operation label and elapsed milliseconds. Extra `key = value` fields are
//! forwarded to the event.
//!
//! ```rust,no_run
//! use tt_recovery::measure_time_async;
//!
//! # async fn probe() -> u32 { 1 }
//! # async fn demo() {
//! let checked = measure_time_async!("probe_files", probe(), fingerprint = "abc").await;
//! # }
//! ```

#[macro_export]
macro_rules! measure_time_async {
    ($label:expr, $future:expr $(, $field:ident = $value:expr)* $(,)?) => {
        async {
            let __start = ::tokio::time::Instant::now();
            let __result = $future.await;
            let __elapsed = __start.elapsed();
            ::tracing::debug!(
                operation = $label,
                elapsed_ms = __elapsed.as_millis() as u64,
                $($field = $value,)*
                "Operation completed"
            );
            __result
        }
    };
}
