/// Logs a finished step. The CLI formatter renders these with the `[✓]` marker.
#[macro_export]
macro_rules! success {
    ($($arg:tt)+) => {
        $crate::tracing::info!(target: "scanai::success", $($arg)+)
    };
}
