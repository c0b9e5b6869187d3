use crate::error::TransportError;

pub const FETCH_ERROR_MESSAGE: &str = "Could not fetch weather data";

/// Channel used to surface failures to whoever operates the module.
pub trait Notifier: Send + Sync {
    fn fetch_failed(&self, module: &str, error: &TransportError);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn fetch_failed(&self, module: &str, error: &TransportError) {
        tracing::error!(module, error = %error, "{FETCH_ERROR_MESSAGE}");
    }
}
