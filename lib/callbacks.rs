// Server push callbacks
use corelink_core::PushKind;
use serde_json::Value;
use tracing::info;

/// Handlers for unsolicited control-channel messages. They run on the
/// control receive worker, so a slow handler delays reply delivery; they must
/// not issue protocol calls on the session that owns them.
pub trait ControlCallbacks: Send + Sync {
    /// A new sender matching one of this session's receivers appeared
    fn on_subscriber(&self, msg: &Value) {
        info!(%msg, "subscriber callback");
    }

    /// Stream metadata changed
    fn on_update(&self, msg: &Value) {
        info!(%msg, "update callback");
    }

    /// A subscribed sender stopped producing data
    fn on_stale(&self, msg: &Value) {
        info!(%msg, "stale callback");
    }

    /// A subscribed sender was dropped by the broker
    fn on_dropped(&self, msg: &Value) {
        info!(%msg, "dropped callback");
    }
}

/// Callbacks that only log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogCallbacks;

impl ControlCallbacks for LogCallbacks {}

pub(crate) fn dispatch_push(callbacks: &dyn ControlCallbacks, kind: PushKind, msg: &Value) {
    match kind {
        PushKind::Subscriber => callbacks.on_subscriber(msg),
        PushKind::Update => callbacks.on_update(msg),
        PushKind::Stale => callbacks.on_stale(msg),
        PushKind::Dropped => callbacks.on_dropped(msg),
    }
}
