//! Presentation of errors that reach the user, either on the terminal or as an IPC response.

use tray_engine::Error as EngineError;

pub fn print_error(err: anyhow::Error) {
    if let Some(hint) = hint_for(&err) {
        log::error!("{:?}\n  hint: {}", err, hint);
    } else {
        log::error!("{:?}", err);
    }
}

pub fn format_error(err: &anyhow::Error) -> String {
    match hint_for(err) {
        Some(hint) => format!("{:#}\n  hint: {}", err, hint),
        None => format!("{:#}", err),
    }
}

/// Some engine errors have an obvious next step for the user.
fn hint_for(err: &anyhow::Error) -> Option<&'static str> {
    match err.chain().find_map(|cause| cause.downcast_ref::<EngineError>())? {
        EngineError::NotInstalled(_) => Some("is the plugin's metadata file still in one of the plugin directories?"),
        EngineError::DbusError(_) => Some("is a message bus running for this session?"),
        _ => None,
    }
}
