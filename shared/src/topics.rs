//! Topic naming and filter matching
//!
//! Devices are addressed by topic only:
//! - `devices/{id}/commands` carries commands to a device
//! - `devices/{id}/results` carries dispatch outcomes back

/// Root segment of every device topic
pub const DEVICE_ROOT: &str = "devices";

const COMMANDS: &str = "commands";
const RESULTS: &str = "results";

/// Topic a device receives commands on
pub fn command_topic(device_id: &str) -> String {
    format!("{DEVICE_ROOT}/{device_id}/{COMMANDS}")
}

/// Topic a device reports outcomes on
pub fn result_topic(device_id: &str) -> String {
    format!("{DEVICE_ROOT}/{device_id}/{RESULTS}")
}

/// Filter matching the result topics of every device
pub fn all_results_filter() -> String {
    format!("{DEVICE_ROOT}/+/{RESULTS}")
}

/// Extract the device id from a command or result topic
pub fn device_id_from_topic(topic: &str) -> Option<&str> {
    let rest = topic.strip_prefix(DEVICE_ROOT)?.strip_prefix('/')?;
    let (id, kind) = rest.rsplit_once('/')?;
    if id.is_empty() || !matches!(kind, COMMANDS | RESULTS) {
        return None;
    }
    Some(id)
}

/// A topic name that can be published to: non-empty, no wildcards, no NUL
pub fn is_valid_publish_topic(topic: &str) -> bool {
    !topic.is_empty() && !topic.contains(['+', '#', '\0'])
}

/// Check whether `topic` matches the subscription `filter`
///
/// Supports the single-level `+` and multi-level `#` wildcards.
pub fn matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.next().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
