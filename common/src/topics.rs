use crate::module::ModuleId;

pub const TOPIC_ROOT: &str = "hive";

/// Retained settings record of one module.
pub fn module_state_topic(node_id: &str, id: ModuleId) -> String {
    format!("{TOPIC_ROOT}/{node_id}/module/{id}/state")
}

/// Settings requests for one module.
pub fn module_command_topic(node_id: &str, id: ModuleId) -> String {
    format!("{TOPIC_ROOT}/{node_id}/cmnd/module/{id}")
}

/// Wildcard covering every module's command topic.
pub fn command_filter(node_id: &str) -> String {
    format!("{TOPIC_ROOT}/{node_id}/cmnd/module/+")
}

pub fn node_status_topic(node_id: &str) -> String {
    format!("{TOPIC_ROOT}/{node_id}/status")
}

/// Extracts the module id from a command topic of this node.
pub fn parse_command_topic(node_id: &str, topic: &str) -> Option<ModuleId> {
    let prefix = format!("{TOPIC_ROOT}/{node_id}/cmnd/module/");
    topic.strip_prefix(&prefix)?.parse().ok().map(ModuleId)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_topics_round_trip() {
        let topic = module_command_topic("hall", ModuleId(7));
        assert_eq!(topic, "hive/hall/cmnd/module/7");
        assert_eq!(parse_command_topic("hall", &topic), Some(ModuleId(7)));
    }

    #[test]
    fn foreign_or_malformed_topics_are_ignored() {
        assert_eq!(parse_command_topic("hall", "hive/kitchen/cmnd/module/7"), None);
        assert_eq!(parse_command_topic("hall", "hive/hall/cmnd/module/x"), None);
        assert_eq!(parse_command_topic("hall", "hive/hall/cmnd/module/300"), None);
        assert_eq!(
            module_state_topic("hall", ModuleId(2)),
            "hive/hall/module/2/state"
        );
    }
}
