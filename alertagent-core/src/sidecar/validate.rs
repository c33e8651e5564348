//! Config schema validators. Hand-rolled against `serde_yaml::Value` rather
//! than the real Prometheus/Alertmanager schema crates, since the sidecar
//! only needs a handful of structural invariants, not full
//! rule-expression validation.

use crate::error::{AlertAgentError, Result};
use crate::model::ConfigType;
use serde_yaml::Value;
use tracing::warn;

pub fn validate_config(config_type: ConfigType, bytes: &[u8]) -> Result<()> {
    let value: Value = serde_yaml::from_slice(bytes)?;
    match config_type {
        ConfigType::Prometheus | ConfigType::Vmalert => validate_rule_groups(&value),
        ConfigType::Alertmanager => validate_alertmanager(&value),
    }
}

fn validate_rule_groups(value: &Value) -> Result<()> {
    let groups = value
        .get("groups")
        .and_then(Value::as_sequence)
        .ok_or_else(|| AlertAgentError::SchemaValidation("missing top-level 'groups' list".to_string()))?;

    for group in groups {
        let name = group.get("name").and_then(Value::as_str).unwrap_or_default();
        if name.is_empty() {
            return Err(AlertAgentError::SchemaValidation(
                "rule group missing non-empty 'name'".to_string(),
            ));
        }

        let rules = group.get("rules").and_then(Value::as_sequence);
        let Some(rules) = rules else {
            warn!(group = %name, "rule group has no rules; passing per empty-groups-warn rule");
            continue;
        };
        if rules.is_empty() {
            warn!(group = %name, "rule group is empty; passing per empty-groups-warn rule");
            continue;
        }

        for rule in rules {
            let expr = rule.get("expr").and_then(Value::as_str).unwrap_or_default();
            if expr.is_empty() {
                return Err(AlertAgentError::SchemaValidation(format!(
                    "rule in group '{name}' missing non-empty 'expr'"
                )));
            }
        }
    }

    Ok(())
}

fn validate_alertmanager(value: &Value) -> Result<()> {
    let route_receiver = value
        .get("route")
        .and_then(|r| r.get("receiver"))
        .and_then(Value::as_str)
        .unwrap_or_default();

    if route_receiver.is_empty() {
        return Err(AlertAgentError::SchemaValidation(
            "route.receiver must be non-empty".to_string(),
        ));
    }

    let receivers = value
        .get("receivers")
        .and_then(Value::as_sequence)
        .ok_or_else(|| AlertAgentError::SchemaValidation("at least one receiver is required".to_string()))?;

    if receivers.is_empty() {
        return Err(AlertAgentError::SchemaValidation(
            "at least one receiver is required".to_string(),
        ));
    }

    let receiver_names: Vec<&str> = receivers.iter().filter_map(|r| r.get("name").and_then(Value::as_str)).collect();

    if !receiver_names.contains(&route_receiver) {
        return Err(AlertAgentError::SchemaValidation(format!(
            "route.receiver '{route_receiver}' does not appear in receivers[*].name"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prometheus_rules_require_group_name_and_rule_expr() {
        let good = b"groups:\n- name: node\n  rules:\n  - alert: Down\n    expr: up == 0\n";
        validate_config(ConfigType::Prometheus, good).unwrap();

        let bad = b"groups:\n- name: node\n  rules:\n  - alert: Down\n    expr: \"\"\n";
        let err = validate_config(ConfigType::Prometheus, bad).unwrap_err();
        assert!(matches!(err, AlertAgentError::SchemaValidation(_)));
    }

    #[test]
    fn empty_rule_group_warns_but_passes() {
        let config = b"groups:\n- name: empty_group\n  rules: []\n";
        validate_config(ConfigType::Vmalert, config).unwrap();
    }

    #[test]
    fn alertmanager_route_receiver_must_exist_in_receivers() {
        let good = b"route:\n  receiver: default\nreceivers:\n- name: default\n";
        validate_config(ConfigType::Alertmanager, good).unwrap();

        let bad = b"route:\n  receiver: missing\nreceivers:\n- name: default\n";
        let err = validate_config(ConfigType::Alertmanager, bad).unwrap_err();
        assert!(matches!(err, AlertAgentError::SchemaValidation(_)));
    }

    #[test]
    fn alertmanager_requires_at_least_one_receiver() {
        let config = b"route:\n  receiver: default\nreceivers: []\n";
        let err = validate_config(ConfigType::Alertmanager, config).unwrap_err();
        assert!(matches!(err, AlertAgentError::SchemaValidation(_)));
    }
}
