//! Bus events and the rules deciding which ones call for a resync.

use crate::config::SyncConfig;
use crate::resolver::GroupSpec;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeSet;

/// One message from the account service bus.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BusEvent {
    pub topic: String,
    #[serde(default)]
    pub msg: serde_json::Value,
}

impl BusEvent {
    fn group(&self) -> Option<&str> {
        self.msg.get("group").and_then(serde_json::Value::as_str)
    }

    fn user(&self) -> Option<&str> {
        self.msg.get("user").and_then(serde_json::Value::as_str)
    }

    fn fields(&self) -> impl Iterator<Item = &str> {
        self.msg
            .get("fields")
            .and_then(serde_json::Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(serde_json::Value::as_str)
    }
}

/// Why an event calls for a resync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResyncTrigger {
    /// Sponsorship changed in a synchronized group.
    Group(String),
    /// A watched attribute of a user changed.
    UserFields {
        user: Option<String>,
        fields: Vec<String>,
    },
}

#[derive(Debug, Clone)]
pub struct EventFilter {
    group_topic: Regex,
    user_topic: Regex,
    groups: BTreeSet<String>,
    /// A group selector is configured, so any group may be synchronized.
    any_group: bool,
    watched_fields: BTreeSet<String>,
}

impl EventFilter {
    pub fn new<'a>(
        group_topic: &str,
        user_topic: &str,
        group_specs: impl IntoIterator<Item = &'a str>,
        watched_fields: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, regex::Error> {
        let mut groups = BTreeSet::new();
        let mut any_group = false;
        for spec in group_specs {
            match GroupSpec::parse(spec) {
                GroupSpec::Named(name) => {
                    groups.insert(name.to_string());
                }
                GroupSpec::AllAgreed | GroupSpec::Type(_) => any_group = true,
            }
        }
        Ok(Self {
            group_topic: Regex::new(group_topic)?,
            user_topic: Regex::new(user_topic)?,
            groups,
            any_group,
            watched_fields: watched_fields.into_iter().map(str::to_string).collect(),
        })
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self, regex::Error> {
        Self::new(
            &config.daemon.group_topic,
            &config.daemon.user_topic,
            config.all_group_specs(),
            config.daemon.watched_fields.iter().map(String::as_str),
        )
    }

    /// The reason `event` should trigger a resync, if any.
    #[must_use]
    pub fn classify(&self, event: &BusEvent) -> Option<ResyncTrigger> {
        if self.group_topic.is_match(&event.topic) {
            let group = event.group()?;
            if self.any_group || self.groups.contains(group) {
                return Some(ResyncTrigger::Group(group.to_string()));
            }
            return None;
        }

        if self.user_topic.is_match(&event.topic) {
            let fields: Vec<String> = event
                .fields()
                .filter(|field| self.watched_fields.contains(*field))
                .map(str::to_string)
                .collect();
            if !fields.is_empty() {
                return Some(ResyncTrigger::UserFields {
                    user: event.user().map(str::to_string),
                    fields,
                });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn filter(specs: &[&str]) -> EventFilter {
        EventFilter::new(
            r"group\.member\.sponsor",
            r"user\.update",
            specs.iter().copied(),
            ["ssh_key", "password", "human_name"],
        )
        .unwrap()
    }

    fn event(topic: &str, msg: serde_json::Value) -> BusEvent {
        BusEvent {
            topic: topic.to_string(),
            msg,
        }
    }

    #[test]
    fn test_sponsorship_in_synchronized_group() {
        let f = filter(&["sysadmin", "packagers"]);
        let ev = event(
            "org.example.prod.fas.group.member.sponsor",
            json!({"agent": "x", "user": "alice", "group": "packagers"}),
        );
        assert_eq!(f.classify(&ev), Some(ResyncTrigger::Group("packagers".to_string())));
    }

    #[test]
    fn test_sponsorship_in_other_group_is_ignored() {
        let f = filter(&["sysadmin"]);
        let ev = event("fas.group.member.sponsor", json!({"group": "packagers"}));
        assert_eq!(f.classify(&ev), None);
    }

    #[test]
    fn test_selector_matches_any_group() {
        let f = filter(&["sysadmin", "@git"]);
        let ev = event("fas.group.member.sponsor", json!({"group": "packagers"}));
        assert!(f.classify(&ev).is_some());
    }

    #[test]
    fn test_user_update_on_watched_field() {
        let f = filter(&["sysadmin"]);
        let ev = event(
            "org.example.prod.fas.user.update",
            json!({"user": "alice", "fields": ["timezone", "ssh_key"]}),
        );
        assert_eq!(
            f.classify(&ev),
            Some(ResyncTrigger::UserFields {
                user: Some("alice".to_string()),
                fields: vec!["ssh_key".to_string()],
            })
        );
    }

    #[test]
    fn test_user_update_on_unwatched_fields_is_ignored() {
        let f = filter(&["sysadmin"]);
        let ev = event("fas.user.update", json!({"user": "alice", "fields": ["timezone"]}));
        assert_eq!(f.classify(&ev), None);
        let ev = event("fas.user.update", json!({"user": "alice"}));
        assert_eq!(f.classify(&ev), None);
    }

    #[test]
    fn test_unrelated_topic_is_ignored() {
        let f = filter(&["@all"]);
        let ev = event("fas.user.login", json!({"user": "alice", "group": "x", "fields": ["ssh_key"]}));
        assert_eq!(f.classify(&ev), None);
    }

    #[test]
    fn test_invalid_topic_pattern_is_error() {
        assert!(EventFilter::new("(", "x", [], []).is_err());
    }

    #[test]
    fn test_event_parses_without_msg() {
        let ev: BusEvent = serde_json::from_str(r#"{"topic": "a.b"}"#).unwrap();
        assert_eq!(ev.topic, "a.b");
        assert!(ev.msg.is_null());
    }
}
