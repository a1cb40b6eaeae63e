//! Topic and topic-filter rules
//!
//! Topics are `/`-delimited hierarchies. Publishes always target a concrete
//! topic; subscriptions may use `+` (exactly one level) and a trailing `#`
//! (zero or more levels).

use thiserror::Error;

/// Maximum encoded length of an MQTT topic string
pub const MAX_TOPIC_LEN: usize = 65_535;

/// Validation errors for topics and topic filters
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TopicError {
    #[error("Topic cannot be empty")]
    Empty,
    #[error("Topic exceeds {MAX_TOPIC_LEN} bytes")]
    TooLong,
    #[error("Topic contains a NUL character")]
    NulCharacter,
    #[error("Publish topic '{0}' must not contain wildcards")]
    WildcardInTopic(String),
    #[error("Wildcard must occupy a whole level in filter '{0}'")]
    PartialLevelWildcard(String),
    #[error("Multi-level wildcard must be the last level in filter '{0}'")]
    MisplacedMultiLevel(String),
}

fn validate_common(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::Empty);
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(TopicError::TooLong);
    }
    if topic.contains('\0') {
        return Err(TopicError::NulCharacter);
    }
    Ok(())
}

/// Validate a concrete topic used for publishing
pub fn validate_publish_topic(topic: &str) -> Result<(), TopicError> {
    validate_common(topic)?;
    if topic.contains(['+', '#']) {
        return Err(TopicError::WildcardInTopic(topic.to_string()));
    }
    Ok(())
}

/// Validate a subscription filter
pub fn validate_topic_filter(filter: &str) -> Result<(), TopicError> {
    validate_common(filter)?;

    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;
    for (index, level) in levels.iter().enumerate() {
        if level.contains('#') {
            if *level != "#" {
                return Err(TopicError::PartialLevelWildcard(filter.to_string()));
            }
            if index != last {
                return Err(TopicError::MisplacedMultiLevel(filter.to_string()));
            }
        }
        if level.contains('+') && *level != "+" {
            return Err(TopicError::PartialLevelWildcard(filter.to_string()));
        }
    }
    Ok(())
}

/// Whether a filter contains any wildcard level
pub fn is_wildcard_filter(filter: &str) -> bool {
    filter.split('/').any(|level| level == "+" || level == "#")
}

/// Check if a concrete topic matches a topic filter.
///
/// `#` matches the parent level too, so `home/#` matches `home`.
/// Topics starting with `$` are not matched by a leading wildcard.
pub fn topic_matches_filter(topic: &str, filter: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let topic_levels: Vec<&str> = topic.split('/').collect();
    let filter_levels: Vec<&str> = filter.split('/').collect();

    let mut ti = 0;
    let mut fi = 0;

    while fi < filter_levels.len() {
        let filter_level = filter_levels[fi];

        if filter_level == "#" {
            return true;
        }

        if ti >= topic_levels.len() {
            return false;
        }

        if filter_level == "+" || filter_level == topic_levels[ti] {
            ti += 1;
            fi += 1;
        } else {
            return false;
        }
    }

    ti == topic_levels.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_exact_match() {
        assert!(topic_matches_filter("home/sensors/temperature", "home/sensors/temperature"));
        assert!(!topic_matches_filter("home/sensors/temperature", "home/sensors/humidity"));
    }

    #[test]
    fn test_multi_level_wildcard() {
        let filter = "home/sensors/#";
        assert!(topic_matches_filter("home/sensors/temperature", filter));
        assert!(topic_matches_filter("home/sensors/humidity", filter));
        assert!(topic_matches_filter("home/sensors/pressure", filter));
        assert!(topic_matches_filter("home/sensors/kitchen/temperature", filter));
        assert!(topic_matches_filter("home/sensors", filter));
        assert!(!topic_matches_filter("home/other/x", filter));
    }

    #[test]
    fn test_single_level_wildcard() {
        let filter = "home/+/temperature";
        assert!(topic_matches_filter("home/kitchen/temperature", filter));
        assert!(topic_matches_filter("home/garage/temperature", filter));
        assert!(!topic_matches_filter("home/kitchen/humidity", filter));
        assert!(!topic_matches_filter("home/kitchen/oven/temperature", filter));
    }

    #[test]
    fn test_empty_levels_are_significant() {
        assert!(topic_matches_filter("/leading", "/leading"));
        assert!(topic_matches_filter("/leading", "+/leading"));
        assert!(!topic_matches_filter("leading", "/leading"));
    }

    #[test]
    fn test_system_topics_hidden_from_leading_wildcards() {
        assert!(!topic_matches_filter("$SYS/broker/uptime", "#"));
        assert!(!topic_matches_filter("$SYS/broker/uptime", "+/broker/uptime"));
        assert!(topic_matches_filter("$SYS/broker/uptime", "$SYS/#"));
    }

    #[test]
    fn test_validate_publish_topic() {
        assert!(validate_publish_topic("sensors/climate/temperature").is_ok());
        assert_eq!(validate_publish_topic(""), Err(TopicError::Empty));
        assert!(matches!(
            validate_publish_topic("sensors/#"),
            Err(TopicError::WildcardInTopic(_))
        ));
        assert!(matches!(
            validate_publish_topic("sensors/+/x"),
            Err(TopicError::WildcardInTopic(_))
        ));
        assert_eq!(
            validate_publish_topic("bad\0topic"),
            Err(TopicError::NulCharacter)
        );
    }

    #[test]
    fn test_validate_topic_filter() {
        assert!(validate_topic_filter("home/sensors/#").is_ok());
        assert!(validate_topic_filter("home/+/temperature").is_ok());
        assert!(validate_topic_filter("#").is_ok());
        assert!(validate_topic_filter("+").is_ok());

        assert!(matches!(
            validate_topic_filter("home/#/x"),
            Err(TopicError::MisplacedMultiLevel(_))
        ));
        assert!(matches!(
            validate_topic_filter("home/sens#"),
            Err(TopicError::PartialLevelWildcard(_))
        ));
        assert!(matches!(
            validate_topic_filter("home/te+mp"),
            Err(TopicError::PartialLevelWildcard(_))
        ));
        assert_eq!(validate_topic_filter(""), Err(TopicError::Empty));
    }

    #[test]
    fn test_too_long_topic() {
        let long = "a".repeat(MAX_TOPIC_LEN + 1);
        assert_eq!(validate_publish_topic(&long), Err(TopicError::TooLong));
    }

    #[test]
    fn test_is_wildcard_filter() {
        assert!(is_wildcard_filter("home/#"));
        assert!(is_wildcard_filter("+/status"));
        assert!(!is_wildcard_filter("home/sensors/temperature"));
    }

    proptest! {
        #[test]
        fn concrete_topic_matches_itself(levels in prop::collection::vec("[a-z0-9]{1,8}", 1..6)) {
            let topic = levels.join("/");
            prop_assert!(topic_matches_filter(&topic, &topic));
        }

        #[test]
        fn hash_matches_every_descendant(
            prefix in prop::collection::vec("[a-z]{1,6}", 1..4),
            rest in prop::collection::vec("[a-z]{1,6}", 0..4),
        ) {
            let filter = format!("{}/#", prefix.join("/"));
            let mut levels = prefix.clone();
            levels.extend(rest);
            prop_assert!(topic_matches_filter(&levels.join("/"), &filter));
        }

        #[test]
        fn plus_replaces_exactly_one_level(levels in prop::collection::vec("[a-z]{1,6}", 1..6), index in 0usize..6) {
            let index = index % levels.len();
            let mut filter_levels: Vec<String> = levels.clone();
            filter_levels[index] = "+".to_string();
            let filter = filter_levels.join("/");

            prop_assert!(topic_matches_filter(&levels.join("/"), &filter));

            let mut longer = levels.clone();
            longer.push("extra".to_string());
            prop_assert!(!topic_matches_filter(&longer.join("/"), &filter));
        }
    }
}
