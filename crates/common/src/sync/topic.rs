//! Filesystem path ↔ broker topic mapping
//!
//! A topic is the path with the namespace prefix in front:
//! `/a/b/c` ↔ `fs/a/b/c`. The separator is `/` on both sides.

use crate::store::path;

/// Prefix used when none is configured
pub const DEFAULT_TOPIC_PREFIX: &str = "fs";

/// Maps paths to topics and back for one namespace prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMapper {
    prefix: String,
}

impl Default for TopicMapper {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC_PREFIX)
    }
}

impl TopicMapper {
    /// Surrounding slashes on the prefix are ignored
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Wildcard filter covering the whole namespace
    pub fn subscription(&self) -> String {
        format!("{}/#", self.prefix)
    }

    /// Topic a path publishes to
    pub fn path_to_topic(&self, path: &str) -> String {
        format!("{}{}", self.prefix, path::normalize(path))
    }

    /// Path segments addressed by a topic
    ///
    /// Returns `None` for topics outside the namespace and for topics that
    /// name no node (the bare prefix).
    pub fn topic_to_segments<'t>(&self, topic: &'t str) -> Option<Vec<&'t str>> {
        let rest = topic.strip_prefix(self.prefix.as_str())?.strip_prefix('/')?;
        let segments = path::segments(rest);
        if segments.is_empty() {
            return None;
        }
        Some(segments)
    }

    /// Absolute path addressed by a topic
    pub fn topic_to_path(&self, topic: &str) -> Option<String> {
        self.topic_to_segments(topic)
            .map(|segments| format!("/{}", segments.join("/")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_to_topic() {
        let topics = TopicMapper::default();
        assert_eq!(topics.path_to_topic("/a/b/c"), "fs/a/b/c");
        assert_eq!(topics.path_to_topic("a/b/"), "fs/a/b");
    }

    #[test]
    fn test_topic_to_path() {
        let topics = TopicMapper::default();
        assert_eq!(topics.topic_to_path("fs/a/b/c").as_deref(), Some("/a/b/c"));
        assert_eq!(topics.topic_to_path("fs/a//b").as_deref(), Some("/a/b"));
        assert_eq!(topics.topic_to_path("fs/"), None);
        assert_eq!(topics.topic_to_path("fs"), None);
        assert_eq!(topics.topic_to_path("other/a"), None);
        assert_eq!(topics.topic_to_path("fsx/a"), None);
    }

    #[test]
    fn test_subscription() {
        assert_eq!(TopicMapper::default().subscription(), "fs/#");
        assert_eq!(TopicMapper::new("/team/fs/").subscription(), "team/fs/#");
    }

    #[test]
    fn test_mapping_is_stable() {
        let topics = TopicMapper::new("team/fs");
        for path in ["/x", "/a/b/c", "/deep/er/path.txt", "/with space/é"] {
            let topic = topics.path_to_topic(path);
            let back = topics.topic_to_path(&topic).unwrap();
            assert_eq!(back, path);
            assert_eq!(topics.path_to_topic(&back), topic);
        }
    }
}
