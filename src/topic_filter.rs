// MIT License
//
// Copyright (c) 2025 Takatoshi Kondo
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! Topic filter parsing and matching.
//!
//! Levels are separated by `/`. `+` matches exactly one level, `#` matches
//! the remaining levels including the parent level (`a/#` matches `a`).
//! Empty levels are literal. Topics starting with `$` are never matched by a
//! filter whose first level is a wildcard.

/// Simple error type for topic filter and topic name validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicFilterError {
    Empty,
    MisplacedMultiLevelWildcard,
    PartialLevelWildcard,
    WildcardInTopicName,
    NullCharacter,
}

impl std::fmt::Display for TopicFilterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TopicFilterError::Empty => write!(f, "Empty topic"),
            TopicFilterError::MisplacedMultiLevelWildcard => {
                write!(f, "'#' must be the last level of a topic filter")
            }
            TopicFilterError::PartialLevelWildcard => {
                write!(f, "Wildcards must occupy an entire level")
            }
            TopicFilterError::WildcardInTopicName => {
                write!(f, "Topic names must not contain wildcards")
            }
            TopicFilterError::NullCharacter => write!(f, "Topic contains U+0000"),
        }
    }
}

impl std::error::Error for TopicFilterError {}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Level {
    Literal(String),
    SingleWildcard,
    MultiWildcard,
}

/// Validated, pre-split topic filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFilter {
    raw: String,
    levels: Vec<Level>,
}

impl TopicFilter {
    pub fn new(topic_filter: &str) -> Result<Self, TopicFilterError> {
        if topic_filter.is_empty() {
            return Err(TopicFilterError::Empty);
        }
        if topic_filter.contains('\0') {
            return Err(TopicFilterError::NullCharacter);
        }

        let segment_count = topic_filter.split('/').count();
        let mut levels = Vec::with_capacity(segment_count);

        for (i, segment) in topic_filter.split('/').enumerate() {
            let level = match segment {
                "#" => {
                    // # must be the last segment
                    if i != segment_count - 1 {
                        return Err(TopicFilterError::MisplacedMultiLevelWildcard);
                    }
                    Level::MultiWildcard
                }
                "+" => Level::SingleWildcard,
                _ if segment.contains('+') || segment.contains('#') => {
                    return Err(TopicFilterError::PartialLevelWildcard);
                }
                _ => Level::Literal(segment.to_string()),
            };
            levels.push(level);
        }

        Ok(Self {
            raw: topic_filter.to_string(),
            levels,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn has_wildcard(&self) -> bool {
        self.levels
            .iter()
            .any(|level| !matches!(level, Level::Literal(_)))
    }

    fn starts_with_wildcard(&self) -> bool {
        matches!(
            self.levels.first(),
            Some(Level::SingleWildcard | Level::MultiWildcard)
        )
    }

    /// Whether `topic` (a concrete topic name) matches this filter
    pub fn matches(&self, topic: &str) -> bool {
        if topic.starts_with('$') && self.starts_with_wildcard() {
            return false;
        }

        let mut topic_levels = topic.split('/');
        for level in &self.levels {
            match level {
                Level::MultiWildcard => return true,
                Level::SingleWildcard => {
                    if topic_levels.next().is_none() {
                        return false;
                    }
                }
                Level::Literal(expected) => match topic_levels.next() {
                    Some(actual) if actual == expected => {}
                    _ => return false,
                },
            }
        }
        topic_levels.next().is_none()
    }

    /// Level at `depth`, for trie walks
    pub(crate) fn level(&self, depth: usize) -> Option<LevelRef<'_>> {
        self.levels.get(depth).map(|level| match level {
            Level::Literal(s) => LevelRef::Literal(s),
            Level::SingleWildcard => LevelRef::SingleWildcard,
            Level::MultiWildcard => LevelRef::MultiWildcard,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LevelRef<'a> {
    Literal(&'a str),
    SingleWildcard,
    MultiWildcard,
}

impl std::fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Validate a PUBLISH topic name
pub fn validate_topic_name(topic: &str) -> Result<(), TopicFilterError> {
    if topic.is_empty() {
        return Err(TopicFilterError::Empty);
    }
    if topic.contains('\0') {
        return Err(TopicFilterError::NullCharacter);
    }
    if topic.contains('+') || topic.contains('#') {
        return Err(TopicFilterError::WildcardInTopicName);
    }
    Ok(())
}

/// Convenience for one-off checks
pub fn topic_matches(topic_filter: &str, topic: &str) -> bool {
    TopicFilter::new(topic_filter)
        .map(|filter| filter.matches(topic))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filters() {
        assert_eq!(TopicFilter::new(""), Err(TopicFilterError::Empty));
        assert_eq!(
            TopicFilter::new("a/#/b"),
            Err(TopicFilterError::MisplacedMultiLevelWildcard)
        );
        assert_eq!(
            TopicFilter::new("#/#"),
            Err(TopicFilterError::MisplacedMultiLevelWildcard)
        );
        assert_eq!(
            TopicFilter::new("a/b+"),
            Err(TopicFilterError::PartialLevelWildcard)
        );
        assert_eq!(
            TopicFilter::new("a#"),
            Err(TopicFilterError::PartialLevelWildcard)
        );
    }

    #[test]
    fn test_valid_filters() {
        for filter in ["#", "+", "/", "a//b", "+/+", "a/+/#", "$SYS/#", "sport/tennis/+"] {
            assert!(TopicFilter::new(filter).is_ok(), "{filter} should be valid");
        }
    }

    #[test]
    fn test_wildcard_matching() {
        assert!(topic_matches("a/+/c", "a/b/c"));
        assert!(!topic_matches("a/+/c", "a/b/d"));
        assert!(!topic_matches("a/+/c", "a/b/c/d"));
        assert!(topic_matches("a/#", "a"));
        assert!(topic_matches("a/#", "a/b/c"));
        assert!(topic_matches("#", "a/b"));
        assert!(!topic_matches("a/b", "a/b/c"));
        assert!(topic_matches("+/+", "/finance"));
        assert!(topic_matches("/+", "/finance"));
        assert!(!topic_matches("+", "/finance"));
    }

    #[test]
    fn test_empty_levels_are_literal() {
        assert!(topic_matches("a//b", "a//b"));
        assert!(!topic_matches("a//b", "a/b"));
        assert!(topic_matches("a/+/b", "a//b"));
    }

    #[test]
    fn test_dollar_topics() {
        assert!(!topic_matches("#", "$SYS/x"));
        assert!(!topic_matches("+/x", "$SYS/x"));
        assert!(topic_matches("$SYS/#", "$SYS/x"));
        assert!(topic_matches("$SYS/+", "$SYS/x"));
    }

    #[test]
    fn test_topic_name_validation() {
        assert!(validate_topic_name("a/b").is_ok());
        assert!(validate_topic_name("/").is_ok());
        assert_eq!(validate_topic_name(""), Err(TopicFilterError::Empty));
        assert_eq!(
            validate_topic_name("a/+"),
            Err(TopicFilterError::WildcardInTopicName)
        );
    }
}
