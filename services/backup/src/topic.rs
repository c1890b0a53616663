use thiserror::Error;

const SEPARATOR: char = '/';
const SEGMENT_COUNT: usize = 3;

/// Errors raised for topics that do not follow `{root}/{device}/{sensor}`
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopicError {
    #[error("Invalid topic {topic}: expected 3 segments, got {count}")]
    SegmentCount { topic: String, count: usize },

    #[error("Invalid topic {topic}: segment {index} is empty or a relative path")]
    InvalidSegment { topic: String, index: usize },
}

/// Device and sensor identity carried by a topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicIdentity {
    pub device_name: String,
    pub sensor_name: String,
}

impl TopicIdentity {
    /// Parse `{root}/{device}/{sensor}`, ignoring leading and trailing separators.
    /// The root segment is not checked against the subscription.
    pub fn parse(topic: &str) -> Result<Self, TopicError> {
        let segments: Vec<&str> = topic.trim_matches(SEPARATOR).split(SEPARATOR).collect();

        if segments.len() != SEGMENT_COUNT {
            return Err(TopicError::SegmentCount {
                topic: topic.to_string(),
                count: segments.len(),
            });
        }

        // Device and sensor become key prefixes
        for (index, segment) in segments.iter().enumerate().skip(1) {
            if segment.is_empty() || *segment == "." || *segment == ".." {
                return Err(TopicError::InvalidSegment {
                    topic: topic.to_string(),
                    index,
                });
            }
        }

        Ok(Self {
            device_name: segments[1].to_string(),
            sensor_name: segments[2].to_string(),
        })
    }
}
