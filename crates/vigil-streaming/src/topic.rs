//! Vigil Topic Addressing
//!
//! Readings are published on `<namespace>/<thing-id>/<observed-property-id>`.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::payload::ReadingError;
use vigil_catalog::ReadingAddress;

/// Thing and observed property named by a reading topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicAddress {
    pub thing_id: String,
    pub observed_property_id: String,
}

impl TopicAddress {
    pub fn parse(topic: &str, namespace: &str) -> Result<Self, ReadingError> {
        let parts: Vec<&str> = topic.split('/').collect();
        match parts.as_slice() {
            [ns, thing, property] if *ns == namespace && !thing.is_empty() && !property.is_empty() => {
                Ok(Self {
                    thing_id: thing.to_string(),
                    observed_property_id: property.to_string(),
                })
            }
            _ => Err(ReadingError::Topic(topic.to_string())),
        }
    }

    pub fn topic(&self, namespace: &str) -> String {
        format!("{}/{}/{}", namespace, self.thing_id, self.observed_property_id)
    }
}

impl From<TopicAddress> for ReadingAddress {
    fn from(address: TopicAddress) -> Self {
        ReadingAddress::ThingProperty {
            thing_id: address.thing_id,
            observed_property_id: address.observed_property_id,
        }
    }
}
