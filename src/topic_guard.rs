use std::sync::Arc;

use crate::catalog::AssignmentCatalog;
use crate::errors::IngestError;

/// Enforces the one-active-subscriber-per-topic invariant before any
/// connection is created: no two active zones may sit on the same base topic.
pub struct TopicGuard {
    catalog: Arc<dyn AssignmentCatalog>,
}

impl TopicGuard {
    pub fn new(catalog: Arc<dyn AssignmentCatalog>) -> Self {
        TopicGuard { catalog }
    }

    /// False iff another configuration-active assignment for a different
    /// zone claims `topic`. Live connection state is irrelevant here.
    pub async fn is_topic_available(
        &self,
        topic: &str,
        zone_id: &str,
    ) -> Result<bool, IngestError> {
        let conflicting = self
            .catalog
            .find_active_assignment_by_topic_and_zone(topic, zone_id)
            .await?;

        if let Some(other) = &conflicting {
            log::error!(
                "topic '{}' already claimed by assignment {} (zone {:?})",
                topic,
                other.id,
                other.zone_id
            );
        }

        Ok(conflicting.is_none())
    }
}
