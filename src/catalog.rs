use async_trait::async_trait;
use bson::oid::ObjectId;
use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::{Collection, Database};

use crate::errors::IngestError;
use crate::models::{GatewayAssignment, GatewayConfigDoc, ZoneGatewayDoc};

/// Read side of the zone/gateway catalog the platform maintains. The engine
/// only ever consumes it; activation and deactivation are written by the
/// platform's CRUD surface.
#[async_trait]
pub trait AssignmentCatalog: Send + Sync {
    async fn list_active_assignments(&self) -> Result<Vec<GatewayAssignment>, IngestError>;

    /// Finds an active assignment that configures `topic` for a zone other
    /// than `zone_id`. `Some` means the topic is already claimed elsewhere.
    /// Evaluated against the configured active flag, never live connection
    /// state: a zone keeps its claim while its connection is still forming
    /// or dropped.
    async fn find_active_assignment_by_topic_and_zone(
        &self,
        topic: &str,
        zone_id: &str,
    ) -> Result<Option<GatewayAssignment>, IngestError>;

    async fn is_assignment_active(&self, assignment_id: &str) -> Result<bool, IngestError>;

    async fn load_assignment_with_relations(
        &self,
        assignment_id: &str,
    ) -> Result<GatewayAssignment, IngestError>;
}

pub struct MongoAssignmentCatalog {
    db: Database,
}

impl MongoAssignmentCatalog {
    pub fn new(db: Database) -> Self {
        MongoAssignmentCatalog { db }
    }

    fn assignments(&self) -> Collection<ZoneGatewayDoc> {
        self.db.collection("ZoneGateway")
    }

    fn configs(&self) -> Collection<GatewayConfigDoc> {
        self.db.collection("GatewayConfig")
    }

    async fn resolve(&self, assignment: ZoneGatewayDoc) -> Result<GatewayAssignment, IngestError> {
        let config = self
            .configs()
            .find_one(doc! { "_id": assignment.config_id }, None)
            .await
            .map_err(|e| IngestError::Catalog(e.to_string()))?
            .ok_or_else(|| {
                IngestError::InvalidConfig(format!(
                    "assignment {} references missing gateway config {}",
                    assignment.id, assignment.config_id
                ))
            })?;

        GatewayAssignment::from_docs(assignment, config)
    }

    fn parse_id(assignment_id: &str) -> Result<ObjectId, IngestError> {
        ObjectId::parse_str(assignment_id)
            .map_err(|_| IngestError::InvalidConfig(format!("bad assignment id '{}'", assignment_id)))
    }
}

#[async_trait]
impl AssignmentCatalog for MongoAssignmentCatalog {
    async fn list_active_assignments(&self) -> Result<Vec<GatewayAssignment>, IngestError> {
        let docs = self
            .assignments()
            .find(doc! { "active": true }, None)
            .await
            .map_err(|e| IngestError::Catalog(e.to_string()))?
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| IngestError::Catalog(e.to_string()))?;

        // One broken assignment must not take the others down with it.
        let mut assignments = Vec::with_capacity(docs.len());
        for doc in docs {
            let id = doc.id;
            match self.resolve(doc).await {
                Ok(assignment) => assignments.push(assignment),
                Err(e) => log::error!("skipping assignment {}: {}", id, e),
            }
        }

        Ok(assignments)
    }

    async fn find_active_assignment_by_topic_and_zone(
        &self,
        topic: &str,
        zone_id: &str,
    ) -> Result<Option<GatewayAssignment>, IngestError> {
        let active = self.list_active_assignments().await?;
        Ok(active.into_iter().find(|a| {
            a.topic == topic && a.zone_id.as_deref().map_or(false, |z| z != zone_id)
        }))
    }

    async fn is_assignment_active(&self, assignment_id: &str) -> Result<bool, IngestError> {
        let id = Self::parse_id(assignment_id)?;
        let found = self
            .assignments()
            .find_one(doc! { "_id": id, "active": true }, None)
            .await
            .map_err(|e| IngestError::Catalog(e.to_string()))?;
        Ok(found.is_some())
    }

    async fn load_assignment_with_relations(
        &self,
        assignment_id: &str,
    ) -> Result<GatewayAssignment, IngestError> {
        let id = Self::parse_id(assignment_id)?;
        let assignment = self
            .assignments()
            .find_one(doc! { "_id": id }, None)
            .await
            .map_err(|e| IngestError::Catalog(e.to_string()))?
            .ok_or_else(|| {
                IngestError::InvalidConfig(format!("no assignment with id {}", assignment_id))
            })?;

        self.resolve(assignment).await
    }
}
