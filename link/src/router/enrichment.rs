//! Best-effort payload enrichment.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};

use crate::error::Result;
use crate::models::ChangeEvent;

/// Adds denormalized fields to INSERT/UPDATE events before dispatch.
///
/// Returning `Ok(None)` means "nothing to add". Errors are logged by the
/// router and the event is delivered without enrichment.
#[async_trait]
pub trait Enricher: Send + Sync {
    async fn enrich(&self, event: &ChangeEvent) -> Result<Option<Map<String, JsonValue>>>;
}

/// Source of user display profiles.
#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    async fn profile(&self, user_id: &str) -> Result<JsonValue>;
}

const DEFAULT_ACTOR_FIELDS: &[&str] = &["sender_id", "author_id", "user_id"];

/// Attaches the acting user's profile under `"sender"`.
///
/// The actor is the first of `sender_id`, `author_id`, `user_id` present on
/// the row.
pub struct ProfileEnricher {
    directory: Arc<dyn ProfileDirectory>,
    actor_fields: Vec<String>,
    field_name: String,
}

impl ProfileEnricher {
    pub fn new(directory: Arc<dyn ProfileDirectory>) -> Self {
        Self {
            directory,
            actor_fields: DEFAULT_ACTOR_FIELDS.iter().map(|f| f.to_string()).collect(),
            field_name: "sender".to_string(),
        }
    }

    pub fn with_actor_fields(mut self, fields: &[&str]) -> Self {
        self.actor_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_field_name(mut self, name: impl Into<String>) -> Self {
        self.field_name = name.into();
        self
    }

    fn actor<'a>(&self, event: &'a ChangeEvent) -> Option<&'a str> {
        self.actor_fields
            .iter()
            .find_map(|field| event.field_str(field))
    }
}

#[async_trait]
impl Enricher for ProfileEnricher {
    async fn enrich(&self, event: &ChangeEvent) -> Result<Option<Map<String, JsonValue>>> {
        let Some(actor) = self.actor(event) else {
            return Ok(None);
        };
        let profile = self.directory.profile(actor).await?;
        let mut fields = Map::new();
        fields.insert(self.field_name.clone(), profile);
        Ok(Some(fields))
    }
}
