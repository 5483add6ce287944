use serde::{Deserialize, Serialize};

use itemkeep_core::{DomainError, DomainResult, Entity, ItemId};

/// Status written by the reprocessing run.
pub const PROCESSED_STATUS: &str = "PROCESSED";

/// Maximum description length, in characters.
pub const MAX_DESCRIPTION_CHARS: usize = 255;

/// Item fields as supplied by a caller, before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewItem {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    pub email: String,
}

impl NewItem {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            status: None,
            email: email.into(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Check the field rules shared by create and update.
    pub fn validate(&self) -> DomainResult<()> {
        validate_fields(&self.name, self.description.as_deref(), &self.email)
    }

    /// Attach an identifier, producing a storable item.
    pub fn into_item(self, id: ItemId) -> Item {
        Item {
            id,
            name: self.name,
            description: self.description,
            status: self.status,
            email: self.email,
        }
    }
}

/// A stored item record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    pub email: String,
}

impl Item {
    pub fn validate(&self) -> DomainResult<()> {
        validate_fields(&self.name, self.description.as_deref(), &self.email)
    }

    /// Set the terminal status. Re-marking an already processed item is a no-op.
    pub fn mark_processed(&mut self) {
        if !self.is_processed() {
            self.status = Some(PROCESSED_STATUS.to_string());
        }
    }

    pub fn is_processed(&self) -> bool {
        self.status.as_deref() == Some(PROCESSED_STATUS)
    }

    /// Replace every mutable field with `fields`, keeping the identifier.
    pub fn replace_fields(&mut self, fields: NewItem) {
        self.name = fields.name;
        self.description = fields.description;
        self.status = fields.status;
        self.email = fields.email;
    }
}

impl Entity for Item {
    type Id = ItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

fn validate_fields(name: &str, description: Option<&str>, email: &str) -> DomainResult<()> {
    if name.trim().is_empty() {
        return Err(DomainError::validation("name must not be blank"));
    }

    if let Some(description) = description {
        if description.chars().count() > MAX_DESCRIPTION_CHARS {
            return Err(DomainError::validation(format!(
                "description must be at most {MAX_DESCRIPTION_CHARS} characters"
            )));
        }
    }

    if email.trim().is_empty() {
        return Err(DomainError::validation("email must not be blank"));
    }
    if !looks_like_email(email) {
        return Err(DomainError::validation("email should be valid"));
    }

    Ok(())
}

fn looks_like_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && !domain.is_empty() && !domain.contains('@')
        }
        None => false,
    }
}
