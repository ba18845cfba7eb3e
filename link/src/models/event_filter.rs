use serde::{Deserialize, Serialize};

use super::change_type::ChangeType;

/// Set of change types a consumer (or a whole channel) is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    pub insert: bool,
    pub update: bool,
    pub delete: bool,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::all()
    }
}

impl EventFilter {
    pub fn all() -> Self {
        Self {
            insert: true,
            update: true,
            delete: true,
        }
    }

    pub fn none() -> Self {
        Self {
            insert: false,
            update: false,
            delete: false,
        }
    }

    pub fn only(types: &[ChangeType]) -> Self {
        types.iter().fold(Self::none(), |filter, ty| filter.with(*ty))
    }

    pub fn with(mut self, ty: ChangeType) -> Self {
        match ty {
            ChangeType::Insert => self.insert = true,
            ChangeType::Update => self.update = true,
            ChangeType::Delete => self.delete = true,
        }
        self
    }

    pub fn accepts(&self, ty: ChangeType) -> bool {
        match ty {
            ChangeType::Insert => self.insert,
            ChangeType::Update => self.update,
            ChangeType::Delete => self.delete,
        }
    }

    pub fn union(self, other: Self) -> Self {
        Self {
            insert: self.insert || other.insert,
            update: self.update || other.update,
            delete: self.delete || other.delete,
        }
    }

    /// Whether every type accepted by `other` is accepted here.
    pub fn covers(&self, other: &Self) -> bool {
        self.union(*other) == *self
    }

    pub fn is_empty(&self) -> bool {
        !(self.insert || self.update || self.delete)
    }

    pub fn event_types(&self) -> Vec<ChangeType> {
        [ChangeType::Insert, ChangeType::Update, ChangeType::Delete]
            .into_iter()
            .filter(|ty| self.accepts(*ty))
            .collect()
    }
}
