use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named, reusable report definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    /// Unique identifier, immutable
    pub id: Uuid,

    /// Report type (inventory, compliance, cost, ...)
    pub report_type: String,

    /// Category the report is filed under
    pub category: String,

    /// Cloud/network provider the report covers
    pub provider: String,

    /// Display name
    pub name: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Report {
    /// Create a new report definition
    pub fn new(
        name: impl Into<String>,
        report_type: impl Into<String>,
        category: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            report_type: report_type.into(),
            category: category.into(),
            provider: provider.into(),
            name: name.into(),
            created_at: Utc::now(),
        }
    }

    /// Use a caller-supplied identifier
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Value of a classification dimension
    pub fn dimension(&self, dimension: ReportDimension) -> &str {
        match dimension {
            ReportDimension::Type => &self.report_type,
            ReportDimension::Category => &self.category,
            ReportDimension::Provider => &self.provider,
        }
    }
}

/// Classification dimensions of a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportDimension {
    Type,
    Category,
    Provider,
}
