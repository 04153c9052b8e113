use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconError {
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("House number '{house_number}' already belongs to shipment {existing_shipment_id}")]
    Conflict {
        house_number: String,
        existing_shipment_id: String,
    },

    #[error("Broadcast update for master '{master_number}' rolled back ({attempted} shipment(s)): {reason}")]
    PartialFailure {
        master_number: String,
        attempted: usize,
        reason: String,
    },

    #[error("Shipment not found: {shipment_id}")]
    NotFound { shipment_id: String },

    /// 建立時撞到 house_number 唯一約束，代表另一個上傳先完成了建立
    #[error("House number '{house_number}' was created concurrently")]
    DuplicateHouseNumber { house_number: String },

    /// Another upload wrote the same shipments between this upload's read and its commit
    #[error("Shipment data for '{key}' changed while the upload was in flight")]
    ConcurrentWrite { key: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error in '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Input,
    Identity,
    Storage,
    Configuration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ReconError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(shipment_id: impl Into<String>) -> Self {
        Self::NotFound {
            shipment_id: shipment_id.into(),
        }
    }

    /// The upload lost a race against another writer and can be re-resolved.
    pub fn is_lost_race(&self) -> bool {
        matches!(
            self,
            Self::DuplicateHouseNumber { .. } | Self::ConcurrentWrite { .. }
        )
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation { .. } | Self::Serialization(_) => ErrorCategory::Input,
            Self::Conflict { .. }
            | Self::NotFound { .. }
            | Self::DuplicateHouseNumber { .. }
            | Self::ConcurrentWrite { .. } => ErrorCategory::Identity,
            Self::PartialFailure { .. } | Self::Database(_) | Self::Io(_) => ErrorCategory::Storage,
            Self::ConfigValidationError { .. }
            | Self::InvalidConfigValueError { .. } => ErrorCategory::Configuration,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::NotFound { .. } => ErrorSeverity::Low,
            Self::DuplicateHouseNumber { .. }
            | Self::ConcurrentWrite { .. }
            | Self::PartialFailure { .. } => ErrorSeverity::Medium,
            Self::Validation { .. }
            | Self::Conflict { .. }
            | Self::Serialization(_)
            | Self::ConfigValidationError { .. }
            | Self::InvalidConfigValueError { .. } => ErrorSeverity::High,
            Self::Database(_) | Self::Io(_) => ErrorSeverity::Critical,
        }
    }

    /// 適合直接顯示給使用者的訊息
    pub fn user_friendly_message(&self) -> String {
        match self {
            Self::Validation { message } => format!("The document was rejected: {message}"),
            Self::Conflict {
                house_number,
                existing_shipment_id,
            } => format!(
                "House number {house_number} is already used by shipment {existing_shipment_id}; nothing was changed"
            ),
            Self::PartialFailure {
                master_number,
                attempted,
                ..
            } => format!(
                "Updating the {attempted} shipment(s) that share master {master_number} failed; all of them were left unchanged"
            ),
            Self::NotFound { shipment_id } => format!("No shipment with id {shipment_id}"),
            other => other.to_string(),
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "Check that the extraction carries its master/house number",
            Self::Conflict { .. } => "Verify the house number on the document or correct the existing shipment first",
            Self::PartialFailure { .. }
            | Self::DuplicateHouseNumber { .. }
            | Self::ConcurrentWrite { .. } => {
                "Retry the upload; no shipment was modified"
            }
            Self::NotFound { .. } => "List shipments and use an existing shipment id",
            Self::Serialization(_) => "Make sure the extraction file is valid JSON",
            Self::Database(_) | Self::Io(_) => "Check the database path and file permissions",
            Self::ConfigValidationError { .. }
            | Self::InvalidConfigValueError { .. } => "Fix the configuration file and try again",
        }
    }
}

pub type Result<T> = std::result::Result<T, ReconError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_errors_are_categorized() {
        let conflict = ReconError::Conflict {
            house_number: "HBL1".to_string(),
            existing_shipment_id: "ocn-1".to_string(),
        };
        assert_eq!(conflict.category(), ErrorCategory::Identity);
        assert_eq!(conflict.severity(), ErrorSeverity::High);
        assert!(conflict.user_friendly_message().contains("HBL1"));

        let missing = ReconError::not_found("ocn-9");
        assert_eq!(missing.severity(), ErrorSeverity::Low);
        assert_eq!(missing.to_string(), "Shipment not found: ocn-9");
    }

    #[test]
    fn test_partial_failure_is_reported_as_one_error() {
        let err = ReconError::PartialFailure {
            master_number: "MBL1".to_string(),
            attempted: 3,
            reason: "injected".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Storage);
        assert!(err.user_friendly_message().contains("3 shipment(s)"));
        assert!(!err.is_lost_race());
    }

    #[test]
    fn test_lost_races_are_retryable() {
        let raced = ReconError::ConcurrentWrite {
            key: "MBL1".to_string(),
        };
        assert!(raced.is_lost_race());
        assert_eq!(raced.category(), ErrorCategory::Identity);
        assert_eq!(raced.severity(), ErrorSeverity::Medium);
        assert!(ReconError::DuplicateHouseNumber {
            house_number: "HBL1".to_string()
        }
        .is_lost_race());
        assert!(!ReconError::not_found("ocn-1").is_lost_race());
    }
}
