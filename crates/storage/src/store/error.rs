#![forbid(unsafe_code)]

use rm_core::enablement::EnableViolation;

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Sql(rusqlite::Error),
    Json(serde_json::Error),
    InvalidInput(&'static str),
    UnknownId,
    NameTaken,
    ScopeMismatch,
    InvalidValue { value: f64 },
    ComponentCycle,
    ElementTypeInUse,
    BaseTypeHasNoChildren,
    RootAlreadyExists,
    InvalidParent,
    EnableValidationFailed { reasons: Vec<EnableViolation> },
    CloneAborted { cause: Box<StoreError> },
    CampaignNotEmpty,
    MasterNotEmpty,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io: {err}"),
            Self::Sql(err) => write!(f, "sqlite: {err}"),
            Self::Json(err) => write!(f, "json: {err}"),
            Self::InvalidInput(message) => write!(f, "invalid input: {message}"),
            Self::UnknownId => write!(f, "unknown id"),
            Self::NameTaken => write!(f, "name already taken in this scope"),
            Self::ScopeMismatch => write!(f, "records belong to different scopes"),
            Self::InvalidValue { value } => write!(
                f,
                "invalid cell value {value}: must be in (0, 1] with at most two decimal digits"
            ),
            Self::ComponentCycle => write!(f, "component edge would create a cycle"),
            Self::ElementTypeInUse => {
                write!(f, "element type is referenced by structure nodes")
            }
            Self::BaseTypeHasNoChildren => {
                write!(f, "a base element type node cannot have children")
            }
            Self::RootAlreadyExists => write!(f, "the tree already has a root node"),
            Self::InvalidParent => write!(f, "parent node is missing or belongs to another tree"),
            Self::EnableValidationFailed { reasons } => {
                write!(f, "element type cannot be enabled: ")?;
                for (index, reason) in reasons.iter().enumerate() {
                    if index > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{reason}")?;
                }
                Ok(())
            }
            Self::CloneAborted { cause } => write!(f, "campaign clone aborted: {cause}"),
            Self::CampaignNotEmpty => write!(f, "campaign already owns records"),
            Self::MasterNotEmpty => write!(f, "master scope already owns records"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql(value)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}
