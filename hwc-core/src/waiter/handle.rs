//! Operation handles returned by mutating API calls

use std::fmt;

/// What an [`OperationHandle`] identifies on the remote side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Asynchronous job (e.g., ECS/RDS `job_id`)
    Job,
    /// Billing order (prepaid resources)
    Order,
    /// The resource itself, polled through its own status field
    Resource,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Job => "job",
            OperationKind::Order => "order",
            OperationKind::Resource => "resource",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of one in-flight asynchronous mutation
///
/// Produced by a submission call and consumed by the probe that matches its kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationHandle {
    id: String,
    kind: OperationKind,
}

impl OperationHandle {
    pub fn new(kind: OperationKind, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }

    pub fn job(id: impl Into<String>) -> Self {
        Self::new(OperationKind::Job, id)
    }

    pub fn order(id: impl Into<String>) -> Self {
        Self::new(OperationKind::Order, id)
    }

    pub fn resource(id: impl Into<String>) -> Self {
        Self::new(OperationKind::Resource, id)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }
}

impl fmt::Display for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.id)
    }
}
