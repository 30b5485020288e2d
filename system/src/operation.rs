use crate::types::{ConnectionId, OperationId, Point};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub points: Vec<Point>,
    pub color: String,
    pub width: f32,
    pub owner: ConnectionId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OperationKind {
    Stroke(Stroke),
    /// Never stored in a log. Applying it resets the room instead.
    Clear,
}

/// One server-accepted drawing action. Immutable once appended to a log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub kind: OperationKind,
}

impl Operation {
    pub fn stroke(id: OperationId, stroke: Stroke) -> Self {
        Self {
            id,
            kind: OperationKind::Stroke(stroke),
        }
    }

    pub fn as_stroke(&self) -> Option<&Stroke> {
        match &self.kind {
            OperationKind::Stroke(stroke) => Some(stroke),
            OperationKind::Clear => None,
        }
    }

    pub fn is_clear(&self) -> bool {
        matches!(self.kind, OperationKind::Clear)
    }
}
