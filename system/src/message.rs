use crate::operation::Operation;
use crate::room_state::RoomSnapshot;
use crate::types::*;
use serde::{Deserialize, Serialize};

/// Why a single incoming message was refused. The connection stays open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    Malformed,
    NotJoined,
    InvalidRoomId,
    EmptyStroke,
    InvalidStrokeWidth,
    InvalidPoint,
    CursorOutOfRange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrokePreview {
    pub stroke_id: OperationId,
    pub points: Vec<Point>,
    pub color: String,
    pub width: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrokeFinalize {
    /// Client-chosen id. Lets the sender match the echo with its optimistic
    /// render and makes retried deliveries idempotent.
    pub stroke_id: Option<OperationId>,
    pub points: Vec<Point>,
    pub color: String,
    pub width: f32,
}

/// Normalized canvas coordinates, both in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionCommand {
    Join {
        room_id: RoomId,
        display_name: String,
        display_color: String,
    },
    StrokePreview(StrokePreview),
    StrokeFinalize(StrokeFinalize),
    Cursor(CursorPosition),
    Undo,
    Redo,
    Clear,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionEvent {
    /// Full state to adopt. Replaces whatever the client had.
    Init {
        self_id: ConnectionId,
        snapshot: RoomSnapshot,
    },
    StrokePreview {
        from: ConnectionId,
        preview: StrokePreview,
    },
    StrokeCommitted(Operation),
    Cursor {
        from: ConnectionId,
        position: CursorPosition,
    },
    Undone(OperationId),
    Redone(OperationId),
    Cleared,
    MemberJoined(Member),
    MemberLeft(Member),
    Rejected(RejectReason),
}

impl SessionCommand {
    pub fn is_join(&self) -> bool {
        matches!(self, SessionCommand::Join { .. })
    }

    /// Checks what serde can't: values that decode fine but make no sense.
    pub fn validate(&self) -> Result<(), RejectReason> {
        match self {
            SessionCommand::Join { room_id, .. } => {
                if room_id.trim().is_empty() {
                    Err(RejectReason::InvalidRoomId)
                } else {
                    Ok(())
                }
            }
            SessionCommand::StrokePreview(preview) => {
                validate_path(&preview.points, preview.width, false)
            }
            SessionCommand::StrokeFinalize(finalize) => {
                validate_path(&finalize.points, finalize.width, true)
            }
            SessionCommand::Cursor(CursorPosition { x, y }) => {
                let in_range = |v: &f32| (0.0..=1.0).contains(v);
                if in_range(x) && in_range(y) {
                    Ok(())
                } else {
                    Err(RejectReason::CursorOutOfRange)
                }
            }
            SessionCommand::Undo | SessionCommand::Redo | SessionCommand::Clear => Ok(()),
        }
    }
}

fn validate_path(points: &[Point], width: f32, require_points: bool) -> Result<(), RejectReason> {
    if require_points && points.is_empty() {
        return Err(RejectReason::EmptyStroke);
    }
    if !width.is_finite() || width <= 0.0 {
        return Err(RejectReason::InvalidStrokeWidth);
    }
    if points.iter().any(|p| !p.is_finite()) {
        return Err(RejectReason::InvalidPoint);
    }
    Ok(())
}

/// Normalizes the profile a client asked for on join.
pub fn member_profile(
    id: ConnectionId,
    display_name: &str,
    display_color: &str,
) -> Member {
    let display_name = display_name.trim();
    let display_color = display_color.trim();
    Member {
        id,
        display_name: if display_name.is_empty() {
            format!("Guest {}", id)
        } else {
            display_name.to_owned()
        },
        display_color: if display_color.is_empty() {
            "#000000".to_owned()
        } else {
            display_color.to_owned()
        },
    }
}
