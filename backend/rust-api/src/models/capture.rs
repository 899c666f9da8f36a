use serde::{Deserialize, Serialize};
use validator::Validate;

use super::geo::Coordinate;
use super::location::Location;

#[derive(Debug, Deserialize, Validate)]
pub struct CaptureRequest {
    #[validate(length(min = 1, message = "session_id is required"))]
    pub session_id: String,
    #[validate(nested)]
    pub position: Coordinate,
}

/// Result of a committed ownership transfer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OwnershipTransfer {
    pub location: Location,
    pub previous_owner_id: Option<String>,
    pub new_owner_id: String,
    pub new_owner_count: CountUpdate,
    pub previous_owner_count: Option<CountUpdate>,
}

/// A user's captured count after a committed change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountUpdate {
    pub user_id: String,
    pub captured_count: u32,
    pub revision: u64,
}

impl CountUpdate {
    pub fn of(user: &crate::models::UserProfile) -> Self {
        Self {
            user_id: user.id.clone(),
            captured_count: user.captured_count,
            revision: user.revision,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CaptureResponse {
    pub location: Location,
    pub previous_owner_id: Option<String>,
    pub captured_count: u32,
}
