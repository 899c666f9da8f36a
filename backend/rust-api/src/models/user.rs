use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Player profile. `captured_location_ids` mirrors the locations whose owner
/// is this user; `captured_count` is its denormalized length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub display_name: String,
    pub captured_count: u32,
    pub captured_location_ids: Vec<String>,
    /// Bumped on every change to the captured set; orders leaderboard updates.
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub username_changed_at: Option<DateTime<Utc>>,
}

impl UserProfile {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            captured_count: 0,
            captured_location_ids: Vec::new(),
            revision: 0,
            created_at: now,
            username_changed_at: None,
        }
    }

    pub fn owns(&self, location_id: &str) -> bool {
        self.captured_location_ids.iter().any(|id| id == location_id)
    }

    pub(crate) fn gain(&mut self, location_id: &str) {
        if !self.owns(location_id) {
            self.captured_location_ids.push(location_id.to_string());
        }
        self.captured_count = self.captured_location_ids.len() as u32;
        self.revision += 1;
    }

    pub(crate) fn lose(&mut self, location_id: &str) {
        self.captured_location_ids.retain(|id| id != location_id);
        self.captured_count = self.captured_location_ids.len() as u32;
        self.revision += 1;
    }
}

/// First sign-in of an externally authenticated identity.
#[derive(Debug, Deserialize, Validate)]
pub struct SignInRequest {
    #[validate(length(
        min = 1,
        max = 100,
        message = "Display name must be between 1 and 100 characters"
    ))]
    pub display_name: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChangeUsernameRequest {
    #[validate(length(
        min = 1,
        max = 100,
        message = "Username must be between 1 and 100 characters"
    ))]
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteAccountResponse {
    pub user_id: String,
    pub released_location_ids: Vec<String>,
}
