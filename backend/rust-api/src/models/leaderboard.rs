use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub user_id: String,
    pub display_name: String,
    pub captured_count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardSnapshot {
    pub total_users: usize,
    pub entries: Vec<LeaderboardEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapturedLocationSummary {
    pub location_id: String,
    pub name: String,
}

/// Captured locations of one user, grouped per city.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CityCaptures {
    pub city_id: String,
    pub city_name: String,
    pub locations: Vec<CapturedLocationSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserCapturesResponse {
    pub user_id: String,
    pub display_name: String,
    pub captured_count: u32,
    pub cities: Vec<CityCaptures>,
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    pub limit: Option<usize>,
}
