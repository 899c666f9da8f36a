use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::metrics::LEADERBOARD_USERS;
use crate::models::{
    CountUpdate, LeaderboardEntry, LeaderboardSnapshot, OwnershipTransfer, UserProfile,
};

/// Ranking key: most captures first, then user id ascending.
type RankKey = (Reverse<u32>, String);

#[derive(Debug, Clone)]
struct Standing {
    display_name: String,
    captured_count: u32,
    revision: u64,
}

#[derive(Debug, Default)]
struct Board {
    ranking: BTreeSet<RankKey>,
    standings: HashMap<String, Standing>,
}

impl Board {
    fn insert(&mut self, user_id: &str, standing: Standing) {
        if let Some(previous) = self.standings.remove(user_id) {
            self.ranking
                .remove(&(Reverse(previous.captured_count), user_id.to_string()));
        }
        self.ranking
            .insert((Reverse(standing.captured_count), user_id.to_string()));
        self.standings.insert(user_id.to_string(), standing);
    }

    fn remove(&mut self, user_id: &str) -> bool {
        match self.standings.remove(user_id) {
            Some(previous) => {
                self.ranking
                    .remove(&(Reverse(previous.captured_count), user_id.to_string()));
                true
            }
            None => false,
        }
    }
}

/// Ordered in-memory read model of users by captured count. Fed by
/// committed transfers; may briefly lag the store but never reorders an
/// older count over a newer one.
#[derive(Clone, Default)]
pub struct LeaderboardAggregator {
    board: Arc<RwLock<Board>>,
}

impl LeaderboardAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole board from the store's users.
    pub async fn rebuild(&self, users: &[UserProfile]) {
        let mut board = self.board.write().await;
        *board = Board::default();
        for user in users {
            board.insert(&user.id, standing_of(user));
        }
        LEADERBOARD_USERS.set(board.standings.len() as i64);
        debug!(users = users.len(), "Leaderboard rebuilt");
    }

    /// Adds a user, or refreshes one when the profile is newer.
    pub async fn upsert_user(&self, user: &UserProfile) {
        let mut board = self.board.write().await;
        let newer = board
            .standings
            .get(&user.id)
            .is_none_or(|s| user.revision >= s.revision);
        if newer {
            board.insert(&user.id, standing_of(user));
        }
        LEADERBOARD_USERS.set(board.standings.len() as i64);
    }

    /// Applies a committed count. Updates older than what the board holds,
    /// and updates for unknown users, are ignored. Returns whether applied.
    pub async fn on_count_changed(&self, user_id: &str, new_count: u32, revision: u64) -> bool {
        let mut board = self.board.write().await;
        let Some(current) = board.standings.get(user_id).cloned() else {
            return false;
        };
        if revision <= current.revision {
            return false;
        }
        board.insert(
            user_id,
            Standing {
                display_name: current.display_name,
                captured_count: new_count,
                revision,
            },
        );
        true
    }

    pub async fn apply_transfer(&self, transfer: &OwnershipTransfer) {
        self.apply(&transfer.new_owner_count).await;
        if let Some(previous) = &transfer.previous_owner_count {
            self.apply(previous).await;
        }
    }

    async fn apply(&self, update: &CountUpdate) {
        self.on_count_changed(&update.user_id, update.captured_count, update.revision)
            .await;
    }

    pub async fn rename(&self, user_id: &str, display_name: &str) {
        let mut board = self.board.write().await;
        if let Some(standing) = board.standings.get_mut(user_id) {
            standing.display_name = display_name.to_string();
        }
    }

    pub async fn remove(&self, user_id: &str) -> bool {
        let mut board = self.board.write().await;
        let removed = board.remove(user_id);
        LEADERBOARD_USERS.set(board.standings.len() as i64);
        removed
    }

    /// Top `limit` entries (all when `None`), ranked from 1.
    pub async fn snapshot(&self, limit: Option<usize>) -> LeaderboardSnapshot {
        let board = self.board.read().await;
        let take = limit.unwrap_or(usize::MAX);
        let entries = board
            .ranking
            .iter()
            .take(take)
            .enumerate()
            .filter_map(|(position, (Reverse(count), user_id))| {
                board.standings.get(user_id).map(|s| LeaderboardEntry {
                    rank: position as u32 + 1,
                    user_id: user_id.clone(),
                    display_name: s.display_name.clone(),
                    captured_count: *count,
                })
            })
            .collect();

        LeaderboardSnapshot {
            total_users: board.standings.len(),
            entries,
        }
    }

    pub async fn rank_of(&self, user_id: &str) -> Option<u32> {
        let board = self.board.read().await;
        board
            .ranking
            .iter()
            .position(|(_, id)| id == user_id)
            .map(|position| position as u32 + 1)
    }
}

fn standing_of(user: &UserProfile) -> Standing {
    Standing {
        display_name: user.display_name.clone(),
        captured_count: user.captured_count,
        revision: user.revision,
    }
}
