pub mod capture;
pub mod geo;
pub mod leaderboard;
pub mod location;
pub mod quiz;
pub mod records;
pub mod user;

pub use capture::{CaptureRequest, CaptureResponse, CountUpdate, OwnershipTransfer};
pub use geo::{Coordinate, Geometry};
pub use leaderboard::{LeaderboardEntry, LeaderboardSnapshot};
pub use location::{ChangeKind, City, Contest, Location, LocationChange, LocationKind};
pub use quiz::{Question, QuizSession, QuizStatus};
pub use user::UserProfile;
