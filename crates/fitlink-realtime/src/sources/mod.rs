//! Concrete realtime feeds

mod checkins;
mod preferences;
mod training_sessions;

pub use checkins::{CheckIn, CheckInSource, NameResolver};
pub use preferences::{PreferenceSource, PreferenceUpdate, Preferences};
pub use training_sessions::{
    SessionStatus, TrainingSession, TrainingSessionEvent, TrainingSessionSource,
};
