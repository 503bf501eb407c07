use thiserror::Error;

#[derive(Error, Debug)]
pub enum TimerError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown encounter '{encounter_id}'")]
    UnknownEncounter { encounter_id: String },

    #[error("Stale turn: request for turn {requested}, current turn is {current}")]
    StaleTurn { requested: usize, current: usize },

    #[error("User '{user_id}' may not control the active participant")]
    Unauthorized { user_id: String },

    #[error("Encounter has no active participant")]
    NoActiveParticipant,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type TimerResult<T> = Result<T, TimerError>;
