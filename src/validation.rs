use tracing::debug;

use crate::error::GoalError;

pub const MIN_GOAL_CHARS: usize = 10;
pub const MAX_GOAL_CHARS: usize = 200;

/// A trimmed goal that passed the length check. Only `validate_goal` builds one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Goal(String);

impl Goal {
    pub fn into_inner(self) -> String {
        self.0
    }
}

/// Length is counted in characters after trimming, so emoji and accents count once.
pub fn validate_goal(raw: &str) -> Result<Goal, GoalError> {
    let trimmed = raw.trim();
    let len = trimmed.chars().count();
    if len < MIN_GOAL_CHARS {
        debug!(len, "goal rejected: too short");
        return Err(GoalError::TooShort { len });
    }
    if len > MAX_GOAL_CHARS {
        debug!(len, "goal rejected: too long");
        return Err(GoalError::TooLong { len });
    }
    Ok(Goal(trimmed.to_string()))
}
