use std::convert::TryFrom;

use serde::{Deserialize, Serialize};
use serde_json::Number;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum PollError {
    #[error("invalid poll: {0}")]
    Invalid(String),
    #[error("no such option: {0}")]
    InvalidOption(i64),
}

/**
 * The single poll a room is running
 *
 * `votes` is positionally aligned with `options`, index *i* counts the votes
 * for option *i*. This is also the exact shape sent to every subscriber.
 */
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Poll {
    pub title: String,
    pub options: Vec<String>,
    pub votes: Vec<u64>,
    /**
     * Advisory time-to-live, stored and echoed back exactly as the creator
     * sent it but never enforced
     */
    pub duration: Number,
}

impl Poll {
    /**
     * Record one vote for the option at `option`
     *
     * Anything outside of `0..options.len()` is rejected and the counters are
     * left untouched.
     */
    pub fn vote(&mut self, option: i64) -> Result<(), PollError> {
        let slot = usize::try_from(option)
            .ok()
            .and_then(|index| self.votes.get_mut(index))
            .ok_or(PollError::InvalidOption(option))?;
        *slot = slot.saturating_add(1);
        Ok(())
    }

    pub fn total_votes(&self) -> u64 {
        self.votes.iter().sum()
    }
}

/**
 * User-provided details to create a Poll
 */
#[derive(Clone, Debug, Deserialize)]
pub struct InsertablePoll {
    pub title: String,
    pub options: Vec<String>,
    pub duration: Number,
}

impl InsertablePoll {
    #[cfg(test)]
    pub fn new(title: &str, options: &[&str], duration: u64) -> Self {
        Self {
            title: title.to_string(),
            options: options.iter().map(|o| o.to_string()).collect(),
            duration: duration.into(),
        }
    }

    fn validate(&self) -> Result<(), PollError> {
        if self.title.trim().is_empty() {
            return Err(PollError::Invalid("title must not be empty".into()));
        }
        if self.options.is_empty() {
            return Err(PollError::Invalid("at least one option is required".into()));
        }
        if let Some(index) = self.options.iter().position(|o| o.trim().is_empty()) {
            return Err(PollError::Invalid(format!("option {} is empty", index)));
        }
        match self.duration.as_f64() {
            Some(duration) if duration > 0.0 && duration.is_finite() => {}
            _ => return Err(PollError::Invalid("duration must be positive".into())),
        }
        Ok(())
    }

    /**
     * Validate the request and turn it into a fresh poll with every counter
     * at zero
     */
    pub fn into_poll(self) -> Result<Poll, PollError> {
        self.validate()?;
        let votes = vec![0; self.options.len()];
        Ok(Poll {
            title: self.title,
            options: self.options,
            votes,
            duration: self.duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lunch() -> Poll {
        InsertablePoll::new("Lunch?", &["Pizza", "Sushi"], 60)
            .into_poll()
            .expect("valid poll")
    }

    #[test]
    fn new_poll_has_zeroed_votes_in_option_order() {
        let poll = lunch();
        assert_eq!(poll.title, "Lunch?");
        assert_eq!(poll.options, vec!["Pizza", "Sushi"]);
        assert_eq!(poll.votes, vec![0, 0]);
        assert_eq!(poll.duration, Number::from(60));
    }

    #[test]
    fn vote_increments_only_the_chosen_slot() {
        let mut poll = lunch();
        poll.vote(1).unwrap();
        assert_eq!(poll.votes, vec![0, 1]);
        poll.vote(0).unwrap();
        poll.vote(0).unwrap();
        assert_eq!(poll.votes, vec![2, 1]);
        assert_eq!(poll.total_votes(), 3);
    }

    #[test]
    fn out_of_range_votes_are_rejected() {
        let mut poll = lunch();
        assert_eq!(poll.vote(2), Err(PollError::InvalidOption(2)));
        assert_eq!(poll.vote(-1), Err(PollError::InvalidOption(-1)));
        assert_eq!(poll.votes, vec![0, 0]);
    }

    #[test]
    fn tallies_match_the_votes_cast() {
        let mut poll = InsertablePoll::new("Color", &["Red", "Green", "Blue"], 5)
            .into_poll()
            .unwrap();
        let cast = [2, 0, 2, 1, 2, 0, 2];
        for option in cast.iter() {
            poll.vote(*option).unwrap();
        }
        assert_eq!(poll.votes, vec![2, 1, 4]);
        assert_eq!(poll.total_votes(), cast.len() as u64);
    }

    #[test]
    fn rejects_blank_title() {
        let err = InsertablePoll::new("  ", &["a"], 10).into_poll().unwrap_err();
        assert!(matches!(err, PollError::Invalid(_)));
    }

    #[test]
    fn rejects_missing_or_blank_options() {
        assert!(InsertablePoll::new("t", &[], 10).into_poll().is_err());
        assert!(InsertablePoll::new("t", &["a", ""], 10).into_poll().is_err());
    }

    #[test]
    fn rejects_zero_duration() {
        assert!(InsertablePoll::new("t", &["a"], 0).into_poll().is_err());
    }

    fn from_json(body: serde_json::Value) -> Result<Poll, PollError> {
        serde_json::from_value::<InsertablePoll>(body)
            .expect("well formed request")
            .into_poll()
    }

    #[test]
    fn accepts_fractional_durations() {
        let poll = from_json(serde_json::json!({
            "title": "Quick one",
            "options": ["Yes", "No"],
            "duration": 1.5,
        }))
        .unwrap();
        assert_eq!(serde_json::to_value(&poll).unwrap()["duration"], 1.5);

        let poll = from_json(serde_json::json!({
            "title": "Quick one",
            "options": ["Yes", "No"],
            "duration": 60.0,
        }))
        .unwrap();
        assert_eq!(poll.duration.as_f64(), Some(60.0));
    }

    #[test]
    fn rejects_negative_durations() {
        let err = from_json(serde_json::json!({
            "title": "Quick one",
            "options": ["Yes", "No"],
            "duration": -0.5,
        }))
        .unwrap_err();
        assert!(matches!(err, PollError::Invalid(_)));
        assert!(from_json(serde_json::json!({
            "title": "t",
            "options": ["a"],
            "duration": 0.0,
        }))
        .is_err());
    }

    #[test]
    fn counters_saturate_instead_of_overflowing() {
        let mut poll = lunch();
        poll.votes[0] = u64::MAX;
        poll.vote(0).unwrap();
        assert_eq!(poll.votes[0], u64::MAX);
    }

    #[test]
    fn snapshot_wire_format() {
        let mut poll = lunch();
        poll.vote(1).unwrap();
        let json = serde_json::to_value(&poll).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "title": "Lunch?",
                "options": ["Pizza", "Sushi"],
                "votes": [0, 1],
                "duration": 60,
            })
        );
    }
}
