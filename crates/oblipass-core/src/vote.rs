/// Order-preserving tally over evaluator response literals.
///
/// Responses are compared by exact string equality and a winner must beat
/// the running best by a strictly greater count, so a tie resolves to the
/// response observed first. The tie-break is arbitrary but deliberate;
/// tests pin it down so it cannot change silently.
#[derive(Debug, Default)]
pub struct VoteTally {
    counts: Vec<(String, usize)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedResponse {
    pub response: String,
    pub votes: usize,
}

impl VoteTally {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, response: &str) {
        if let Some(entry) = self.counts.iter_mut().find(|(seen, _)| seen == response) {
            entry.1 += 1;
        } else {
            self.counts.push((response.to_string(), 1));
        }
    }

    /// Total number of recorded votes.
    #[must_use]
    pub fn total(&self) -> usize {
        self.counts.iter().map(|(_, votes)| votes).sum()
    }

    /// The response with the strictly highest count, or `None` on an empty
    /// tally.
    #[must_use]
    pub fn resolve(&self) -> Option<TrustedResponse> {
        let mut winner: Option<TrustedResponse> = None;
        for (response, votes) in &self.counts {
            let best = winner.as_ref().map_or(0, |current| current.votes);
            if *votes > best {
                winner = Some(TrustedResponse {
                    response: response.clone(),
                    votes: *votes,
                });
            }
        }
        winner
    }
}

#[cfg(test)]
mod tests {
    use super::VoteTally;

    fn tally_of(responses: &[&str]) -> VoteTally {
        let mut tally = VoteTally::new();
        for response in responses {
            tally.record(response);
        }
        tally
    }

    #[test]
    fn majority_wins() {
        let tally = tally_of(&["a", "a", "b"]);
        let trusted = tally.resolve().unwrap();
        assert_eq!(trusted.response, "a");
        assert_eq!(trusted.votes, 2);
    }

    #[test]
    fn all_distinct_resolves_to_first_observed() {
        let tally = tally_of(&["a", "b", "c"]);
        let trusted = tally.resolve().unwrap();
        assert_eq!(trusted.response, "a");
        assert_eq!(trusted.votes, 1);
    }

    #[test]
    fn tie_resolves_to_first_observed() {
        let tally = tally_of(&["b", "a", "a", "b"]);
        let trusted = tally.resolve().unwrap();
        assert_eq!(trusted.response, "b");
        assert_eq!(trusted.votes, 2);
    }

    #[test]
    fn late_majority_overtakes() {
        let tally = tally_of(&["a", "b", "b"]);
        let trusted = tally.resolve().unwrap();
        assert_eq!(trusted.response, "b");
    }

    #[test]
    fn empty_tally_has_no_winner() {
        assert!(VoteTally::new().resolve().is_none());
    }

    #[test]
    fn total_counts_every_vote() {
        assert_eq!(tally_of(&["a", "b", "a"]).total(), 3);
    }
}
