//! Sorted-set commands.

use crate::client::CacheClient;
use crate::cmd::{format_double, Cmd, ToArg};
use crate::error::CacheResult;
use crate::reply::{pairs, FromReply};
use crate::resp::RespValue;

/// One end of a score range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreBound {
    Inclusive(f64),
    Exclusive(f64),
    NegInfinity,
    PosInfinity,
}

impl ToArg for ScoreBound {
    fn write_arg(&self, out: &mut Vec<Vec<u8>>) {
        let text = match self {
            ScoreBound::Inclusive(score) => format_double(*score),
            ScoreBound::Exclusive(score) => format!("({}", format_double(*score)),
            ScoreBound::NegInfinity => "-inf".to_string(),
            ScoreBound::PosInfinity => "+inf".to_string(),
        };
        out.push(text.into_bytes());
    }
}

impl From<f64> for ScoreBound {
    fn from(score: f64) -> Self {
        ScoreBound::Inclusive(score)
    }
}

/// A member together with its score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMember {
    pub member: String,
    pub score: f64,
}

// `member, score, member, score, ...` replies of WITHSCORES queries.
struct WithScores(Vec<ScoredMember>);

impl FromReply for WithScores {
    fn from_reply(reply: RespValue) -> Option<Self> {
        pairs(reply)?
            .into_iter()
            .map(|(member, score)| {
                Some(ScoredMember {
                    member: String::from_reply(member)?,
                    score: f64::from_reply(score)?,
                })
            })
            .collect::<Option<Vec<_>>>()
            .map(WithScores)
    }
}

fn range_by_score(
    name: &str,
    key: &str,
    first: ScoreBound,
    second: ScoreBound,
    limit: Option<(i64, i64)>,
    with_scores: bool,
) -> Cmd {
    let mut cmd = Cmd::new(name).arg(key).arg(first).arg(second);
    cmd = cmd.arg_if(with_scores, "WITHSCORES");
    if let Some((offset, count)) = limit {
        cmd = cmd.arg("LIMIT").arg(offset).arg(count);
    }
    cmd
}

impl CacheClient {
    /// Returns 1 when the member is new, 0 when only its score changed.
    pub fn zadd(&self, key: &str, score: f64, member: &str) -> CacheResult<i64> {
        self.query(Cmd::new("ZADD").arg(self.key(key)).arg(score).arg(member))
    }

    /// Adds several `(member, score)` pairs; returns how many were new.
    pub fn zadd_multi(&self, key: &str, members: &[(&str, f64)]) -> CacheResult<i64> {
        let mut cmd = Cmd::new("ZADD").arg(self.key(key));
        for (member, score) in members {
            cmd = cmd.arg(*score).arg(*member);
        }
        self.query(cmd)
    }

    pub fn zcard(&self, key: &str) -> CacheResult<i64> {
        self.query(Cmd::new("ZCARD").arg(self.key(key)))
    }

    pub fn zcount(&self, key: &str, min: ScoreBound, max: ScoreBound) -> CacheResult<i64> {
        self.query(Cmd::new("ZCOUNT").arg(self.key(key)).arg(min).arg(max))
    }

    /// Adds `increment` to the member's score; returns the new score.
    pub fn zincrby(&self, key: &str, increment: f64, member: &str) -> CacheResult<f64> {
        self.query(Cmd::new("ZINCRBY").arg(self.key(key)).arg(increment).arg(member))
    }

    /// Members by ascending rank, inclusive; negative ranks count from the end.
    pub fn zrange(&self, key: &str, start: i64, stop: i64) -> CacheResult<Vec<String>> {
        self.query(Cmd::new("ZRANGE").arg(self.key(key)).arg(start).arg(stop))
    }

    pub fn zrange_with_scores(&self, key: &str, start: i64, stop: i64) -> CacheResult<Vec<ScoredMember>> {
        let cmd = Cmd::new("ZRANGE")
            .arg(self.key(key))
            .arg(start)
            .arg(stop)
            .arg("WITHSCORES");
        self.query(cmd).map(|WithScores(members)| members)
    }

    pub fn zrange_by_score(&self, key: &str, min: ScoreBound, max: ScoreBound) -> CacheResult<Vec<String>> {
        self.query(range_by_score("ZRANGEBYSCORE", &self.key(key), min, max, None, false))
    }

    pub fn zrange_by_score_limit(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
        offset: i64,
        count: i64,
    ) -> CacheResult<Vec<String>> {
        self.query(range_by_score(
            "ZRANGEBYSCORE",
            &self.key(key),
            min,
            max,
            Some((offset, count)),
            false,
        ))
    }

    pub fn zrange_by_score_with_scores(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
    ) -> CacheResult<Vec<ScoredMember>> {
        self.query(range_by_score("ZRANGEBYSCORE", &self.key(key), min, max, None, true))
            .map(|WithScores(members)| members)
    }

    pub fn zrange_by_score_with_scores_limit(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
        offset: i64,
        count: i64,
    ) -> CacheResult<Vec<ScoredMember>> {
        self.query(range_by_score(
            "ZRANGEBYSCORE",
            &self.key(key),
            min,
            max,
            Some((offset, count)),
            true,
        ))
        .map(|WithScores(members)| members)
    }

    /// Ascending rank of the member, `None` when it is not in the set.
    pub fn zrank(&self, key: &str, member: &str) -> CacheResult<Option<i64>> {
        self.query(Cmd::new("ZRANK").arg(self.key(key)).arg(member))
    }

    pub fn zrem(&self, key: &str, members: &[&str]) -> CacheResult<i64> {
        self.query(Cmd::new("ZREM").arg(self.key(key)).args(members))
    }

    pub fn zremrange_by_rank(&self, key: &str, start: i64, stop: i64) -> CacheResult<i64> {
        self.query(Cmd::new("ZREMRANGEBYRANK").arg(self.key(key)).arg(start).arg(stop))
    }

    pub fn zremrange_by_score(&self, key: &str, min: ScoreBound, max: ScoreBound) -> CacheResult<i64> {
        self.query(Cmd::new("ZREMRANGEBYSCORE").arg(self.key(key)).arg(min).arg(max))
    }

    pub fn zrevrange(&self, key: &str, start: i64, stop: i64) -> CacheResult<Vec<String>> {
        self.query(Cmd::new("ZREVRANGE").arg(self.key(key)).arg(start).arg(stop))
    }

    pub fn zrevrange_with_scores(&self, key: &str, start: i64, stop: i64) -> CacheResult<Vec<ScoredMember>> {
        let cmd = Cmd::new("ZREVRANGE")
            .arg(self.key(key))
            .arg(start)
            .arg(stop)
            .arg("WITHSCORES");
        self.query(cmd).map(|WithScores(members)| members)
    }

    /// Note the order of bounds: highest first.
    pub fn zrevrange_by_score(&self, key: &str, max: ScoreBound, min: ScoreBound) -> CacheResult<Vec<String>> {
        self.query(range_by_score("ZREVRANGEBYSCORE", &self.key(key), max, min, None, false))
    }

    pub fn zrevrange_by_score_limit(
        &self,
        key: &str,
        max: ScoreBound,
        min: ScoreBound,
        offset: i64,
        count: i64,
    ) -> CacheResult<Vec<String>> {
        self.query(range_by_score(
            "ZREVRANGEBYSCORE",
            &self.key(key),
            max,
            min,
            Some((offset, count)),
            false,
        ))
    }

    pub fn zrevrange_by_score_with_scores(
        &self,
        key: &str,
        max: ScoreBound,
        min: ScoreBound,
    ) -> CacheResult<Vec<ScoredMember>> {
        self.query(range_by_score("ZREVRANGEBYSCORE", &self.key(key), max, min, None, true))
            .map(|WithScores(members)| members)
    }

    pub fn zrevrange_by_score_with_scores_limit(
        &self,
        key: &str,
        max: ScoreBound,
        min: ScoreBound,
        offset: i64,
        count: i64,
    ) -> CacheResult<Vec<ScoredMember>> {
        self.query(range_by_score(
            "ZREVRANGEBYSCORE",
            &self.key(key),
            max,
            min,
            Some((offset, count)),
            true,
        ))
        .map(|WithScores(members)| members)
    }

    /// Descending rank of the member, `None` when it is not in the set.
    pub fn zrevrank(&self, key: &str, member: &str) -> CacheResult<Option<i64>> {
        self.query(Cmd::new("ZREVRANK").arg(self.key(key)).arg(member))
    }

    pub fn zscore(&self, key: &str, member: &str) -> CacheResult<Option<f64>> {
        self.query(Cmd::new("ZSCORE").arg(self.key(key)).arg(member))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(cmd: &Cmd) -> Vec<String> {
        cmd.as_args()
            .iter()
            .map(|arg| String::from_utf8(arg.clone()).unwrap())
            .collect()
    }

    #[test]
    fn score_bounds_render() {
        let cmd = Cmd::new("ZCOUNT")
            .arg(ScoreBound::Exclusive(1.5))
            .arg(ScoreBound::Inclusive(2.0))
            .arg(ScoreBound::NegInfinity)
            .arg(ScoreBound::PosInfinity);
        assert_eq!(rendered(&cmd), ["ZCOUNT", "(1.5", "2", "-inf", "+inf"]);
    }

    #[test]
    fn range_by_score_places_limit_last() {
        let cmd = range_by_score(
            "ZRANGEBYSCORE",
            "k",
            ScoreBound::NegInfinity,
            ScoreBound::from(10.0),
            Some((0, 2)),
            true,
        );
        assert_eq!(
            rendered(&cmd),
            ["ZRANGEBYSCORE", "k", "-inf", "10", "WITHSCORES", "LIMIT", "0", "2"]
        );
    }

    #[test]
    fn parses_with_scores_reply() {
        let bulk = |s: &str| RespValue::Bulk(Some(s.as_bytes().to_vec()));
        let reply = RespValue::Array(Some(vec![bulk("a"), bulk("1"), bulk("b"), bulk("2.5")]));
        let WithScores(members) = WithScores::from_reply(reply).unwrap();
        assert_eq!(
            members,
            vec![
                ScoredMember { member: "a".to_string(), score: 1.0 },
                ScoredMember { member: "b".to_string(), score: 2.5 },
            ]
        );
    }
}
