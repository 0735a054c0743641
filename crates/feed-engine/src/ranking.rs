use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::EntityRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    #[default]
    Hot,
    New,
    Top,
    Active,
}

impl SortMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SortMode::Hot => "hot",
            SortMode::New => "new",
            SortMode::Top => "top",
            SortMode::Active => "active",
        }
    }
}

impl fmt::Display for SortMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "hot" => Ok(SortMode::Hot),
            "new" => Ok(SortMode::New),
            "top" => Ok(SortMode::Top),
            "active" => Ok(SortMode::Active),
            other => Err(format!("unknown sort mode {other}")),
        }
    }
}

/// Time-decayed engagement: `(score + 2·replies + 5·e^(−age/2)) / (age + 2)^1.5`, age in hours.
pub fn hot_score(score: i64, reply_count: u32, age_hours: f64) -> f64 {
    let age = age_hours.max(0.0);
    let engagement = score as f64 + 2.0 * f64::from(reply_count);
    let recency_boost = 5.0 * (-age / 2.0).exp();
    (engagement + recency_boost) / (age + 2.0).powf(1.5)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Tier {
    Pinned,
    Boosted,
    Ranked,
}

struct Keyed<'a> {
    tier: Tier,
    key: f64,
    entity: &'a EntityRef,
}

/// Orders `entities` for display: pinned first, then unexpired local boosts, then `mode`.
///
/// Keys are derived once per entity; ties keep their incoming relative order.
pub fn sort(entities: &[EntityRef], mode: SortMode, now: DateTime<Utc>) -> Vec<EntityRef> {
    let mut keyed: Vec<Keyed<'_>> = entities
        .iter()
        .map(|entity| {
            let (tier, key) = if entity.pinned {
                (Tier::Pinned, 0.0)
            } else if let Some(until) = entity.local_priority.filter(|until| *until > now) {
                (Tier::Boosted, until.timestamp_millis() as f64)
            } else {
                (Tier::Ranked, rank_key(entity, mode, now))
            };
            Keyed { tier, key, entity }
        })
        .collect();

    keyed.sort_by(|a, b| match a.tier.cmp(&b.tier) {
        Ordering::Equal if a.tier == Tier::Pinned => Ordering::Equal,
        Ordering::Equal => b.key.total_cmp(&a.key),
        other => other,
    });

    keyed
        .into_iter()
        .map(|keyed| EntityRef::clone(keyed.entity))
        .collect()
}

fn rank_key(entity: &EntityRef, mode: SortMode, now: DateTime<Utc>) -> f64 {
    match mode {
        SortMode::Hot => {
            let age_hours = (now - entity.created_at).num_milliseconds() as f64 / 3_600_000.0;
            hot_score(entity.score, entity.reply_count, age_hours)
        }
        SortMode::New => entity.created_at.timestamp_millis() as f64,
        SortMode::Top => entity.score as f64,
        SortMode::Active => (u64::from(entity.reply_count) + entity.reaction_count() as u64) as f64,
    }
}
