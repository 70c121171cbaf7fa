//! Tag usage and co-occurrence ranking
//!
//! Both are derived from the association rows and never stored.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use redlog_persistence::{LogTagData, TagData, TagUsage, normalize_tag_name};

/// A tag and how often it appears together with the queried tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagCoOccurrence {
    pub tag: TagData,
    pub count: u64,
}

/// A tag and the number of logs it is attached to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagStat {
    pub tag: TagData,
    pub count: u64,
}

/// Frequency descending, then name ascending (case-insensitive)
fn by_count_then_name(a: (&TagData, u64), b: (&TagData, u64)) -> Ordering {
    b.1.cmp(&a.1)
        .then_with(|| normalize_tag_name(&a.0.name).cmp(&normalize_tag_name(&b.0.name)))
        .then_with(|| a.0.id.cmp(&b.0.id))
}

/// Rank the tags attached to the same logs as `target`.
///
/// `associations` are the association rows of every log carrying `target`;
/// `tags` resolves tag ids. Unresolvable ids are skipped.
pub fn rank_co_occurrence(
    target: i64,
    associations: &[LogTagData],
    tags: &HashMap<i64, TagData>,
    limit: usize,
) -> Vec<TagCoOccurrence> {
    let mut counts: HashMap<i64, u64> = HashMap::new();
    for association in associations {
        if association.tag_id != target {
            *counts.entry(association.tag_id).or_default() += 1;
        }
    }

    let mut ranked: Vec<TagCoOccurrence> = counts
        .into_iter()
        .filter_map(|(tag_id, count)| {
            tags.get(&tag_id).map(|tag| TagCoOccurrence {
                tag: tag.clone(),
                count,
            })
        })
        .collect();
    ranked.sort_by(|a, b| by_count_then_name((&a.tag, a.count), (&b.tag, b.count)));
    ranked.truncate(limit);
    ranked
}

/// Usage of every tag, unused tags included with a count of zero
pub fn tag_stats(tags: Vec<TagData>, usage: &[TagUsage]) -> Vec<TagStat> {
    let counts: HashMap<i64, u64> = usage.iter().map(|u| (u.tag_id, u.count)).collect();
    let mut stats: Vec<TagStat> = tags
        .into_iter()
        .map(|tag| TagStat {
            count: counts.get(&tag.id).copied().unwrap_or(0),
            tag,
        })
        .collect();
    stats.sort_by(|a, b| by_count_then_name((&a.tag, a.count), (&b.tag, b.count)));
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use redlog_persistence::TagKind;

    fn tag(id: i64, name: &str) -> TagData {
        TagData {
            id,
            name: name.to_string(),
            color: "#6B7280".to_string(),
            kind: TagKind::default(),
            description: None,
            created_by: "alice".to_string(),
            created_at: Utc::now().naive_utc(),
        }
    }

    fn assoc(log_id: i64, tag_id: i64) -> LogTagData {
        LogTagData {
            log_id,
            tag_id,
            native: false,
        }
    }

    #[test]
    fn test_rank_orders_by_frequency_then_name() {
        let tags: HashMap<i64, TagData> = [tag(1, "a"), tag(2, "b"), tag(3, "c"), tag(4, "Alpha")]
            .into_iter()
            .map(|t| (t.id, t))
            .collect();
        // A(1) with B three times, C once, Alpha once
        let associations = vec![
            assoc(10, 1),
            assoc(10, 2),
            assoc(11, 1),
            assoc(11, 2),
            assoc(11, 3),
            assoc(12, 1),
            assoc(12, 2),
            assoc(12, 4),
        ];

        let ranked = rank_co_occurrence(1, &associations, &tags, 10);
        let names: Vec<_> = ranked.iter().map(|r| r.tag.name.as_str()).collect();
        assert_eq!(names, vec!["b", "Alpha", "c"]);
        assert_eq!(ranked[0].count, 3);

        let top = rank_co_occurrence(1, &associations, &tags, 1);
        assert_eq!(top.len(), 1);
    }

    #[test]
    fn test_tag_stats_include_unused() {
        let stats = tag_stats(
            vec![tag(1, "recon"), tag(2, "exfil"), tag(3, "c2")],
            &[
                TagUsage {
                    tag_id: 1,
                    count: 4,
                },
                TagUsage {
                    tag_id: 3,
                    count: 4,
                },
            ],
        );
        let summary: Vec<_> = stats
            .iter()
            .map(|s| (s.tag.name.as_str(), s.count))
            .collect();
        assert_eq!(summary, vec![("c2", 4), ("recon", 4), ("exfil", 0)]);
    }
}
