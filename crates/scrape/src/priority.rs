//! Recheck scheduling.
//!
//! Every article has a delay threshold that grows with the time since its
//! last real update: freshly changed articles are rechecked every quarter
//! hour, month-old ones once a month. An article's priority is how many of
//! those thresholds have elapsed since it was last checked.

use presswatch_metadata::Article;
use std::cmp::Ordering;
use time::UtcDateTime;

const MINUTES_PER_DAY: i64 = 24 * 60;

/// Minutes to wait between checks, given the minutes since the last update.
pub fn update_delay(minutes_since_update: i64) -> f64 {
    let days_since_update = minutes_since_update.div_euclid(MINUTES_PER_DAY);
    if minutes_since_update < 3 * 60 {
        15.0
    } else if days_since_update < 1 {
        60.0
    } else if days_since_update < 7 {
        180.0
    } else if days_since_update < 30 {
        (3 * MINUTES_PER_DAY) as f64
    } else if days_since_update < 360 {
        (30 * MINUTES_PER_DAY) as f64
    } else {
        // Effectively never.
        MINUTES_PER_DAY as f64 * 365.0 * 1e5
    }
}

/// Recheck priority of `article` at `now`; above 1 means it is due.
///
/// Articles that were never checked have the highest possible priority.
pub fn priority(article: &Article, now: UtcDateTime) -> f64 {
    let Some(last_check) = article.last_check else {
        return f64::MAX;
    };
    let since_check = (now - last_check).whole_minutes();
    let since_update = (now - article.last_activity()).whole_minutes();
    since_check as f64 / update_delay(since_update)
}

/// Order `articles` by descending priority, keeping only the due ones unless
/// `update_all` is set.
pub fn select(articles: Vec<Article>, now: UtcDateTime, update_all: bool) -> Vec<Article> {
    let mut scored = articles
        .into_iter()
        .map(|article| (priority(&article, now), article))
        .filter(|(score, _)| update_all || *score > 1.0)
        .collect::<Vec<_>>();
    scored.sort_by(|(a, _), (b, _)| b.partial_cmp(a).unwrap_or(Ordering::Equal));
    scored.into_iter().map(|(_, article)| article).collect()
}
