/// An article the migration abandoned, recorded for manual repair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationIssue {
    pub legacy_article_id: i64,
    pub legacy_version_id: Option<i64>,
    pub live_article_id: Option<i64>,
    pub live_version_id: Option<i64>,
    pub commit: Option<String>,
    pub message: String,
}
