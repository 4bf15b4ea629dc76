use super::{from_timestamp, to_timestamp};
use crate::error::{Error, ErrorKind, Result};
use exn::ResultExt;
use presswatch_storage::{CommitId, Partition};
use presswatch_text::DiffStats;
use time::UtcDateTime;

/// One committed snapshot of an article.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub id: i64,
    pub article_id: i64,
    pub commit: CommitId,
    /// The partition the commit lives in. Replayed legacy history lives in
    /// its own partitions, apart from the article's live one.
    pub partition: Partition,
    pub title: String,
    pub byline: String,
    pub captured_at: UtcDateTime,
    pub boring: bool,
    pub diff: Option<DiffStats>,
    pub is_migrated: bool,
    pub migrated_commit: Option<String>,
    pub migrated_version_id: Option<i64>,
}

/// Where a replayed version came from in the legacy system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigratedFrom {
    pub version_id: i64,
    pub commit: String,
}

#[derive(Debug, Clone)]
pub struct NewVersion {
    pub article_id: i64,
    pub commit: CommitId,
    pub partition: Partition,
    pub title: String,
    pub byline: String,
    pub captured_at: UtcDateTime,
    pub boring: bool,
    pub diff: Option<DiffStats>,
    pub migrated: Option<MigratedFrom>,
}

#[derive(sqlx::FromRow)]
pub(crate) struct VersionRow {
    id: i64,
    article_id: i64,
    commit_id: String,
    partition: String,
    title: String,
    byline: String,
    captured_at: i64,
    boring: bool,
    diff_json: Option<String>,
    is_migrated: bool,
    migrated_commit_id: Option<String>,
    migrated_version_id: Option<i64>,
}

impl TryFrom<VersionRow> for Version {
    type Error = Error;
    fn try_from(row: VersionRow) -> Result<Self> {
        let diff = row
            .diff_json
            .as_deref()
            .map(serde_json::from_str::<DiffStats>)
            .transpose()
            .or_raise(|| ErrorKind::InvalidData("diff statistics"))?;
        Ok(Self {
            id: row.id,
            article_id: row.article_id,
            commit: CommitId::new(&row.commit_id).or_raise(|| ErrorKind::InvalidData("commit id"))?,
            partition: Partition::new(&row.partition).or_raise(|| ErrorKind::InvalidData("partition"))?,
            title: row.title,
            byline: row.byline,
            captured_at: from_timestamp(row.captured_at, "capture date")?,
            boring: row.boring,
            diff,
            is_migrated: row.is_migrated,
            migrated_commit: row.migrated_commit_id,
            migrated_version_id: row.migrated_version_id,
        })
    }
}

pub(crate) struct NewVersionRow {
    pub(crate) article_id: i64,
    pub(crate) commit_id: String,
    pub(crate) partition: String,
    pub(crate) title: String,
    pub(crate) byline: String,
    pub(crate) captured_at: i64,
    pub(crate) boring: bool,
    pub(crate) diff_json: Option<String>,
    pub(crate) is_migrated: bool,
    pub(crate) migrated_commit_id: Option<String>,
    pub(crate) migrated_version_id: Option<i64>,
}

impl TryFrom<&NewVersion> for NewVersionRow {
    type Error = Error;
    fn try_from(version: &NewVersion) -> Result<Self> {
        let diff_json = version
            .diff
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .or_raise(|| ErrorKind::InvalidData("diff statistics"))?;
        Ok(Self {
            article_id: version.article_id,
            commit_id: version.commit.as_str().to_string(),
            partition: version.partition.as_str().to_string(),
            title: version.title.clone(),
            byline: version.byline.clone(),
            captured_at: to_timestamp(version.captured_at),
            boring: version.boring,
            diff_json,
            is_migrated: version.migrated.is_some(),
            migrated_commit_id: version.migrated.as_ref().map(|m| m.commit.clone()),
            migrated_version_id: version.migrated.as_ref().map(|m| m.version_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(diff_json: Option<&str>) -> VersionRow {
        VersionRow {
            id: 3,
            article_id: 1,
            commit_id: "ABCDEF0123456789ABCDEF0123456789ABCDEF01".to_string(),
            partition: "2024-05".to_string(),
            title: "Headline".to_string(),
            byline: "By A. Reporter".to_string(),
            captured_at: 1_714_521_600,
            boring: false,
            diff_json: diff_json.map(str::to_string),
            is_migrated: false,
            migrated_commit_id: None,
            migrated_version_id: None,
        }
    }

    #[test]
    fn test_row_to_model() {
        let version = Version::try_from(row(Some(r#"{"chars_added":12,"chars_removed":3}"#))).unwrap();
        assert_eq!(version.commit.as_str(), "abcdef0123456789abcdef0123456789abcdef01");
        assert_eq!(version.diff, Some(DiffStats { chars_added: 12, chars_removed: 3 }));
    }

    #[test]
    fn test_first_version_has_no_diff() {
        let version = Version::try_from(row(None)).unwrap();
        assert_eq!(version.diff, None);
    }

    #[test]
    fn test_corrupt_diff_is_rejected() {
        let err = Version::try_from(row(Some("{not json"))).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidData("diff statistics")));
    }

    #[test]
    fn test_model_to_row_marks_migration() {
        let version = NewVersion {
            article_id: 1,
            commit: CommitId::new("abcd1234").unwrap(),
            partition: Partition::new("migrated/2014-03").unwrap(),
            title: String::new(),
            byline: String::new(),
            captured_at: UtcDateTime::now(),
            boring: true,
            diff: None,
            migrated: Some(MigratedFrom { version_id: 99, commit: "0badc0de".to_string() }),
        };
        let row = NewVersionRow::try_from(&version).unwrap();
        assert!(row.is_migrated);
        assert_eq!(row.migrated_version_id, Some(99));
        assert_eq!(row.diff_json, None);
    }
}
