use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use presswatch_metadata::{Article, Version};
use presswatch_storage::VersionStore;

/// The stored snapshot of `version`, or `None` if the store no longer has it.
pub async fn fetch_text(store: &dyn VersionStore, article: &Article, version: &Version) -> Result<Option<Vec<u8>>> {
    let path = article.filename().or_raise(|| ErrorKind::Storage)?;
    store
        .read_at(&version.partition, &version.commit, &path)
        .await
        .or_raise(|| ErrorKind::Storage)
}
