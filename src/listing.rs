//! Remote listing enumeration.

use crate::error::{Result, SyncError};
use crate::keys::KeyMapping;
use crate::store::ObjectStore;
use crate::types::RemoteObject;
use futures_util::stream::{self, Stream, TryStreamExt};
use std::path::PathBuf;
use tracing::debug;

enum Cursor {
    Start,
    Next(String),
    Done,
}

/// Lazily lists every object under `prefix`, following continuation tokens
/// until the store reports the listing complete.
///
/// Pages are fetched on demand: the first item is available after the first
/// page arrives. Any store failure ends the stream with
/// [`SyncError::Listing`].
pub fn list_objects<'a>(
    store: &'a dyn ObjectStore,
    prefix: &'a str,
) -> impl Stream<Item = Result<RemoteObject>> + Send + 'a {
    stream::try_unfold(Cursor::Start, move |cursor| async move {
        let token = match cursor {
            Cursor::Start => None,
            Cursor::Next(token) => Some(token),
            Cursor::Done => return Ok::<_, SyncError>(None),
        };

        let page = store
            .list_page(prefix, token)
            .await
            .map_err(|e| SyncError::Listing {
                prefix: prefix.to_string(),
                message: e.to_string(),
            })?;
        debug!("Listed {} objects under {}", page.objects.len(), prefix);

        let next = match page.next_token {
            Some(token) => Cursor::Next(token),
            None => Cursor::Done,
        };
        let items = stream::iter(page.objects.into_iter().map(Ok::<_, SyncError>));
        Ok(Some((items, next)))
    })
    .try_flatten()
}

/// Drains the listing under the mapping's prefix and pairs every
/// transferable object with its local path.
///
/// Pseudo-directory markers and keys that do not map into the workspace are
/// dropped.
pub async fn collect_workspace_objects(
    store: &dyn ObjectStore,
    mapping: &KeyMapping,
) -> Result<Vec<(RemoteObject, PathBuf)>> {
    let prefix = mapping.listing_prefix();
    let listing = list_objects(store, &prefix);
    futures_util::pin_mut!(listing);

    let mut objects = Vec::new();
    while let Some(object) = listing.try_next().await? {
        match mapping.path_for(&object.key) {
            Some(path) => objects.push((object, path)),
            None => debug!("Skipping non-file key {}", object.key),
        }
    }
    Ok(objects)
}
