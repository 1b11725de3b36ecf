//! Ordered walk over the account's media catalog.

use futures_util::stream::{BoxStream, StreamExt};
use thiserror::Error;

use crate::auth::error::AuthError;
use crate::auth::Session;
use crate::icloud::{ICloudError, RemoteItem, RemoteService};

/// A catalog item together with its zero-based position in the walk.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub index: usize,
    pub item: RemoteItem,
}

#[derive(Debug, Error)]
#[error("Failed to list catalog item {index}: {source}")]
pub struct CatalogFetchError {
    pub index: usize,
    pub source: ICloudError,
}

pub type CatalogStream<'a> = BoxStream<'a, Result<CatalogEntry, CatalogFetchError>>;

/// Lazily list every item in ascending catalog order.
///
/// Each call starts from the beginning; there is no resume cursor.
pub fn list_all_items<'a>(
    service: &'a dyn RemoteService,
    session: &Session,
) -> Result<CatalogStream<'a>, AuthError> {
    if !session.is_authenticated() {
        return Err(AuthError::NotAuthenticated);
    }
    Ok(service
        .media_items()
        .enumerate()
        .map(|(index, result)| match result {
            Ok(item) => Ok(CatalogEntry { index, item }),
            Err(source) => Err(CatalogFetchError { index, source }),
        })
        .boxed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SessionState;
    use crate::icloud::fake::{item, FakeService};

    fn items() -> Vec<RemoteItem> {
        vec![
            item("A", "a.jpg", 10, "2023-05-01T10:00:00Z"),
            item("B", "b.jpg", 20, "2023-05-02T10:00:00Z"),
            item("C", "c.jpg", 30, "2023-05-03T10:00:00Z"),
        ]
    }

    #[tokio::test]
    async fn test_entries_carry_catalog_order() {
        let service = FakeService::with_items(items());
        let session = Session::new("u", SessionState::Authenticated);
        let entries: Vec<_> = list_all_items(&service, &session)
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
            .await;
        let seen: Vec<_> = entries
            .iter()
            .map(|e| (e.index, e.item.id.as_str()))
            .collect();
        assert_eq!(seen, vec![(0, "A"), (1, "B"), (2, "C")]);
    }

    #[tokio::test]
    async fn test_failure_surfaces_with_index() {
        let mut service = FakeService::with_items(items());
        service.catalog_fails_at = Some(1);
        let session = Session::new("u", SessionState::Authenticated);
        let results: Vec<_> = list_all_items(&service, &session)
            .unwrap()
            .collect()
            .await;
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        match &results[1] {
            Err(e) => {
                assert_eq!(e.index, 1);
                assert!(e.to_string().contains("catalog unavailable"));
            }
            Ok(entry) => panic!("expected an error, got {:?}", entry),
        }
    }

    #[tokio::test]
    async fn test_walk_is_restartable() {
        let service = FakeService::with_items(items());
        let session = Session::new("u", SessionState::Authenticated);
        for _ in 0..2 {
            let count = list_all_items(&service, &session).unwrap().count().await;
            assert_eq!(count, 3);
        }
    }

    #[test]
    fn test_pending_session_rejected() {
        let service = FakeService::with_items(items());
        let session = Session::new("u", SessionState::PendingChallenge);
        assert!(matches!(
            list_all_items(&service, &session),
            Err(AuthError::NotAuthenticated)
        ));
        assert!(service.calls().is_empty());
    }
}
