//! # Status Management
//!
//! Updates Klusterlet status through a list of pure transforms.
//!
//! Each attempt re-reads the Klusterlet and re-applies every transform, so a
//! conflict never loses another writer's change. A status that comes out
//! unchanged is not written, which keeps no-op passes from producing watch
//! events.

use crate::controller::retry::{retry_on_conflict, RetryConfig};
use crate::crd::{set_generation, Condition, GenerationStatus, KlusterletStatus};
use crate::store::{KlusterletStore, StoreError};
use tracing::debug;

/// A pure modification of a Klusterlet status
pub type UpdateStatusFn = Box<dyn Fn(&mut KlusterletStatus) + Send + Sync>;

/// Set a condition, keeping one condition per type
///
/// The transition time only moves when the status value changes.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    match conditions.iter_mut().find(|c| c.r#type == condition.r#type) {
        Some(existing) => {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time.clone();
            } else if condition.last_transition_time.is_none() {
                condition.last_transition_time = Some(chrono::Utc::now().to_rfc3339());
            }
            *existing = condition;
        }
        None => {
            if condition.last_transition_time.is_none() {
                condition.last_transition_time = Some(chrono::Utc::now().to_rfc3339());
            }
            conditions.push(condition);
        }
    }
}

pub fn update_condition_fn(condition: Condition) -> UpdateStatusFn {
    Box::new(move |status| set_condition(&mut status.conditions, condition.clone()))
}

pub fn update_generations_fn(entries: Vec<GenerationStatus>) -> UpdateStatusFn {
    Box::new(move |status| {
        for entry in &entries {
            set_generation(&mut status.generations, entry.clone());
        }
    })
}

pub fn update_observed_generation_fn(generation: Option<i64>) -> UpdateStatusFn {
    Box::new(move |status| status.observed_generation = generation)
}

/// Apply `transforms` to the status of Klusterlet `name`
///
/// Returns the resulting status, or `None` when the Klusterlet is gone,
/// including when it disappears between the read and the write.
pub async fn update_klusterlet_status(
    store: &dyn KlusterletStore,
    retry: &RetryConfig,
    name: &str,
    transforms: &[UpdateStatusFn],
) -> Result<Option<KlusterletStatus>, StoreError> {
    retry_on_conflict(retry, "update_klusterlet_status", StoreError::is_conflict, || {
        update_status_once(store, name, transforms)
    })
    .await
}

async fn update_status_once(
    store: &dyn KlusterletStore,
    name: &str,
    transforms: &[UpdateStatusFn],
) -> Result<Option<KlusterletStatus>, StoreError> {
    let Some(mut klusterlet) = store.get(name).await? else {
        return Ok(None);
    };

    let current = klusterlet.status.clone().unwrap_or_default();
    let mut desired = current.clone();
    for transform in transforms {
        transform(&mut desired);
    }

    if desired == current {
        debug!(klusterlet = %name, "Skipping status update - status unchanged");
        return Ok(Some(current));
    }

    klusterlet.status = Some(desired);
    match store.update_status(&klusterlet).await {
        Ok(updated) => Ok(Some(updated.status.unwrap_or_default())),
        Err(e) if e.is_not_found() => {
            debug!(klusterlet = %name, "Klusterlet deleted before status update");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{KLUSTERLET_APPLIED, REASON_APPLIED, REASON_APPLY_FAILED};
    use crate::crd::{ConditionStatus, Klusterlet, KlusterletSpec};
    use crate::store::memory::{FailureKind, InjectedFailure, Verb};
    use crate::store::{InMemoryStore, MockKlusterletStore};

    fn store_with_demo() -> InMemoryStore {
        let store = InMemoryStore::new();
        store.insert_klusterlet(Klusterlet::new(
            "demo",
            KlusterletSpec {
                registration_image_pull_spec: "reg".to_string(),
                work_image_pull_spec: "work".to_string(),
                ..Default::default()
            },
        ));
        store
    }

    fn applied(status: ConditionStatus, reason: &str) -> Condition {
        Condition::new(KLUSTERLET_APPLIED, status, reason, "message")
    }

    #[test]
    fn test_set_condition_keeps_transition_time_for_same_status() {
        let mut conditions = vec![];
        let mut first = applied(ConditionStatus::False, REASON_APPLY_FAILED);
        first.last_transition_time = Some("2024-01-01T00:00:00+00:00".to_string());
        set_condition(&mut conditions, first);

        let mut second = applied(ConditionStatus::False, REASON_APPLY_FAILED);
        second.message = Some("other".to_string());
        set_condition(&mut conditions, second);

        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].message.as_deref(), Some("other"));
        assert_eq!(
            conditions[0].last_transition_time.as_deref(),
            Some("2024-01-01T00:00:00+00:00")
        );
    }

    #[test]
    fn test_set_condition_moves_transition_time_on_change() {
        let mut conditions = vec![];
        let mut first = applied(ConditionStatus::False, REASON_APPLY_FAILED);
        first.last_transition_time = Some("2024-01-01T00:00:00+00:00".to_string());
        set_condition(&mut conditions, first);
        set_condition(&mut conditions, applied(ConditionStatus::True, REASON_APPLIED));

        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].status, ConditionStatus::True);
        assert_ne!(
            conditions[0].last_transition_time.as_deref(),
            Some("2024-01-01T00:00:00+00:00")
        );
    }

    #[tokio::test]
    async fn test_update_status_applies_all_transforms() {
        let store = store_with_demo();
        let entry = GenerationStatus {
            group: "apps".to_string(),
            version: "v1".to_string(),
            resource: "deployments".to_string(),
            namespace: "agents".to_string(),
            name: "demo-work-agent".to_string(),
            last_generation: 2,
        };

        let status = update_klusterlet_status(
            &store,
            &RetryConfig::immediate(3),
            "demo",
            &[
                update_condition_fn(applied(ConditionStatus::True, REASON_APPLIED)),
                update_generations_fn(vec![entry.clone()]),
                update_observed_generation_fn(Some(1)),
            ],
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(status.observed_generation, Some(1));
        assert_eq!(status.generations, vec![entry]);
        assert_eq!(store.klusterlet("demo").unwrap().status, Some(status));
    }

    #[tokio::test]
    async fn test_update_status_missing_klusterlet() {
        let store = InMemoryStore::new();
        let result = update_klusterlet_status(
            &store,
            &RetryConfig::immediate(3),
            "gone",
            &[update_observed_generation_fn(Some(1))],
        )
        .await
        .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_update_status_retries_conflict_with_fresh_read() {
        let store = store_with_demo();
        store.fail(
            InjectedFailure::new(Verb::UpdateStatus, "Klusterlet", Some("demo"), FailureKind::Conflict)
                .times(2),
        );

        let status = update_klusterlet_status(
            &store,
            &RetryConfig::immediate(3),
            "demo",
            &[update_observed_generation_fn(Some(4))],
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(status.observed_generation, Some(4));

        let reads = store
            .operations()
            .iter()
            .filter(|op| op.verb == Verb::Get)
            .count();
        assert_eq!(reads, 3);
    }

    #[tokio::test]
    async fn test_update_status_skips_unchanged_write() {
        let store = store_with_demo();
        let retry = RetryConfig::immediate(3);
        let transforms = [update_condition_fn(applied(ConditionStatus::True, REASON_APPLIED))];

        update_klusterlet_status(&store, &retry, "demo", &transforms).await.unwrap();
        store.clear_operations();
        update_klusterlet_status(&store, &retry, "demo", &transforms).await.unwrap();

        assert!(store.operations().iter().all(|op| op.verb != Verb::UpdateStatus));
    }

    #[tokio::test]
    async fn test_update_status_klusterlet_deleted_before_write() {
        let mut store = MockKlusterletStore::new();
        store.expect_get().times(1).returning(|name| {
            Ok(Some(Klusterlet::new(name, KlusterletSpec::default())))
        });
        store
            .expect_update_status()
            .times(1)
            .returning(|_| Err(StoreError::NotFound("Klusterlet demo".to_string())));

        let result = update_klusterlet_status(
            &store,
            &RetryConfig::immediate(3),
            "demo",
            &[update_observed_generation_fn(Some(1))],
        )
        .await
        .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_update_status_gives_up_after_bounded_conflicts() {
        let mut store = MockKlusterletStore::new();
        store.expect_get().times(2).returning(|name| {
            Ok(Some(Klusterlet::new(
                name,
                KlusterletSpec::default(),
            )))
        });
        store
            .expect_update_status()
            .times(2)
            .returning(|_| Err(StoreError::Conflict("Klusterlet demo".to_string())));

        let err = update_klusterlet_status(
            &store,
            &RetryConfig::immediate(2),
            "demo",
            &[update_observed_generation_fn(Some(1))],
        )
        .await
        .unwrap_err();
        assert!(err.is_conflict());
    }
}
