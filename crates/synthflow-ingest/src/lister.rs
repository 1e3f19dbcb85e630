//! Discovery of objects not yet loaded

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument};

use crate::error::Result;
use crate::remote::with_timeout;
use crate::storage::ObjectStore;
use crate::watermark::Watermark;

const LOADABLE_SUFFIX: &str = ".json";

/// Keep `.json` keys strictly greater than `after`, ascending, at most `cap`
pub fn select_new<I>(keys: I, after: Option<&str>, cap: usize) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut selected: Vec<String> = keys
        .into_iter()
        .filter(|key| key.ends_with(LOADABLE_SUFFIX))
        .filter(|key| after.is_none_or(|mark| key.as_str() > mark))
        .collect();

    selected.sort_unstable();
    selected.dedup();
    selected.truncate(cap);
    selected
}

pub struct IncrementalLister {
    store: Arc<dyn ObjectStore>,
    timeout: Duration,
}

impl IncrementalLister {
    pub fn new(store: Arc<dyn ObjectStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Keys under `prefix` past the watermark, capped to `batch_cap`
    #[instrument(skip(self, watermark), fields(after = watermark.map(|w| w.last_processed_key.as_str())))]
    pub async fn list_new(
        &self,
        prefix: &str,
        watermark: Option<&Watermark>,
        batch_cap: usize,
    ) -> Result<Vec<String>> {
        let objects =
            with_timeout(format!("list {}", prefix), self.timeout, self.store.list(prefix)).await?;
        let listed = objects.len();

        let selected = select_new(
            objects.into_iter().map(|o| o.key),
            watermark.map(|w| w.last_processed_key.as_str()),
            batch_cap,
        );

        debug!(listed, selected = selected.len(), "Listed candidate objects");

        Ok(selected)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::storage::InMemoryObjectStore;
    use crate::watermark::{InMemoryWatermarkStore, WatermarkStore};
    use chrono::Utc;
    use proptest::prelude::*;

    fn lister_over(keys: &[String]) -> IncrementalLister {
        let store = InMemoryObjectStore::new("bucket");
        for key in keys {
            store.insert(key.clone(), b"{}".to_vec(), Utc::now());
        }
        IncrementalLister::new(Arc::new(store), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_first_run_takes_smallest_keys_up_to_cap() {
        let keys: Vec<String> = (0..150)
            .rev()
            .map(|n| format!("raw/patients/p{:03}/bundle.json", n))
            .collect();
        let lister = lister_over(&keys);

        let selected = lister.list_new("raw/patients/", None, 100).await.unwrap();

        assert_eq!(selected.len(), 100);
        assert_eq!(selected[0], "raw/patients/p000/bundle.json");
        assert_eq!(selected[99], "raw/patients/p099/bundle.json");
    }

    #[tokio::test]
    async fn test_keys_at_or_below_watermark_are_excluded() {
        let keys: Vec<String> = ["p3", "p5", "p6", "p7"]
            .iter()
            .map(|p| format!("raw/patients/{}.json", p))
            .collect();
        let lister = lister_over(&keys);
        let store = InMemoryWatermarkStore::starting_at("raw/patients/p5.json");
        let watermark = store.read_latest().await.unwrap();

        let selected = lister
            .list_new("raw/patients/", watermark.as_ref(), 100)
            .await
            .unwrap();

        assert_eq!(selected, vec!["raw/patients/p6.json", "raw/patients/p7.json"]);
    }

    #[test]
    fn test_non_json_keys_are_ignored() {
        let keys = vec![
            "raw/patients/e1/a.json".to_string(),
            "raw/patients/e1/.uploaded".to_string(),
            "raw/patients/e1/readme.txt".to_string(),
        ];
        assert_eq!(select_new(keys, None, 10), vec!["raw/patients/e1/a.json"]);
    }

    #[test]
    fn test_key_containing_watermark_is_still_new() {
        let keys = vec!["raw/patients/p5.json.bak.json".to_string()];
        assert_eq!(
            select_new(keys, Some("raw/patients/p5.json"), 10),
            vec!["raw/patients/p5.json.bak.json"]
        );
    }

    proptest! {
        #[test]
        fn prop_selection_is_sorted_bounded_and_past_watermark(
            names in prop::collection::vec("[a-z0-9]{1,8}", 0..60),
            mark in prop::option::of("[a-z0-9]{1,8}"),
            cap in 1usize..40,
        ) {
            let keys: Vec<String> = names.iter().map(|n| format!("raw/patients/{}.json", n)).collect();
            let after = mark.map(|m| format!("raw/patients/{}.json", m));

            let selected = select_new(keys.clone(), after.as_deref(), cap);

            prop_assert!(selected.len() <= cap);
            prop_assert!(selected.windows(2).all(|w| w[0] < w[1]));
            if let Some(after) = &after {
                prop_assert!(selected.iter().all(|k| k > after));
            }

            // Selection is a prefix of every eligible key, so nothing smaller is skipped
            let mut eligible: Vec<String> = keys
                .into_iter()
                .filter(|k| after.as_ref().is_none_or(|a| k > a))
                .collect();
            eligible.sort();
            eligible.dedup();
            prop_assert_eq!(&selected[..], &eligible[..selected.len()]);
        }

        #[test]
        fn prop_advancing_to_last_selected_never_repeats(
            names in prop::collection::vec("[a-z0-9]{1,8}", 1..60),
            cap in 1usize..20,
        ) {
            let keys: Vec<String> = names.iter().map(|n| format!("raw/patients/{}.json", n)).collect();

            let first = select_new(keys.clone(), None, cap);
            let mark = first.last().cloned();
            let second = select_new(keys, mark.as_deref(), cap);

            prop_assert!(second.iter().all(|k| !first.contains(k)));
        }
    }
}
