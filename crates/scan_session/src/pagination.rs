use shared::protocol::CategoryPage;
use tracing::{debug, warn};

use crate::controller::{SessionController, SessionEvent};

impl SessionController {
    /// `offset` must equal the number of rows already loaded for the category.
    pub async fn load_more(
        &self,
        category_key: &str,
        offset: u64,
        limit: u64,
    ) -> Option<CategoryPage> {
        let (session_id, generation) = {
            let mut state = self.inner.lock().await;
            let session_id = state.correlation.known()?.clone();
            let category = state.result.as_ref()?.get().category(category_key)?;
            if !category.has_more {
                debug!(category = category_key, "pagination: category fully loaded");
                return None;
            }
            if category.loaded_count() != offset {
                warn!(
                    category = category_key,
                    offset,
                    loaded = category.loaded_count(),
                    "pagination: offset does not match loaded rows"
                );
                return None;
            }
            if !state.inflight_pages.insert(category_key.to_string()) {
                debug!(category = category_key, "pagination: fetch already in flight");
                return None;
            }
            (session_id, state.generation)
        };

        let fetched = self
            .engine
            .category_files(&session_id, category_key, offset, limit)
            .await;

        let mut state = self.inner.lock().await;
        if state.generation != generation {
            debug!(category = category_key, "pagination: session changed during fetch");
            return None;
        }
        state.inflight_pages.remove(category_key);

        let failure = match fetched {
            Ok(Some(page)) => {
                let appended = state
                    .result
                    .as_mut()
                    .is_some_and(|model| model.append_page(category_key, offset, &page));
                if !appended {
                    debug!(category = category_key, offset, "pagination: page no longer applies");
                    return None;
                }
                drop(state);
                debug!(
                    category = category_key,
                    offset,
                    rows = page.files.len(),
                    has_more = page.has_more,
                    "pagination: appended page"
                );
                self.emit(SessionEvent::ResultUpdated);
                return Some(page);
            }
            Ok(None) => "engine has no rows for this category".to_string(),
            Err(err) => format!("{err:#}"),
        };
        drop(state);

        warn!(category = category_key, offset, "pagination: fetch failed: {failure}");
        self.emit(SessionEvent::PaginationFailed {
            category: category_key.to_string(),
            message: failure,
        });
        None
    }

    pub async fn load_next_page(&self, category_key: &str) -> Option<CategoryPage> {
        let offset = {
            let state = self.inner.lock().await;
            state.result.as_ref()?.get().category(category_key)?.loaded_count()
        };
        self.load_more(category_key, offset, self.options.page_size)
            .await
    }
}

#[cfg(test)]
#[path = "tests/pagination_tests.rs"]
mod tests;
