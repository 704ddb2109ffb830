use std::{collections::HashSet, sync::Arc};

use shared::protocol::{Category, CategoryPage, ScanResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RemovalSummary {
    pub removed_files: u64,
    pub removed_size: u64,
    pub dropped_categories: usize,
}

#[derive(Debug, Clone)]
pub struct ResultModel {
    inner: Arc<ScanResult>,
}

impl ResultModel {
    pub fn new(mut result: ScanResult) -> Self {
        for category in &mut result.categories {
            let (rest_count, rest_size) = unloaded_remainder(category);
            rederive_category(category, rest_count, rest_size);
        }
        rederive_totals(&mut result);
        Self {
            inner: Arc::new(result),
        }
    }

    pub fn snapshot(&self) -> Arc<ScanResult> {
        Arc::clone(&self.inner)
    }

    pub fn get(&self) -> &ScanResult {
        &self.inner
    }

    pub fn append_page(&mut self, category_key: &str, offset: u64, page: &CategoryPage) -> bool {
        let matches = self
            .inner
            .category(category_key)
            .is_some_and(|category| category.loaded_count() == offset);
        if !matches {
            return false;
        }

        let result = Arc::make_mut(&mut self.inner);
        let Some(category) = result
            .categories
            .iter_mut()
            .find(|category| category.key == category_key)
        else {
            return false;
        };

        let (rest_count, rest_size) = unloaded_remainder(category);
        let appended_count = page.files.len() as u64;
        let appended_size: u64 = page.files.iter().map(|file| file.size).sum();
        category.files.extend(page.files.iter().cloned());

        // An empty page means the engine has nothing past this offset.
        let (rest_count, rest_size) = if !page.has_more || page.files.is_empty() {
            (0, 0)
        } else if page.total > 0 {
            // The engine's own total wins when it reports one.
            let rest_count = page.total.saturating_sub(category.loaded_count());
            (rest_count, rest_size.saturating_sub(appended_size))
        } else {
            (
                rest_count.saturating_sub(appended_count),
                rest_size.saturating_sub(appended_size),
            )
        };
        rederive_category(category, rest_count, rest_size);
        rederive_totals(result);
        true
    }

    pub fn remove_paths(&mut self, deleted: &HashSet<String>) -> RemovalSummary {
        let touches_model = self
            .inner
            .loaded_files()
            .any(|file| deleted.contains(&file.path));
        if !touches_model {
            return RemovalSummary::default();
        }

        let result = Arc::make_mut(&mut self.inner);
        let mut summary = RemovalSummary::default();
        for category in &mut result.categories {
            let (rest_count, rest_size) = unloaded_remainder(category);
            category.files.retain(|file| {
                if deleted.contains(&file.path) {
                    summary.removed_files += 1;
                    summary.removed_size += file.size;
                    false
                } else {
                    true
                }
            });
            rederive_category(category, rest_count, rest_size);
        }

        let before = result.categories.len();
        result.categories.retain(|category| category.file_count > 0);
        summary.dropped_categories = before - result.categories.len();
        rederive_totals(result);
        summary
    }

    pub fn clear_categories(&mut self) {
        let result = Arc::make_mut(&mut self.inner);
        result.categories.clear();
        rederive_totals(result);
    }

    pub fn category_keys(&self) -> impl Iterator<Item = &str> {
        self.inner
            .categories
            .iter()
            .map(|category| category.key.as_str())
    }
}

fn unloaded_remainder(category: &Category) -> (u64, u64) {
    let rest_count = category.file_count.saturating_sub(category.loaded_count());
    if rest_count == 0 {
        return (0, 0);
    }
    (
        rest_count,
        category.total_size.saturating_sub(category.loaded_size()),
    )
}

fn rederive_category(category: &mut Category, rest_count: u64, rest_size: u64) {
    category.file_count = category.loaded_count() + rest_count;
    category.total_size = category.loaded_size() + rest_size;
    category.has_more = rest_count > 0;
}

fn rederive_totals(result: &mut ScanResult) {
    result.total_files = result
        .categories
        .iter()
        .map(|category| category.file_count)
        .sum();
    result.total_size = result
        .categories
        .iter()
        .map(|category| category.total_size)
        .sum();
}

#[cfg(test)]
#[path = "tests/result_model_tests.rs"]
mod tests;
