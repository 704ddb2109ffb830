use std::{collections::HashSet, sync::Arc};

use shared::protocol::ScanResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategorySelection {
    None,
    Some,
    All,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    paths: Arc<HashSet<String>>,
}

impl Selection {
    pub fn contains(&self, path: &str) -> bool {
        self.paths.contains(path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn sorted_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.paths.iter().cloned().collect();
        paths.sort();
        paths
    }

    pub fn toggle_file(&mut self, result: &ScanResult, path: &str) -> bool {
        if !result.loaded_files().any(|file| file.path == path) {
            return false;
        }
        let paths = Arc::make_mut(&mut self.paths);
        if paths.remove(path) {
            false
        } else {
            paths.insert(path.to_string());
            true
        }
    }

    pub fn toggle_category(&mut self, result: &ScanResult, category_key: &str) -> CategorySelection {
        let Some(category) = result.category(category_key) else {
            return CategorySelection::None;
        };
        if category.files.is_empty() {
            return CategorySelection::None;
        }

        let all_selected = category
            .files
            .iter()
            .all(|file| self.paths.contains(&file.path));
        let paths = Arc::make_mut(&mut self.paths);
        if all_selected {
            for file in &category.files {
                paths.remove(&file.path);
            }
            CategorySelection::None
        } else {
            paths.extend(category.files.iter().map(|file| file.path.clone()));
            CategorySelection::All
        }
    }

    pub fn select_all(&mut self, result: &ScanResult) {
        let paths = Arc::make_mut(&mut self.paths);
        paths.extend(result.loaded_files().map(|file| file.path.clone()));
    }

    pub fn deselect_all(&mut self) {
        if !self.paths.is_empty() {
            self.paths = Arc::default();
        }
    }

    pub fn selected_size(&self, result: &ScanResult) -> u64 {
        result
            .loaded_files()
            .filter(|file| self.paths.contains(&file.path))
            .map(|file| file.size)
            .sum()
    }

    pub fn category_state(&self, result: &ScanResult, category_key: &str) -> CategorySelection {
        let Some(category) = result.category(category_key) else {
            return CategorySelection::None;
        };
        let selected = category
            .files
            .iter()
            .filter(|file| self.paths.contains(&file.path))
            .count();
        match selected {
            0 => CategorySelection::None,
            n if n == category.files.len() => CategorySelection::All,
            _ => CategorySelection::Some,
        }
    }

    /// Drops members that no longer appear among the loaded files.
    pub fn retain_loaded(&mut self, result: &ScanResult) {
        let loaded: HashSet<&str> = result.loaded_files().map(|file| file.path.as_str()).collect();
        if self.paths.iter().all(|path| loaded.contains(path.as_str())) {
            return;
        }
        Arc::make_mut(&mut self.paths).retain(|path| loaded.contains(path.as_str()));
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpandedSet {
    keys: Arc<HashSet<String>>,
}

impl ExpandedSet {
    pub fn contains(&self, category_key: &str) -> bool {
        self.keys.contains(category_key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn toggle(&mut self, result: &ScanResult, category_key: &str) -> bool {
        if result.category(category_key).is_none() {
            return false;
        }
        let keys = Arc::make_mut(&mut self.keys);
        if keys.remove(category_key) {
            false
        } else {
            keys.insert(category_key.to_string());
            true
        }
    }

    pub fn retain_known(&mut self, result: &ScanResult) {
        if self.keys.iter().all(|key| result.category(key).is_some()) {
            return;
        }
        Arc::make_mut(&mut self.keys).retain(|key| result.category(key).is_some());
    }
}

#[cfg(test)]
#[path = "tests/selection_tests.rs"]
mod tests;
