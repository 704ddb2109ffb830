use chrono::{DateTime, Local, Utc};
use scan_session::{CategorySelection, SessionSnapshot};
use shared::protocol::{CleanResult, ScanProgress, ScanResult};

pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

pub fn timestamp(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|utc| {
            utc.with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        })
        .unwrap_or_else(|| "-".to_string())
}

pub fn progress_line(progress: &ScanProgress) -> String {
    format!(
        "{:>5.1}%  {} files  {}  {}",
        progress.percent,
        progress.scanned_files,
        human_size(progress.scanned_size),
        progress.current_path
    )
}

pub fn print_result(result: &ScanResult) {
    println!(
        "Scan {} finished at {} in {:.1}s: {} files, {} folders, {}",
        result.session_id,
        timestamp(result.end_time),
        result.duration_ms as f64 / 1000.0,
        result.total_files,
        result.total_folders,
        human_size(result.total_size)
    );
    for category in &result.categories {
        let more = if category.has_more { " (more available)" } else { "" };
        println!(
            "  {:<20} {:>8} files {:>12}  loaded {}{more}",
            category.key,
            category.file_count,
            human_size(category.total_size),
            category.files.len()
        );
    }
}

pub fn print_selection(snapshot: &SessionSnapshot) {
    let Some(result) = snapshot.result.as_ref() else {
        return;
    };
    for category in &result.categories {
        let mark = match snapshot.selection.category_state(result, &category.key) {
            CategorySelection::All => "[x]",
            CategorySelection::Some => "[-]",
            CategorySelection::None => "[ ]",
        };
        println!("  {mark} {}", category.key);
    }
    println!(
        "Selected {} files, {}",
        snapshot.selection.len(),
        human_size(snapshot.selected_size())
    );
}

pub fn print_clean_result(clean: &CleanResult) {
    println!(
        "Removed {} of {} files ({}) in {} ms; {} failed, {} skipped",
        clean.cleaned_files,
        clean.total_files,
        human_size(clean.cleaned_size),
        clean.duration_ms,
        clean.failed_files,
        clean.skipped_files
    );
    for error in &clean.errors {
        println!("  {} [{}]: {}", error.path, error.error_code, error.error_message);
    }
}
