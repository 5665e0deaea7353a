use std::{
    fs::OpenOptions,
    io::Write,
    panic::{PanicHookInfo, take_hook},
    path::{Path, PathBuf},
    thread,
};

use chrono::Local;

use super::LOG_FILE_NAME;

/// Log panics through `tracing`.
///
/// With a log directory, the record is also appended straight to the current
/// daily log file, since the non-blocking writer may not flush before an
/// abort.
pub fn install(log_dir: Option<PathBuf>) {
    let previous_hook = take_hook();

    std::panic::set_hook(Box::new(move |panic_info: &PanicHookInfo<'_>| {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let record = format_panic_record(panic_info);
            tracing::error!(target: "notificator::panic", "{record}");

            if let Some(dir) = &log_dir {
                let _ = append_panic_record(dir, &record);
            }
        }));

        previous_hook(panic_info);
    }));
}

fn append_panic_record(log_dir: &Path, record: &str) -> std::io::Result<()> {
    // Matches `tracing_appender::rolling::daily` naming.
    let filename = format!("{LOG_FILE_NAME}.{}", Local::now().format("%Y-%m-%d"));
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(filename))?;
    writeln!(file, "{record}")?;
    file.flush()
}

fn format_panic_record(panic_info: &PanicHookInfo<'_>) -> String {
    let payload = panic_info
        .payload()
        .downcast_ref::<&'static str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic_info.payload().downcast_ref::<String>().cloned())
        .unwrap_or_else(|| panic_info.to_string());
    let location = panic_info
        .location()
        .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()))
        .unwrap_or_else(|| "<unknown>".to_string());
    let thread_name = thread::current()
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| "<unnamed>".to_string());

    format!(
        "{} PANIC thread={thread_name} location={location} payload={payload}",
        Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_uses_daily_file_name() {
        let dir = tempfile::tempdir().unwrap();
        append_panic_record(dir.path(), "boom").unwrap();

        let expected = dir
            .path()
            .join(format!("{LOG_FILE_NAME}.{}", Local::now().format("%Y-%m-%d")));
        let content = std::fs::read_to_string(expected).unwrap();
        assert_eq!(content.trim(), "boom");
    }
}
