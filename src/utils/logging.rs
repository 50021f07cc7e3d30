use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use env_logger::{Builder, Env, Target};

const MAX_LOG_BYTES: u64 = 5 * 1024 * 1024;
const KEEP_ROTATED: usize = 5;

/// Initialize `env_logger` (filter from `RUST_LOG`, default `info`). With a
/// path, records are appended to that file instead of stderr, rotating it
/// first when it grew past 5 MiB.
pub fn init_logger(log_file: Option<&Path>) -> Result<Option<PathBuf>, String> {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
    builder.format(|buf, record| {
        writeln!(
            buf,
            "[{}] [{}] [{}] {}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            record.level(),
            record.target(),
            record.args()
        )
    });

    let opened = match log_file {
        Some(path) => {
            prepare_log_file(path, MAX_LOG_BYTES)?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| format!("Failed to open log file {}: {}", path.display(), e))?;
            builder.target(Target::Pipe(Box::new(file)));
            Some(path.to_path_buf())
        }
        None => None,
    };

    builder.try_init().map_err(|e| format!("Failed to initialize logger: {}", e))?;
    Ok(opened)
}

/// Create the parent directory and rotate `path` if it exceeds `max_bytes`.
fn prepare_log_file(path: &Path, max_bytes: u64) -> Result<(), String> {
    let log_dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    if !log_dir.exists() {
        fs::create_dir_all(&log_dir).map_err(|e| format!("Failed to create log dir: {}", e))?;
    }

    let too_big = fs::metadata(path).map(|m| m.len() > max_bytes).unwrap_or(false);
    if too_big {
        let stem = log_stem(path);
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let rotated = log_dir.join(format!("{}_{}.log", stem, timestamp));
        let _ = fs::rename(path, &rotated);
        cleanup_old_logs(&log_dir, &stem, KEEP_ROTATED);
    }
    Ok(())
}

fn log_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "kubeask".to_string())
}

fn cleanup_old_logs(log_dir: &Path, stem: &str, keep: usize) {
    let prefix = format!("{}_", stem);
    if let Ok(entries) = fs::read_dir(log_dir) {
        let mut logs: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension().map_or(false, |ext| ext == "log")
                    && p.file_stem().map_or(false, |s| s.to_string_lossy().starts_with(&prefix))
            })
            .collect();

        // timestamped names sort chronologically
        logs.sort();

        if logs.len() > keep {
            for log in logs.iter().take(logs.len() - keep) {
                let _ = fs::remove_file(log);
            }
        }
    }
}
