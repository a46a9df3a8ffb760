use env_logger::{Builder, Env};
use log::{error, info};
use std::env;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Once;

use chrono::{Local, Utc};

static INIT: Once = Once::new();

/// Initialize the logging system. Logs go to stdout; when LOG_DIR is set,
/// they are additionally teed into a timestamped file under it.
pub fn init_logger() {
    INIT.call_once(|| {
        let env = Env::default().filter_or("LOG_LEVEL", "info");

        let log_file = env::var("LOG_DIR").ok().and_then(|dir| {
            let dir = PathBuf::from(dir);
            if let Err(e) = fs::create_dir_all(&dir) {
                eprintln!("Failed to create log directory: {}", e);
                return None;
            }
            let path = log_file_path(&dir);
            match OpenOptions::new().create(true).append(true).open(&path) {
                Ok(file) => Some((file, path)),
                Err(e) => {
                    eprintln!("Failed to open log file: {}", e);
                    None
                }
            }
        });

        match log_file {
            Some((file, path)) => {
                let mut builder = Builder::from_env(env);
                builder
                    .format(|buf, record| {
                        writeln!(
                            buf,
                            "{} [{}] - {}: {}",
                            Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                            record.level(),
                            record.target(),
                            record.args()
                        )
                    })
                    .target(env_logger::Target::Pipe(Box::new(FileAndStdout { file })))
                    .init();

                info!("Logging initialized: {}", path.display());
                info!(
                    "FraudGuard scoring engine starting at {}",
                    Utc::now().format("%Y-%m-%d %H:%M:%S")
                );
            }
            None => {
                let mut builder = Builder::from_env(env);
                builder
                    .format(|buf, record| {
                        writeln!(
                            buf,
                            "{} [{}] - {}: {}",
                            Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                            record.level(),
                            record.target(),
                            record.args()
                        )
                    })
                    .init();

                if env::var("LOG_DIR").is_ok() {
                    error!("Log file unavailable, logging to stdout only");
                }
            }
        }
    });
}

/// Get the log file path for the current session
fn log_file_path(log_dir: &PathBuf) -> PathBuf {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
    log_dir.join(format!("fraudguard_{}.log", timestamp))
}

/// Custom writer that writes to both a file and stdout
struct FileAndStdout {
    file: File,
}

impl Write for FileAndStdout {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        std::io::stdout().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        std::io::stdout().flush()?;
        self.file.flush()?;
        Ok(())
    }
}
