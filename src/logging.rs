//! Logging setup
//!
//! Library code only emits `tracing` events; the binary installs the
//! subscriber. `RUST_LOG` overrides the verbosity chosen on the command line.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// Get the log file path (same directory as executable)
pub fn log_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mftscan.log")
}

fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "mftscan=warn",
        1 => "mftscan=info",
        2 => "mftscan=debug",
        _ => "mftscan=trace",
    }
}

/// Install the global subscriber.
///
/// Logs go to stderr, or to [`log_path`] when `to_file` is set and the file
/// can be created. Calling this twice is harmless.
pub fn init(verbosity: u8, to_file: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true);

    let file = if to_file {
        let path = log_path();
        match File::create(&path) {
            Ok(file) => {
                eprintln!("[mftscan] Logging to: {}", path.display());
                Some(file)
            }
            Err(e) => {
                eprintln!("[mftscan] Cannot create {}: {}", path.display(), e);
                None
            }
        }
    } else {
        None
    };

    let _ = match file {
        Some(file) => builder.with_ansi(false).with_writer(Mutex::new(file)).try_init(),
        None => builder.with_writer(std::io::stderr).try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(default_directive(0), "mftscan=warn");
        assert_eq!(default_directive(2), "mftscan=debug");
        assert_eq!(default_directive(9), "mftscan=trace");
    }

    #[test]
    fn log_file_sits_next_to_executable() {
        assert_eq!(log_path().file_name().unwrap(), "mftscan.log");
    }
}
