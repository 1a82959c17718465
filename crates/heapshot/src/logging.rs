//! Dump Logging
//!
//! Structured events for the dump lifecycle, useful for:
//! - Spotting slow or failing dumps in production
//! - Feeding dump results to log collectors (JSON output)
//! - Debugging scans that miss or over-report edges
//!
//! Log Levels:
//! - ERROR: Dump failures
//! - WARN: Unusual conditions (pickup file not written)
//! - INFO: Dump start/end
//! - DEBUG: Phase timing, scan statistics
//!
//! Fine-grained per-object diagnostics go through the `log` facade instead.

use crate::stats::ScanStats;
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Log level for dump events
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
}

/// Dump event types
#[derive(Debug, Clone)]
pub enum DumpEvent {
    /// Dump started
    DumpStart { sequence: u32, path: String },

    /// Dump phase completed
    PhaseEnd {
        sequence: u32,
        phase: &'static str,
        duration_ms: f64,
    },

    /// Liveness sweep removed dead objects
    Sweep { removed: usize, remaining: usize },

    /// Scan statistics of a finished dump
    ScanStats { sequence: u32, stats: ScanStats },

    /// Dump finished and file finalized
    DumpEnd {
        sequence: u32,
        path: String,
        objects: u32,
        references: u32,
        duration_ms: f64,
    },

    /// Dump abandoned
    DumpFailed { sequence: u32, error: String },

    /// Pickup file could not be written
    PickupFailed { path: String, error: String },
}

/// Dump logger configuration
#[derive(Debug, Clone)]
pub struct DumpLoggerConfig {
    /// Minimum log level
    pub level: LogLevel,

    /// Enable console output
    pub console: bool,

    /// Append events to this file
    pub file: Option<PathBuf>,

    /// Enable JSON format
    pub json: bool,

    /// Enable timestamps
    pub timestamps: bool,
}

impl Default for DumpLoggerConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            console: false,
            file: None,
            json: false,
            timestamps: true,
        }
    }
}

/// Dump logger - centralized logging for dump events
pub struct DumpLogger {
    config: DumpLoggerConfig,
    events: Mutex<Vec<(Instant, DumpEvent)>>,
    enabled: AtomicBool,
}

impl DumpLogger {
    /// Create new dump logger
    pub fn new(config: DumpLoggerConfig) -> Self {
        Self {
            config,
            events: Mutex::new(Vec::new()),
            enabled: AtomicBool::new(true),
        }
    }

    /// Disable logging
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    /// Check if logging is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Log a dump event
    pub fn log(&self, event: DumpEvent) {
        if !self.is_enabled() {
            return;
        }

        if Self::event_level(&event) > self.config.level {
            return;
        }

        if self.config.console || self.config.file.is_some() {
            let line = self.format_line(&event);
            if self.config.console {
                match event {
                    DumpEvent::DumpFailed { .. } | DumpEvent::PickupFailed { .. } => {
                        eprintln!("{}", line)
                    }
                    _ => println!("{}", line),
                }
            }
            if let Some(ref path) = self.config.file {
                self.append_to_file(path, &line);
            }
        }

        self.events.lock().push((Instant::now(), event));
    }

    fn event_level(event: &DumpEvent) -> LogLevel {
        match event {
            DumpEvent::DumpFailed { .. } => LogLevel::Error,
            DumpEvent::PickupFailed { .. } => LogLevel::Warn,
            DumpEvent::DumpStart { .. } | DumpEvent::DumpEnd { .. } => LogLevel::Info,
            DumpEvent::PhaseEnd { .. } | DumpEvent::Sweep { .. } | DumpEvent::ScanStats { .. } => {
                LogLevel::Debug
            }
        }
    }

    fn format_line(&self, event: &DumpEvent) -> String {
        let body = if self.config.json {
            Self::format_json(event)
        } else {
            Self::format_human(event)
        };

        if self.config.timestamps {
            let now = chrono::Local::now();
            format!("[{}] {}", now.format("%Y-%m-%d %H:%M:%S%.3f"), body)
        } else {
            body
        }
    }

    fn format_human(event: &DumpEvent) -> String {
        match event {
            DumpEvent::DumpStart { sequence, path } => {
                format!("[heap-shot] Dumping object map {} to file '{}'", sequence, path)
            }
            DumpEvent::PhaseEnd {
                sequence,
                phase,
                duration_ms,
            } => format!(
                "[heap-shot] Dump {}: {} finished ({:.2}ms)",
                sequence, phase, duration_ms
            ),
            DumpEvent::Sweep { removed, remaining } => format!(
                "[heap-shot] Sweep removed {} objects, {} still tracked",
                removed, remaining
            ),
            DumpEvent::ScanStats { sequence, stats } => {
                format!("[heap-shot] Dump {}: {}", sequence, stats)
            }
            DumpEvent::DumpEnd {
                sequence,
                path,
                objects,
                references,
                duration_ms,
            } => format!(
                "[heap-shot] Dump {} done: {} objects, {} references in '{}' ({:.2}ms)",
                sequence, objects, references, path, duration_ms
            ),
            DumpEvent::DumpFailed { sequence, error } => {
                format!("[heap-shot] Dump {} failed: {}", sequence, error)
            }
            DumpEvent::PickupFailed { path, error } => {
                format!("[heap-shot] Could not write pickup file '{}': {}", path, error)
            }
        }
    }

    fn format_json(event: &DumpEvent) -> String {
        let json = match event {
            DumpEvent::DumpStart { sequence, path } => serde_json::json!({
                "type": "dump_start",
                "sequence": sequence,
                "path": path
            }),
            DumpEvent::PhaseEnd {
                sequence,
                phase,
                duration_ms,
            } => serde_json::json!({
                "type": "phase_end",
                "sequence": sequence,
                "phase": phase,
                "duration_ms": duration_ms
            }),
            DumpEvent::Sweep { removed, remaining } => serde_json::json!({
                "type": "sweep",
                "removed": removed,
                "remaining": remaining
            }),
            DumpEvent::ScanStats { sequence, stats } => serde_json::json!({
                "type": "scan_stats",
                "sequence": sequence,
                "stats": stats
            }),
            DumpEvent::DumpEnd {
                sequence,
                path,
                objects,
                references,
                duration_ms,
            } => serde_json::json!({
                "type": "dump_end",
                "sequence": sequence,
                "path": path,
                "objects": objects,
                "references": references,
                "duration_ms": duration_ms
            }),
            DumpEvent::DumpFailed { sequence, error } => serde_json::json!({
                "type": "dump_failed",
                "sequence": sequence,
                "error": error
            }),
            DumpEvent::PickupFailed { path, error } => serde_json::json!({
                "type": "pickup_failed",
                "path": path,
                "error": error
            }),
        };
        json.to_string()
    }

    fn append_to_file(&self, path: &PathBuf, line: &str) {
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| writeln!(file, "{}", line));
        if let Err(e) = result {
            log::warn!("Cannot append to dump log {}: {}", path.display(), e);
        }
    }

    /// Get event count
    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }
}

impl Default for DumpLogger {
    fn default() -> Self {
        Self::new(DumpLoggerConfig::default())
    }
}

lazy_static::lazy_static! {
    static ref GLOBAL_LOGGER: Mutex<DumpLogger> = Mutex::new(DumpLogger::default());
}

/// Log a dump event to the global logger
pub fn log_event(event: DumpEvent) {
    GLOBAL_LOGGER.lock().log(event);
}

/// Configure global logger
pub fn configure_logger(config: DumpLoggerConfig) {
    *GLOBAL_LOGGER.lock() = DumpLogger::new(config);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(sequence: u32) -> DumpEvent {
        DumpEvent::DumpStart {
            sequence,
            path: "outfile_0.omap".to_string(),
        }
    }

    #[test]
    fn test_dump_logger_basic() {
        let logger = DumpLogger::default();
        logger.log(start(0));
        assert_eq!(logger.event_count(), 1);
    }

    #[test]
    fn test_dump_logger_disable() {
        let logger = DumpLogger::default();
        logger.disable();
        logger.log(start(0));
        assert_eq!(logger.event_count(), 0);
    }

    #[test]
    fn test_level_filter() {
        let logger = DumpLogger::default();
        logger.log(DumpEvent::Sweep {
            removed: 1,
            remaining: 2,
        });
        assert_eq!(logger.event_count(), 0);
    }

    #[test]
    fn test_json_format() {
        let line = DumpLogger::format_json(&DumpEvent::DumpFailed {
            sequence: 3,
            error: "disk full".to_string(),
        });
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "dump_failed");
        assert_eq!(value["sequence"], 3);
    }

    #[test]
    fn test_file_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.log");
        let logger = DumpLogger::new(DumpLoggerConfig {
            file: Some(path.clone()),
            timestamps: false,
            ..DumpLoggerConfig::default()
        });
        logger.log(start(7));

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("Dumping object map 7"));
    }

    #[test]
    fn test_global_logger() {
        log_event(start(1));
        assert!(GLOBAL_LOGGER.lock().event_count() > 0);
    }
}
