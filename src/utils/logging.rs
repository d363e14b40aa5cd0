use chrono::Local;
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::Path,
};

pub trait Logger: Send + Sync {
    fn log(&mut self, message: &str);
    fn debug_log(&mut self, message: &str);

    // Warnings carry the name of the check that produced them and never
    // stop execution.
    fn warn_log(&mut self, check: &str, message: &str) {
        self.log(&format!("[WARNING {}] {}", check, message));
    }
}

pub struct StdoutLogger {
    debug: bool,
}

impl StdoutLogger {
    pub fn new(debug: bool) -> Self {
        StdoutLogger { debug }
    }
}

impl Logger for StdoutLogger {
    fn log(&mut self, message: &str) {
        println!("{}", message);
    }

    fn debug_log(&mut self, message: &str) {
        if self.debug {
            println!("[DEBUG] {}", message);
        }
    }
}

#[derive(Debug)]
pub struct FileLogger {
    log_file: String,
    debug: bool,
}

impl FileLogger {
    pub fn new(log_file: &str, debug: bool) -> std::io::Result<Self> {
        // Create log directory if it doesn't exist
        if let Some(parent) = Path::new(log_file).parent() {
            fs::create_dir_all(parent)?;
        }

        Ok(FileLogger {
            log_file: log_file.to_string(),
            debug,
        })
    }

    fn write_to_file(&self, message: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file)?;

        writeln!(
            file,
            "{}: {}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            message
        )
    }
}

impl Logger for FileLogger {
    fn log(&mut self, message: &str) {
        if let Err(e) = self.write_to_file(message) {
            eprintln!("Failed to write to log file: {}", e);
        }
    }

    fn debug_log(&mut self, message: &str) {
        if self.debug {
            if let Err(e) = self.write_to_file(&format!("[DEBUG] {}", message)) {
                eprintln!("Failed to write debug log: {}", e);
            }
        }
    }
}

// MultiLogger allows logging to multiple destinations
pub struct MultiLogger {
    loggers: Vec<Box<dyn Logger>>,
}

impl MultiLogger {
    pub fn new(loggers: Vec<Box<dyn Logger>>) -> Self {
        MultiLogger { loggers }
    }
}

impl Logger for MultiLogger {
    fn log(&mut self, message: &str) {
        for logger in &mut self.loggers {
            logger.log(message);
        }
    }

    fn debug_log(&mut self, message: &str) {
        for logger in &mut self.loggers {
            logger.debug_log(message);
        }
    }
}

/// Logger used by tests; collects everything it is given.
pub struct MemoryLogger {
    pub lines: Vec<String>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        MemoryLogger { lines: Vec::new() }
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.iter().any(|l| l.contains(needle))
    }
}

impl Logger for MemoryLogger {
    fn log(&mut self, message: &str) {
        self.lines.push(message.to_string());
    }

    fn debug_log(&mut self, message: &str) {
        self.lines.push(format!("[DEBUG] {}", message));
    }
}
