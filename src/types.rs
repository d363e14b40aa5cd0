// src/types.rs

/// A non-fatal finding surfaced to the operator. Warnings are printed with a
/// `[WARNING <check>]` prefix and never stop execution.
#[derive(Debug, Clone, PartialEq)]
pub struct Warning {
    pub check: String,
    pub message: String,
}

impl Warning {
    pub fn new(check: &str, message: impl Into<String>) -> Self {
        Warning {
            check: check.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[WARNING {}] {}", self.check, self.message)
    }
}

pub fn emit_warnings(warnings: &[Warning], logger: &mut dyn crate::utils::logging::Logger) {
    for w in warnings {
        logger.warn_log(&w.check, &w.message);
    }
}
