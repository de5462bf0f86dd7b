//! Failure event data model.
//!
//! A [`FailureEvent`] identifies one fault observed on the local node. Two
//! events are equal when their `(failure_type, module)` pair matches; level
//! and info are descriptive only, so the registry deduplicates on identity
//! rather than wording.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest info string carried by an event; longer inputs are truncated.
pub const MAX_EVENT_INFO_LEN: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureType {
    ProcessHang,
    ResourceNotEnough,
    SchemaNotRefreshed,
    #[cfg(feature = "arbitration")]
    EnterElectionSilent,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let literal = match self {
            FailureType::ProcessHang => "PROCESS_HANG",
            FailureType::ResourceNotEnough => "RESOURCE_NOT_ENOUGH",
            FailureType::SchemaNotRefreshed => "SCHEMA_NOT_REFRESHED",
            #[cfg(feature = "arbitration")]
            FailureType::EnterElectionSilent => "ENTER_ELECTION_SILENT",
        };
        f.write_str(literal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureModule {
    Log,
    Storage,
    Schema,
}

impl fmt::Display for FailureModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let literal = match self {
            FailureModule::Log => "LOG",
            FailureModule::Storage => "STORAGE",
            FailureModule::Schema => "SCHEMA",
        };
        f.write_str(literal)
    }
}

/// Severity of a failure event. `Fatal` is strictly more severe and is what
/// consumers treat as grounds for leadership transfer or migration refusal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureLevel {
    Serious,
    Fatal,
}

impl fmt::Display for FailureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let literal = match self {
            FailureLevel::Serious => "SERIOUS",
            FailureLevel::Fatal => "FATAL",
        };
        f.write_str(literal)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureEvent {
    failure_type: FailureType,
    module: FailureModule,
    level: FailureLevel,
    info: String,
}

impl FailureEvent {
    pub fn new(failure_type: FailureType, module: FailureModule, level: FailureLevel) -> Self {
        Self {
            failure_type,
            module,
            level,
            info: String::new(),
        }
    }

    pub fn with_info(
        failure_type: FailureType,
        module: FailureModule,
        level: FailureLevel,
        info: impl Into<String>,
    ) -> Self {
        let mut event = Self::new(failure_type, module, level);
        event.set_info(info);
        event
    }

    /// Replaces the descriptive info, truncated to [`MAX_EVENT_INFO_LEN`]
    /// bytes at a char boundary.
    pub fn set_info(&mut self, info: impl Into<String>) {
        let mut info = info.into();
        if info.len() > MAX_EVENT_INFO_LEN {
            let mut cut = MAX_EVENT_INFO_LEN;
            while !info.is_char_boundary(cut) {
                cut -= 1;
            }
            info.truncate(cut);
        }
        self.info = info;
    }

    pub fn failure_type(&self) -> FailureType {
        self.failure_type
    }

    pub fn module(&self) -> FailureModule {
        self.module
    }

    pub fn level(&self) -> FailureLevel {
        self.level
    }

    pub fn info(&self) -> &str {
        &self.info
    }
}

/// Identity is `(failure_type, module)`; level and info do not participate.
impl PartialEq for FailureEvent {
    fn eq(&self, other: &Self) -> bool {
        self.failure_type == other.failure_type && self.module == other.module
    }
}

impl Eq for FailureEvent {}

impl fmt::Display for FailureEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} level={} info={:?}",
            self.failure_type, self.module, self.level, self.info
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_ignores_level_and_info() {
        let a = FailureEvent::with_info(
            FailureType::ProcessHang,
            FailureModule::Log,
            FailureLevel::Fatal,
            "clog disk hang, sen: 20",
        );
        let b = FailureEvent::new(
            FailureType::ProcessHang,
            FailureModule::Log,
            FailureLevel::Serious,
        );
        assert_eq!(a, b);
        let c = FailureEvent::new(
            FailureType::ProcessHang,
            FailureModule::Storage,
            FailureLevel::Fatal,
        );
        assert_ne!(a, c);
    }

    #[test]
    fn info_is_truncated_at_char_boundary() {
        let long = "é".repeat(MAX_EVENT_INFO_LEN);
        let event = FailureEvent::with_info(
            FailureType::ResourceNotEnough,
            FailureModule::Log,
            FailureLevel::Fatal,
            long,
        );
        assert!(event.info().len() <= MAX_EVENT_INFO_LEN);
        assert!(event.info().chars().all(|ch| ch == 'é'));
    }

    #[test]
    fn display_uses_table_literals() {
        assert_eq!(FailureType::ProcessHang.to_string(), "PROCESS_HANG");
        assert_eq!(FailureModule::Storage.to_string(), "STORAGE");
        assert_eq!(FailureLevel::Serious.to_string(), "SERIOUS");
    }
}
