//! Effects applied to snapshots
//!
//! An effect is a unit of work run inside an instance. Its identity string
//! is the cache key component: two effects with equal identities must leave
//! equivalent machine state.

pub mod catalog;
pub mod container;
pub mod copy;
pub mod run;
pub mod verify;

pub use catalog::Catalog;
pub use container::{ConfigureContainer, ContainerEngine, ContainerOptions};
pub use copy::CopyFiles;
pub use run::RunCommand;
pub use verify::{Check, CommandCheck, Verify};

use crate::error::StratumResult;
use crate::provider::Instance;
use async_trait::async_trait;

/// Work applied to an instance whose result is captured as a snapshot
#[async_trait]
pub trait Effect: Send + Sync {
    /// Short name of the effect type
    fn kind(&self) -> &'static str;

    /// Stable string characterizing what the effect does.
    ///
    /// Built from fully-resolved inputs with unordered collections sorted.
    fn identity(&self) -> String;

    /// One-line human description
    fn describe(&self) -> String;

    /// Run the effect against a ready instance
    async fn apply(&self, instance: &dyn Instance) -> StratumResult<()>;
}

/// Quote a string for POSIX `sh`
pub(crate) fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@,+".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r#"'\''"#))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_quote_plain_words_unchanged() {
        assert_eq!(shell_quote("nginx:1.27"), "nginx:1.27");
        assert_eq!(shell_quote("8080:80"), "8080:80");
    }

    #[test]
    fn shell_quote_escapes() {
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r#"'it'\''s'"#);
    }
}
