//! Post-commit promotion hooks.
//!
//! Hooks run after the promoting transaction has committed. A failing hook
//! never undoes the promotion: its error is logged and handed back to the
//! caller in the promotion report.

use crate::repository::VersionType;
use serde::{Deserialize, Serialize};

pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// A committed promotion, as seen by hooks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionEvent {
    pub collection_key: String,
    pub document_id: i64,
    pub from_version_id: i64,
    pub from: VersionType,
    pub to: VersionType,
    /// The version created by the promotion
    pub version_id: i64,
    /// Previous published version kept as a revision
    pub retired_version_id: Option<i64>,
    pub user_id: Option<i64>,
}

pub trait PromotionHook: Send + Sync {
    fn name(&self) -> &str;

    fn on_version_promote(&self, event: &PromotionEvent) -> Result<(), HookError>;
}

/// A hook failure reported back from a promotion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookFailure {
    pub hook: String,
    pub message: String,
}

/// Run every hook in registration order, collecting failures.
pub fn run_hooks(hooks: &[Box<dyn PromotionHook>], event: &PromotionEvent) -> Vec<HookFailure> {
    let mut failures = Vec::new();
    for hook in hooks {
        if let Err(e) = hook.on_version_promote(event) {
            log::warn!(
                "Hook '{}' failed for document {} in '{}': {e}",
                hook.name(),
                event.document_id,
                event.collection_key
            );
            failures.push(HookFailure {
                hook: hook.name().to_string(),
                message: e.to_string(),
            });
        }
    }
    failures
}

/// Logs every promotion at info level.
pub struct LoggingHook;

impl PromotionHook for LoggingHook {
    fn name(&self) -> &str {
        "log"
    }

    fn on_version_promote(&self, event: &PromotionEvent) -> Result<(), HookError> {
        log::info!(
            "Promoted {} version {} of {}/{} to {} version {}",
            event.from,
            event.from_version_id,
            event.collection_key,
            event.document_id,
            event.to,
            event.version_id
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder(Mutex<Vec<i64>>);

    impl PromotionHook for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn on_version_promote(&self, event: &PromotionEvent) -> Result<(), HookError> {
            self.0.lock().unwrap().push(event.version_id);
            Ok(())
        }
    }

    struct Failing;

    impl PromotionHook for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn on_version_promote(&self, _event: &PromotionEvent) -> Result<(), HookError> {
            Err("search index unavailable".into())
        }
    }

    fn event() -> PromotionEvent {
        PromotionEvent {
            collection_key: "page".into(),
            document_id: 1,
            from_version_id: 1,
            from: VersionType::Draft,
            to: VersionType::Published,
            version_id: 2,
            retired_version_id: None,
            user_id: None,
        }
    }

    #[test]
    fn test_failures_do_not_stop_later_hooks() {
        let recorder = std::sync::Arc::new(Recorder(Mutex::new(Vec::new())));

        struct Shared(std::sync::Arc<Recorder>);
        impl PromotionHook for Shared {
            fn name(&self) -> &str {
                self.0.name()
            }
            fn on_version_promote(&self, event: &PromotionEvent) -> Result<(), HookError> {
                self.0.on_version_promote(event)
            }
        }

        let hooks: Vec<Box<dyn PromotionHook>> = vec![
            Box::new(LoggingHook),
            Box::new(Failing),
            Box::new(Shared(recorder.clone())),
        ];
        let failures = run_hooks(&hooks, &event());

        assert_eq!(
            failures,
            vec![HookFailure {
                hook: "failing".into(),
                message: "search index unavailable".into(),
            }]
        );
        assert_eq!(*recorder.0.lock().unwrap(), vec![2]);
    }
}
