//! Pre-dispatch guards.
//!
//! A [`GuardChain`] is an ordered list of named predicates. The first one that rejects an
//! event stops evaluation and its name is reported back to the router.

use ahash::AHashSet;
use std::fmt;

use crate::config::GuardConfig;
use crate::events::InboundEvent;

type Predicate = Box<dyn Fn(&InboundEvent) -> bool + Send + Sync>;

pub const GROUP_ENABLED: &str = "group_enabled";
pub const SENDER_NOT_IGNORED: &str = "sender_not_ignored";
pub const NOT_SELF: &str = "not_self";

#[derive(Default)]
pub struct GuardChain {
    predicates: Vec<(&'static str, Predicate)>,
}

impl GuardChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the standard chain.
    ///
    /// An empty `enabled_groups` list enables every group.
    pub fn from_config(config: &GuardConfig) -> Self {
        let mut chain = Self::new();

        if !config.enabled_groups.is_empty() {
            let enabled: AHashSet<String> = config.enabled_groups.iter().cloned().collect();
            chain = chain.with(GROUP_ENABLED, move |e| enabled.contains(&e.group_id));
        }

        if !config.ignored_users.is_empty() {
            let ignored: AHashSet<String> = config.ignored_users.iter().cloned().collect();
            chain = chain.with(SENDER_NOT_IGNORED, move |e| !ignored.contains(&e.user_id));
        }

        if let Some(bot_id) = config.bot_id.clone() {
            chain = chain.with(NOT_SELF, move |e| e.user_id != bot_id);
        }

        chain
    }

    /// Append a predicate. It runs after every predicate already in the chain.
    pub fn with(
        mut self,
        name: &'static str,
        predicate: impl Fn(&InboundEvent) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.predicates.push((name, Box::new(predicate)));
        self
    }

    /// Name of the first predicate that rejects `event`, or `None` if all pass.
    pub fn evaluate(&self, event: &InboundEvent) -> Option<&'static str> {
        self.predicates
            .iter()
            .find(|(_, predicate)| !predicate(event))
            .map(|(name, _)| *name)
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }
}

impl fmt::Debug for GuardChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.predicates.iter().map(|(name, _)| *name).collect();
        f.debug_struct("GuardChain").field("predicates", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Payload;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn message(group: &str, user: &str) -> InboundEvent {
        InboundEvent::new(group, user, Payload::Message { text: "hi".to_string(), nickname: None })
    }

    #[test]
    fn empty_config_passes_everything() {
        let chain = GuardChain::from_config(&GuardConfig::default());
        assert!(chain.is_empty());
        assert_eq!(chain.evaluate(&message("g1", "u1")), None);
    }

    #[test]
    fn reports_first_failing_predicate() {
        let config = GuardConfig {
            enabled_groups: vec!["g1".to_string()],
            ignored_users: vec!["spammer".to_string()],
            bot_id: Some("bot".to_string()),
        };
        let chain = GuardChain::from_config(&config);

        assert_eq!(chain.evaluate(&message("g1", "u1")), None);
        assert_eq!(chain.evaluate(&message("g2", "spammer")), Some(GROUP_ENABLED));
        assert_eq!(chain.evaluate(&message("g1", "spammer")), Some(SENDER_NOT_IGNORED));
        assert_eq!(chain.evaluate(&message("g1", "bot")), Some(NOT_SELF));
    }

    #[test]
    fn short_circuits_after_rejection() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let chain = GuardChain::new().with("never", |_| false).with("counted", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        });

        assert_eq!(chain.evaluate(&message("g1", "u1")), Some("never"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
