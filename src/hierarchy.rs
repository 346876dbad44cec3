//! Create-or-get resolution of suites and test cases.
//!
//! ```text
//! parent suite (configured)
//! ├── "Checkout"        ◄── resolve_suite("Checkout")
//! │   ├── "Pay"         ◄── resolve_test_case("Pay", checkout)
//! │   └── "Refund"
//! └── "Accounts"
//! ```
//!
//! Names match exactly and case-sensitively. One match returns its ID, no
//! match creates the entity, more than one is an [`ResolveError::Ambiguous`].
//!
//! Each key is resolved through its own [`OnceCell`], so concurrent chunks
//! asking for the same suite see a single lookup and at most one creation.
//! Failed resolutions are not remembered. Other processes writing to
//! the same plan are not coordinated with.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

use crate::remote::{NamedRef, RemoteError, TestManagementApi};

/// Result type for hierarchy resolution.
pub type ResolveResult<T> = Result<T, ResolveError>;

/// Kind of remote entity being resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Suite,
    TestCase,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Suite => f.write_str("suites"),
            EntityKind::TestCase => f.write_str("test cases"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// More than one entity with the same name in one scope.
    #[error("Found {count} {kind} named `{title}` in {scope}")]
    Ambiguous {
        kind: EntityKind,
        count: usize,
        scope: String,
        title: String,
    },

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Key {
    Suite(String),
    TestCase(u64, String),
}

/// Resolves suites under one parent suite, and test cases within them.
pub struct HierarchyResolver<A: ?Sized> {
    api: Arc<A>,
    parent_suite: u64,
    resolved: Mutex<HashMap<Key, Arc<OnceCell<u64>>>>,
}

impl<A: TestManagementApi + ?Sized> HierarchyResolver<A> {
    pub fn new(api: Arc<A>, parent_suite: u64) -> Self {
        Self {
            api,
            parent_suite,
            resolved: Mutex::new(HashMap::new()),
        }
    }

    async fn cell(&self, key: Key) -> Arc<OnceCell<u64>> {
        let mut resolved = self.resolved.lock().await;
        resolved
            .entry(key)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    /// Returns the ID of the suite named `name` under the parent suite,
    /// creating it if absent.
    pub async fn resolve_suite(&self, name: &str) -> ResolveResult<u64> {
        let cell = self.cell(Key::Suite(name.to_string())).await;

        // Only one caller looks up (and maybe creates); others wait for its ID
        let id = cell
            .get_or_try_init(|| async {
                let existing = self.api.child_suites(self.parent_suite).await?;
                match single_match(&existing, name) {
                    Match::One(id) => {
                        debug!("Suite `{}` exists as {}", name, id);
                        Ok(id)
                    }
                    Match::None => {
                        let id = self.api.create_suite(self.parent_suite, name).await?;
                        info!("Created suite `{}` ({})", name, id);
                        Ok(id)
                    }
                    Match::Many(count) => Err(ResolveError::Ambiguous {
                        kind: EntityKind::Suite,
                        count,
                        scope: format!("parent suite {}", self.parent_suite),
                        title: name.to_string(),
                    }),
                }
            })
            .await?;

        Ok(*id)
    }

    /// Returns the ID of the test case titled `title` in `suite`, creating
    /// it if absent.
    pub async fn resolve_test_case(&self, title: &str, suite: u64) -> ResolveResult<u64> {
        let cell = self.cell(Key::TestCase(suite, title.to_string())).await;

        let id = cell
            .get_or_try_init(|| async {
                let existing = self.api.suite_test_cases(suite).await?;
                match single_match(&existing, title) {
                    Match::One(id) => Ok(id),
                    Match::None => {
                        let id = self.api.create_test_case(suite, title).await?;
                        info!("Created test case `{}` ({}) in suite {}", title, id, suite);
                        Ok(id)
                    }
                    Match::Many(count) => Err(ResolveError::Ambiguous {
                        kind: EntityKind::TestCase,
                        count,
                        scope: format!("suite {}", suite),
                        title: title.to_string(),
                    }),
                }
            })
            .await?;

        Ok(*id)
    }
}

enum Match {
    None,
    One(u64),
    Many(usize),
}

fn single_match(entries: &[NamedRef], name: &str) -> Match {
    let mut matches = entries.iter().filter(|e| e.name == name);
    match (matches.next(), matches.count()) {
        (None, _) => Match::None,
        (Some(entry), 0) => Match::One(entry.id),
        (Some(_), rest) => Match::Many(rest + 1),
    }
}
