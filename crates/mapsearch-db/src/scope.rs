//! Ambient, task-local database sessions.
//!
//! A [`SessionScope`] binds one session to the running task for the duration
//! of a future. Model operations called anywhere inside that future find the
//! session through [`SessionScope::current`] instead of taking it as a
//! parameter.
//!
//! ```text
//! scope(A, async {
//!     current() == A
//!     scope(B, async { current() == B }).await
//!     current() == A                      <- restored, not cleared
//! }).await
//! current() -> NoActiveSession
//! ```
//!
//! The cell is a `tokio` task-local, so concurrently running tasks never see
//! each other's session and spawned tasks start with no session at all. If
//! the scoped future is dropped before it completes (cancellation, timeout,
//! panic) the session is aborted while the scope is still set, and only then
//! is the previous value restored.

use std::future::Future;
use std::sync::Arc;

use tokio::task::LocalKey;

use crate::error::DbError;

/// A session that can be bound to a [`SessionScope`].
pub trait ScopedSession: Send + Sync + 'static {
    /// Roll back any open transaction without waiting for the backend.
    ///
    /// Called when a scope is abandoned mid-flight. Must not block and
    /// must be safe to call on an already finished session.
    fn abort(&self);
}

/// Task-local slot holding the active session of one backend.
pub struct SessionScope<S: 'static> {
    cell: &'static LocalKey<Arc<S>>,
    backend: &'static str,
}

impl<S: ScopedSession> SessionScope<S> {
    /// Scope over a task-local declared with [`tokio::task_local!`].
    pub const fn new(cell: &'static LocalKey<Arc<S>>, backend: &'static str) -> Self {
        Self { cell, backend }
    }

    /// Backend name used in errors and logs.
    pub const fn backend(&self) -> &'static str {
        self.backend
    }

    /// Run `fut` with `session` as the ambient session.
    ///
    /// The previous ambient session, if any, is restored when `fut`
    /// finishes or is dropped. A dropped `fut` aborts `session` first.
    pub async fn scope<F: Future>(&self, session: Arc<S>, fut: F) -> F::Output {
        let backend = self.backend;
        let guarded = Arc::clone(&session);
        self.cell
            .scope(session, async move {
                let guard = AbortOnDrop {
                    session: Some(guarded),
                    backend,
                };
                // Declared after the guard so it is dropped before it.
                let fut = fut;
                let output = fut.await;
                guard.disarm();
                output
            })
            .await
    }

    /// The ambient session of the current task.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoActiveSession`] outside any scope.
    pub fn current(&self) -> Result<Arc<S>, DbError> {
        self.cell
            .try_with(Arc::clone)
            .ok()
            .ok_or(DbError::NoActiveSession {
                backend: self.backend,
            })
    }

    /// `explicit` if given, otherwise the ambient session.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoActiveSession`] if neither is available.
    pub fn resolve(&self, explicit: Option<&Arc<S>>) -> Result<Arc<S>, DbError> {
        explicit.map_or_else(|| self.current(), |session| Ok(Arc::clone(session)))
    }

    /// Whether the current task is inside a scope.
    pub fn is_active(&self) -> bool {
        self.cell.try_with(|_| ()).is_ok()
    }
}

/// Aborts the session unless disarmed by normal completion.
struct AbortOnDrop<S: ScopedSession> {
    session: Option<Arc<S>>,
    backend: &'static str,
}

impl<S: ScopedSession> AbortOnDrop<S> {
    fn disarm(mut self) {
        self.session = None;
    }
}

impl<S: ScopedSession> Drop for AbortOnDrop<S> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            tracing::warn!(
                backend = self.backend,
                "session scope abandoned before completion, rolling back"
            );
            session.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    struct FakeSession {
        name: &'static str,
        aborts: AtomicUsize,
    }

    impl FakeSession {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                aborts: AtomicUsize::new(0),
            })
        }
    }

    impl ScopedSession for FakeSession {
        fn abort(&self) {
            self.aborts.fetch_add(1, Ordering::SeqCst);
        }
    }

    tokio::task_local! {
        static TEST_SESSION: Arc<FakeSession>;
    }

    static SCOPE: SessionScope<FakeSession> = SessionScope::new(&TEST_SESSION, "test");

    fn current_name() -> Option<&'static str> {
        SCOPE.current().ok().map(|s| s.name)
    }

    #[tokio::test]
    async fn nested_scopes_restore_the_outer_session() {
        assert!(matches!(
            SCOPE.current(),
            Err(DbError::NoActiveSession { backend: "test" })
        ));

        let outer = FakeSession::new("B");
        let inner = FakeSession::new("A");
        SCOPE
            .scope(Arc::clone(&outer), async {
                assert_eq!(current_name(), Some("B"));
                SCOPE
                    .scope(Arc::clone(&inner), async {
                        assert_eq!(current_name(), Some("A"));
                    })
                    .await;
                assert_eq!(current_name(), Some("B"));
            })
            .await;

        assert!(!SCOPE.is_active());
        assert_eq!(outer.aborts.load(Ordering::SeqCst), 0);
        assert_eq!(inner.aborts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn explicit_session_wins_over_ambient() {
        let ambient = FakeSession::new("ambient");
        let explicit = FakeSession::new("explicit");
        SCOPE
            .scope(ambient, async {
                let resolved = SCOPE.resolve(Some(&explicit)).unwrap();
                assert_eq!(resolved.name, "explicit");
                assert_eq!(SCOPE.resolve(None).unwrap().name, "ambient");
            })
            .await;
        assert!(SCOPE.resolve(None).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_tasks_never_see_each_other() {
        const NAMES: [&str; 8] = ["s0", "s1", "s2", "s3", "s4", "s5", "s6", "s7"];

        let handles: Vec<_> = NAMES
            .iter()
            .map(|&name| {
                tokio::spawn(async move {
                    SCOPE
                        .scope(FakeSession::new(name), async move {
                            for _ in 0..20 {
                                assert_eq!(current_name(), Some(name));
                                tokio::task::yield_now().await;
                                tokio::time::sleep(Duration::from_millis(1)).await;
                            }
                        })
                        .await;
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn spawned_tasks_do_not_inherit_the_session() {
        SCOPE
            .scope(FakeSession::new("parent"), async {
                let child = tokio::spawn(async { SCOPE.is_active() }).await.unwrap();
                assert!(!child);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_scope_aborts_and_restores() {
        let outer = FakeSession::new("outer");
        let doomed = FakeSession::new("doomed");
        let doomed_in_scope = Arc::clone(&doomed);

        SCOPE
            .scope(Arc::clone(&outer), async {
                let result = tokio::time::timeout(
                    Duration::from_millis(10),
                    SCOPE.scope(doomed_in_scope, async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                    }),
                )
                .await;
                assert!(result.is_err());
                assert_eq!(current_name(), Some("outer"));
            })
            .await;

        assert_eq!(doomed.aborts.load(Ordering::SeqCst), 1);
        assert_eq!(outer.aborts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn error_results_do_not_abort() {
        let session = FakeSession::new("s");
        let result: Result<(), &str> = SCOPE.scope(Arc::clone(&session), async { Err("boom") }).await;
        assert!(result.is_err());
        assert_eq!(session.aborts.load(Ordering::SeqCst), 0);
    }
}
