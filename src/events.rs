//! Content-mutation events consumed by the invalidation router.
//!
//! Events are transient: they arrive from the host's lifecycle hooks, are
//! routed to exactly one cache action, and are never persisted.

/// How far a flush reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushScope {
    /// The current tenant only.
    Site,
    /// Every known tenant.
    AllSites,
}

/// The comment lifecycle transitions that touch the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentTransition {
    /// A new comment arrived already approved. Pending comments are inert
    /// until their approval shows up as a status change.
    Approved,
    /// An existing comment moved between statuses.
    StatusChanged,
    /// An existing comment was edited.
    Edited,
}

/// A named content-mutation event with its optional target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// Content was published or a scheduled publish fired. `public` is false
    /// for content types that never appear on the site.
    ContentPublished { content_id: i64, public: bool },
    /// Content was deleted or trashed.
    ContentDeleted { content_id: i64 },
    /// A comment transitioned under `content_id`.
    Comment {
        content_id: i64,
        transition: CommentTransition,
    },
    /// A taxonomy term was created, edited or deleted.
    TermChanged,
    /// A user account was created, updated or deleted.
    UserChanged,
    /// The active theme was switched.
    ThemeSwitched,
    /// The platform core was updated.
    CoreUpdated,
    /// A content save that is only a revision snapshot. Never touches the
    /// cache.
    RevisionSaved { content_id: i64 },
    /// The administrative flush command.
    FlushRequested { scope: FlushScope },
}
