//! Optimistic state reconciliation for the messaging and comment features.
//!
//! - [`collection`]: the per-collection merge state machine
//! - [`records`]: typed feed records
//! - [`writers`]: outbound write collaborators
//! - [`feed`]: collections bound to a channel and a writer

pub mod collection;
pub mod feed;
pub mod records;
pub mod writers;

pub use collection::{Applied, Entry, ReconcileConfig, ReconciledCollection};
pub use feed::{CommentFeed, CommunityMessageFeed, DirectMessageFeed, Feed};
pub use records::{Comment, CommunityMessage, DirectMessage, Reconcilable};
pub use writers::{
    CommentDraft, CommentWriter, CommunityMessageDraft, CommunityMessageWriter, MessageDraft,
    MessageWriter,
};
