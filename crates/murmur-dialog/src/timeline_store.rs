//! Persistence seam for user timelines.
//!
//! The engine loads a timeline at the start of each locked turn and saves it
//! at the end; what sits behind this trait (document store, relational table,
//! plain files) is the embedding application's business.

use anyhow::Result;
use async_trait::async_trait;
use murmur_contract::UserId;

use crate::user_timeline::UserTimeline;

#[async_trait]
pub trait TimelineStore: Send + Sync {
    async fn load(&self, user_id: &UserId) -> Result<Option<UserTimeline>>;

    async fn save(&self, timeline: &UserTimeline) -> Result<()>;
}
