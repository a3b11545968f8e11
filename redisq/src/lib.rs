//! # redisq: Reliable Work Queue on Redis
//!
//! **At-least-once delivery with atomic claims and timeout reclamation**
//!
//! Producers push opaque JSON payloads; consumers claim them one at a time
//! and settle each claim by acknowledging or failing it. A claim that is not
//! settled before its deadline is reclaimed and delivered again, so a
//! crashed or stalled consumer never loses work.
//!
//! ## Guarantees
//!
//! - **Atomic claims**: no two consumers ever receive the same pending item
//! - **At-least-once**: unsettled claims return to the queue once their deadline passes
//! - **Exclusive location**: an item is pending, claimed or errored, never two at once
//! - **Cheap waiting**: idle consumers block on pub/sub instead of polling
//! - **Loud protocol errors**: a handler that neither acks nor fails stops the consumer
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use redisq::prelude::*;
//! use serde_json::json;
//! use std::time::Duration;
//!
//! # async fn example() -> QueueResult<()> {
//! let engine = Engine::connect("mail", QueueConfig::default()).await?;
//!
//! engine.push(json!({"to": "ops@example.com"})).await?;
//!
//! let item = engine.pop(Duration::from_secs(5)).await?;
//! println!("sending {}", item.payload());
//! item.ack().await?;
//!
//! // Or consume forever
//! engine
//!     .run(|item| async move {
//!         match item.payload().get("to") {
//!             Some(_) => Disposition::Ack,
//!             None => Disposition::Fail("no recipient".to_string()),
//!         }
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Store layout
//!
//! A queue named `mail` uses the list `mail` for pending items, the sorted
//! set `mail_processing` (scored by deadline) for claims and the list
//! `mail_error` for items given up on. Pushes and reclaims publish on the
//! channel `mail`.

pub mod engine;
pub mod types;
pub mod error;
pub mod backend;
pub mod ops;
pub mod notify;
pub mod reaper;
pub mod queue;
pub mod config;
pub mod observability;

pub use engine::Engine;
pub use types::{ClaimedItem, Disposition, Item, ItemId, QueueEvent, QueueKeys, Settlement};
pub use error::{QueueError, QueueResult};
pub use backend::{ChannelEvent, CollectionKind, QueueBackend, ReclaimReport, Subscription};
pub use backend::memory::MemoryBackend;
pub use ops::AtomicOps;
pub use notify::wait_for_notification;
pub use reaper::{Reclaimer, ReclaimerHandle};
pub use queue::Queue;
pub use config::QueueConfig;

pub use observability::{LiveMetrics, MetricsSnapshot, ObservabilityLayer};

#[cfg(feature = "tracing-basic")]
pub use observability::{init_json_tracing, init_tracing};

#[cfg(feature = "redis")]
pub use backend::redis::RedisBackend;

/// Everything needed to push and consume
pub mod prelude {
    pub use crate::{
        ClaimedItem, Disposition, Engine, Item, ItemId, QueueConfig, QueueError, QueueResult,
    };

    pub use crate::{MemoryBackend, QueueBackend};

    #[cfg(feature = "redis")]
    pub use crate::RedisBackend;
}
