pub mod scripts;

use ::redis::{aio::ConnectionManager, aio::PubSub, AsyncCommands, Client};
use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, info};

use crate::{
    backend::{ChannelEvent, CollectionKind, QueueBackend, ReclaimReport, Subscription},
    QueueError, QueueKeys, QueueResult,
};

pub use scripts::Scripts;

/// Redis-backed store: Lua scripts for the atomic operations, pub/sub for wakeups
pub struct RedisBackend {
    client: Client,
    conn: ConnectionManager,
    scripts: Scripts,
}

impl RedisBackend {
    /// Connect to the Redis server at `url`
    pub async fn connect(url: &str) -> QueueResult<Self> {
        let client = Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        info!("Connected to redis at {}", url);

        Ok(Self {
            client,
            conn,
            scripts: Scripts::new(),
        })
    }

    fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

#[async_trait]
impl QueueBackend for RedisBackend {
    async fn register(&self, keys: &QueueKeys) -> QueueResult<()> {
        let mut conn = self.connection();
        for script in self.scripts.all() {
            let sha: String = script.prepare_invoke().load_async(&mut conn).await?;
            debug!("Loaded script {} for queue {}", sha, keys.source);
        }
        Ok(())
    }

    async fn enqueue(&self, keys: &QueueKeys, record: &str) -> QueueResult<()> {
        let mut conn = self.connection();
        let _: i64 = self
            .scripts
            .enqueue
            .key(&keys.source)
            .arg(record)
            .arg(&keys.channel)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn claim(&self, keys: &QueueKeys, deadline: i64) -> QueueResult<Option<String>> {
        let mut conn = self.connection();
        let record: Option<String> = self
            .scripts
            .claim
            .key(&keys.source)
            .key(&keys.processing)
            .key(&keys.processing_items)
            .key(&keys.deliveries)
            .key(&keys.error)
            .arg(deadline)
            .invoke_async(&mut conn)
            .await?;
        Ok(record)
    }

    async fn reclaim(
        &self,
        keys: &QueueKeys,
        now: i64,
        max_deliveries: Option<u32>,
    ) -> QueueResult<ReclaimReport> {
        let mut conn = self.connection();
        let (requeued, dead_lettered): (usize, usize) = self
            .scripts
            .reclaim
            .key(&keys.source)
            .key(&keys.processing)
            .key(&keys.processing_items)
            .key(&keys.deliveries)
            .key(&keys.error)
            .arg(now)
            .arg(max_deliveries.unwrap_or(0))
            .arg(&keys.channel)
            .invoke_async(&mut conn)
            .await?;
        Ok(ReclaimReport { requeued, dead_lettered })
    }

    async fn ack(&self, keys: &QueueKeys, id: &str, deadline: i64) -> QueueResult<bool> {
        let mut conn = self.connection();
        let removed: i64 = self
            .scripts
            .ack
            .key(&keys.processing)
            .key(&keys.processing_items)
            .key(&keys.deliveries)
            .arg(id)
            .arg(deadline)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed == 1)
    }

    async fn fail(&self, keys: &QueueKeys, id: &str, deadline: i64) -> QueueResult<bool> {
        let mut conn = self.connection();
        let moved: i64 = self
            .scripts
            .fail
            .key(&keys.processing)
            .key(&keys.processing_items)
            .key(&keys.deliveries)
            .key(&keys.error)
            .arg(id)
            .arg(deadline)
            .invoke_async(&mut conn)
            .await?;
        Ok(moved == 1)
    }

    async fn len(&self, name: &str, kind: CollectionKind) -> QueueResult<usize> {
        let mut conn = self.connection();
        let len: usize = match kind {
            CollectionKind::List => conn.llen(name).await?,
            CollectionKind::SortedSet => conn.zcard(name).await?,
        };
        Ok(len)
    }

    async fn members(&self, name: &str, kind: CollectionKind) -> QueueResult<Vec<String>> {
        let mut conn = self.connection();
        let members: Vec<String> = match kind {
            CollectionKind::List => conn.lrange(name, 0, -1).await?,
            CollectionKind::SortedSet => conn.zrange(name, 0, -1).await?,
        };
        Ok(members)
    }

    async fn flush(&self, names: &[String]) -> QueueResult<()> {
        if names.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection();
        let _: i64 = conn.del(names.to_vec()).await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> QueueResult<Box<dyn Subscription>> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        Ok(Box::new(RedisSubscription {
            pubsub,
            channel: channel.to_string(),
            unsubscribed: false,
        }))
    }
}

/// Dedicated pub/sub connection for one wait
pub struct RedisSubscription {
    pubsub: PubSub,
    channel: String,
    unsubscribed: bool,
}

#[async_trait]
impl Subscription for RedisSubscription {
    async fn next_event(&mut self) -> QueueResult<ChannelEvent> {
        if self.unsubscribed {
            return Ok(ChannelEvent::Unsubscribed);
        }
        let message = {
            let mut messages = Box::pin(self.pubsub.on_message());
            messages.next().await
        };
        match message {
            Some(_) => Ok(ChannelEvent::Message),
            None => Err(QueueError::Store(format!(
                "pub/sub connection for {} closed",
                self.channel
            ))),
        }
    }

    async fn unsubscribe(&mut self) -> QueueResult<()> {
        self.pubsub.unsubscribe(&self.channel).await?;
        self.unsubscribed = true;
        Ok(())
    }
}
