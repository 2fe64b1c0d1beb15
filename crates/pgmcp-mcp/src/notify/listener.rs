//! The listening-connection seam.

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgListener;

use crate::error::NotifyError;

/// A notification as it arrives from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNotification {
    pub channel: String,
    pub payload: String,
    pub process_id: u32,
}

/// One dedicated connection listening on one channel.
#[async_trait]
pub trait ChannelListener: Send {
    /// Next notification. An error means the connection is lost.
    async fn recv(&mut self) -> Result<RawNotification, NotifyError>;
}

/// Opens listening connections.
#[async_trait]
pub trait ListenerConnector: Send + Sync {
    async fn connect(&self, channel: &str) -> Result<Box<dyn ChannelListener>, NotifyError>;
}

/// Opens a `PgListener` per channel from the shared pool's connect options.
#[derive(Clone)]
pub struct PgListenerConnector {
    pool: PgPool,
}

impl PgListenerConnector {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

struct PgChannelListener {
    channel: String,
    inner: PgListener,
}

#[async_trait]
impl ListenerConnector for PgListenerConnector {
    async fn connect(&self, channel: &str) -> Result<Box<dyn ChannelListener>, NotifyError> {
        let connect_error = |e: sqlx::Error| NotifyError::Connect {
            channel: channel.to_string(),
            reason: e.to_string(),
        };
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(connect_error)?;
        listener.listen(channel).await.map_err(connect_error)?;
        Ok(Box::new(PgChannelListener {
            channel: channel.to_string(),
            inner: listener,
        }))
    }
}

#[async_trait]
impl ChannelListener for PgChannelListener {
    async fn recv(&mut self) -> Result<RawNotification, NotifyError> {
        // try_recv reports a lost connection instead of silently reconnecting
        match self.inner.try_recv().await {
            Ok(Some(n)) => Ok(RawNotification {
                channel: n.channel().to_string(),
                payload: n.payload().to_string(),
                process_id: n.process_id(),
            }),
            Ok(None) => Err(NotifyError::Receive {
                channel: self.channel.clone(),
                reason: "connection lost".into(),
            }),
            Err(e) => Err(NotifyError::Receive {
                channel: self.channel.clone(),
                reason: e.to_string(),
            }),
        }
    }
}
