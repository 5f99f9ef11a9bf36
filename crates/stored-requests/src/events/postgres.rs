//! Postgres LISTEN/NOTIFY producer.
//!
//! Subscribes to a named notification channel whose payloads describe row
//! changes on the stored-request table:
//!
//! ```json
//! {
//!   "table": "stored_requests",
//!   "action": "UPDATE",
//!   "data": {"id": "1", "requestData": {"id": "..."}}
//! }
//! ```
//!
//! `UPDATE` emits a cache update, `DELETE` an invalidation. `INSERT` is
//! ignored: a brand-new id has never been queried, so no cache holds a stale
//! copy of it. A periodic ping keeps the listening connection from being
//! reaped as idle.

use {
    super::{channel, EventChannels, EventSender},
    crate::StoredData,
    anyhow::{Context, Result},
    bytes::Bytes,
    serde::Deserialize,
    sqlx::postgres::{PgListener, PgPool, PgPoolOptions},
    std::time::Duration,
};

const IDLE_PING_INTERVAL: Duration = Duration::from_secs(90);

#[derive(Debug, Deserialize)]
struct Notification {
    #[allow(dead_code)]
    table: String,
    action: String,
    data: NotificationData,
}

#[derive(Debug, Deserialize)]
struct NotificationData {
    id: String,
    #[serde(rename = "requestData", default)]
    request_data: Option<Box<serde_json::value::RawValue>>,
}

/// Connects to the database and starts listening on `notify_channel`.
/// Returns the event channels to wire into a listener.
pub async fn new_postgres_events(database_url: &str, notify_channel: &str) -> Result<EventChannels> {
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(database_url)
        .await
        .context("connecting to stored request database")?;
    let mut listener = PgListener::connect_with(&pool)
        .await
        .context("opening LISTEN connection")?;
    listener
        .listen(notify_channel)
        .await
        .with_context(|| format!("listening on channel {notify_channel}"))?;

    let (sender, channels) = channel();
    tokio::spawn(handle_notifications(listener, pool, sender));
    Ok(channels)
}

async fn handle_notifications(mut listener: PgListener, pool: PgPool, sender: EventSender) {
    loop {
        tokio::select! {
            notification = listener.recv() => match notification {
                Ok(notification) => handle_payload(notification.payload(), &sender).await,
                Err(err) => {
                    // recv reconnects on the next call; just surface the gap.
                    tracing::error!(?err, "error receiving stored request notification");
                }
            },
            _ = tokio::time::sleep(IDLE_PING_INTERVAL) => {
                tracing::info!("no stored request events for 90 seconds, checking connection");
                if let Err(err) = sqlx::query("SELECT 1").execute(&pool).await {
                    tracing::error!(?err, "stored request database ping failed");
                }
            }
        }
    }
}

async fn handle_payload(payload: &str, sender: &EventSender) {
    let notification: Notification = match serde_json::from_str(payload) {
        Ok(notification) => notification,
        Err(err) => {
            tracing::error!(?err, payload, "malformed stored request notification");
            return;
        }
    };
    match notification.action.as_str() {
        "UPDATE" => {
            let Some(request_data) = notification.data.request_data else {
                tracing::error!(id = %notification.data.id, "UPDATE notification without requestData");
                return;
            };
            let value = Bytes::copy_from_slice(request_data.get().as_bytes());
            sender
                .update(StoredData::from([(notification.data.id, value)]))
                .await;
        }
        "DELETE" => sender.invalidate(vec![notification.data.id]).await,
        // Nothing has queried a freshly inserted id yet.
        "INSERT" => {}
        other => tracing::warn!(action = other, "unexpected stored request notification action"),
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::events};

    #[tokio::test]
    async fn update_notifications_become_cache_updates() {
        let (sender, mut channels) = events::channel();
        handle_payload(
            r#"{"table":"stored_requests","action":"UPDATE","data":{"id":"1","requestData":{"id":"x"}}}"#,
            &sender,
        )
        .await;
        let data = channels.updates.recv().await.unwrap();
        assert_eq!(data["1"], Bytes::from(r#"{"id":"x"}"#));
    }

    #[tokio::test]
    async fn delete_notifications_become_invalidations() {
        let (sender, mut channels) = events::channel();
        handle_payload(
            r#"{"table":"stored_requests","action":"DELETE","data":{"id":"9"}}"#,
            &sender,
        )
        .await;
        assert_eq!(channels.invalidations.recv().await.unwrap(), vec!["9".to_string()]);
    }

    #[tokio::test]
    async fn insert_notifications_are_ignored() {
        let (sender, mut channels) = events::channel();
        handle_payload(
            r#"{"table":"stored_requests","action":"INSERT","data":{"id":"2","requestData":{}}}"#,
            &sender,
        )
        .await;
        drop(sender);
        assert!(channels.updates.recv().await.is_none());
        assert!(channels.invalidations.recv().await.is_none());
    }

    #[tokio::test]
    async fn malformed_payloads_are_dropped() {
        let (sender, mut channels) = events::channel();
        handle_payload("not json", &sender).await;
        drop(sender);
        assert!(channels.updates.recv().await.is_none());
    }
}
