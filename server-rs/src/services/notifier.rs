use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::challenge::Challenge;
use crate::models::notification::{NewNotification, Notification, NotificationKind, ServerPush};
use crate::models::reward::RewardGrant;

/// Live WebSocket subscribers, keyed by user. A user may hold several
/// connections (tabs, devices).
#[derive(Clone, Default)]
pub struct NotificationHub {
    clients: Arc<RwLock<HashMap<Uuid, Vec<mpsc::UnboundedSender<ServerPush>>>>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, user_id: Uuid) -> mpsc::UnboundedReceiver<ServerPush> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut clients = self.clients.write().await;
        clients.entry(user_id).or_default().push(tx);
        rx
    }

    /// Sends to every open connection of `user_id`, dropping closed ones.
    /// Returns how many connections received the frame.
    pub async fn push(&self, user_id: Uuid, frame: ServerPush) -> usize {
        let mut clients = self.clients.write().await;
        let Some(senders) = clients.get_mut(&user_id) else {
            return 0;
        };
        senders.retain(|tx| tx.send(frame.clone()).is_ok());
        let delivered = senders.len();
        if senders.is_empty() {
            clients.remove(&user_id);
        }
        delivered
    }

    /// Drops senders whose receiving socket has gone away.
    pub async fn prune(&self, user_id: Uuid) {
        let mut clients = self.clients.write().await;
        if let Some(senders) = clients.get_mut(&user_id) {
            senders.retain(|tx| !tx.is_closed());
            if senders.is_empty() {
                clients.remove(&user_id);
            }
        }
    }

    pub async fn connected_users(&self) -> usize {
        self.clients.read().await.len()
    }
}

/// Stores a notification and pushes it to any live connection.
pub async fn notify<'e, E>(
    executor: E,
    hub: &NotificationHub,
    new: NewNotification,
) -> AppResult<Notification>
where
    E: sqlx::PgExecutor<'e>,
{
    let stored: Notification = sqlx::query_as(
        r#"INSERT INTO notifications (user_id, kind, title, body, data, is_read, created_at)
        VALUES ($1, $2, $3, $4, $5, false, NOW())
        RETURNING *"#,
    )
    .bind(new.user_id)
    .bind(new.kind)
    .bind(&new.title)
    .bind(&new.body)
    .bind(&new.data)
    .fetch_one(executor)
    .await?;

    let live = hub
        .push(
            stored.user_id,
            ServerPush::Notification {
                notification: stored.clone(),
            },
        )
        .await;
    tracing::debug!(user_id = %stored.user_id, kind = ?stored.kind, live, "notification sent");
    Ok(stored)
}

/// Best-effort delivery after a transaction has committed: failures are
/// logged, never returned.
pub async fn notify_all(db: &sqlx::PgPool, hub: &NotificationHub, batch: Vec<NewNotification>) {
    for n in batch {
        let user_id = n.user_id;
        if let Err(e) = notify(db, hub, n).await {
            tracing::warn!(%user_id, error = %e, "failed to deliver notification");
        }
    }
}

pub fn challenge_completed(user_id: Uuid, challenge: &Challenge) -> NewNotification {
    NewNotification {
        user_id,
        kind: NotificationKind::ChallengeCompleted,
        title: "Challenge completed".into(),
        body: format!("You completed \"{}\". Claim your reward!", challenge.title),
        data: Some(json!({ "challengeId": challenge.id, "slug": challenge.slug })),
    }
}

pub fn challenge_failed(user_id: Uuid, challenge_id: i32, title: &str) -> NewNotification {
    NewNotification {
        user_id,
        kind: NotificationKind::ChallengeFailed,
        title: "Challenge expired".into(),
        body: format!("Time ran out for \"{title}\"."),
        data: Some(json!({ "challengeId": challenge_id })),
    }
}

/// Notifications describing a reward grant: the points, plus badge and
/// level-up messages when they apply.
pub fn reward_notifications(
    user_id: Uuid,
    challenge: &Challenge,
    grant: &RewardGrant,
) -> Vec<NewNotification> {
    let mut out = vec![NewNotification {
        user_id,
        kind: NotificationKind::ChallengeReward,
        title: "Reward claimed".into(),
        body: format!(
            "You earned {} points from \"{}\".",
            grant.points, challenge.title
        ),
        data: Some(json!({
            "challengeId": challenge.id,
            "points": grant.points,
            "shopItemId": grant.shop_item.as_ref().map(|i| i.id),
        })),
    }];

    if let Some(badge) = &grant.badge {
        out.push(NewNotification {
            user_id,
            kind: NotificationKind::BadgeEarned,
            title: "New badge".into(),
            body: format!("You earned the \"{}\" badge.", badge.name),
            data: Some(json!({ "badgeId": badge.id, "iconUrl": badge.icon_url })),
        });
    }
    if grant.leveled_up() {
        out.push(level_up(user_id, grant.level_after));
    }
    out
}

pub fn level_up(user_id: Uuid, level: i32) -> NewNotification {
    NewNotification {
        user_id,
        kind: NotificationKind::LevelUp,
        title: "Level up!".into(),
        body: format!("You reached level {level}."),
        data: Some(json!({ "level": level })),
    }
}

pub fn friend_request(to: Uuid, from: Uuid, from_name: &str) -> NewNotification {
    NewNotification {
        user_id: to,
        kind: NotificationKind::FriendRequest,
        title: "Friend request".into(),
        body: format!("{from_name} wants to be your friend."),
        data: Some(json!({ "userId": from })),
    }
}

pub fn friend_accepted(to: Uuid, by: Uuid, by_name: &str) -> NewNotification {
    NewNotification {
        user_id: to,
        kind: NotificationKind::FriendAccepted,
        title: "Friend request accepted".into(),
        body: format!("{by_name} accepted your friend request."),
        data: Some(json!({ "userId": by })),
    }
}
