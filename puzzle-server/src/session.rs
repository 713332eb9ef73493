//! 会话管理
//!
//! 连接建立时创建未命名会话，`join` 之后才进入成员名单，断开时移除。

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use protocol::{ConnectionId, PuzzleError, RosterEntry, MAX_DISPLAY_NAME_LEN};

/// 会话信息
#[derive(Debug, Clone)]
pub struct Session {
    pub id: ConnectionId,
    /// 未加入时为 None
    pub display_name: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub joined_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(id: ConnectionId) -> Self {
        Self {
            id,
            display_name: None,
            connected_at: Utc::now(),
            joined_at: None,
        }
    }

    /// 是否已进入名单
    pub fn is_named(&self) -> bool {
        self.display_name.is_some()
    }

    fn roster_entry(&self) -> Option<RosterEntry> {
        Some(RosterEntry {
            connection_id: self.id,
            display_name: self.display_name.clone()?,
            joined_at: self.joined_at.unwrap_or(self.connected_at),
        })
    }
}

/// 会话注册表
pub struct SessionRegistry {
    /// 连接句柄 -> 会话
    sessions: Mutex<HashMap<ConnectionId, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// 截断过长的显示名
    pub fn normalize_display_name(display_name: &str) -> String {
        display_name.chars().take(MAX_DISPLAY_NAME_LEN).collect()
    }

    /// 连接建立：创建未命名会话，已存在时保持原样并返回 false
    pub async fn connect(&self, id: ConnectionId) -> bool {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(&id) {
            return false;
        }
        sessions.insert(id, Session::new(id));
        true
    }

    /// 以显示名加入名单
    ///
    /// 只有同一连接已经命名过才会被拒绝，原有会话保持不变。
    pub async fn join(
        &self,
        id: ConnectionId,
        display_name: &str,
    ) -> Result<Vec<RosterEntry>, PuzzleError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions.entry(id).or_insert_with(|| Session::new(id));
        if session.is_named() {
            return Err(PuzzleError::AlreadyJoined { connection_id: id });
        }

        session.display_name = Some(Self::normalize_display_name(display_name));
        session.joined_at = Some(Utc::now());

        Ok(roster_of(&sessions))
    }

    /// 移除会话
    ///
    /// 返回 `Some(名单)` 表示移除的是已命名会话，名单发生了变化。
    pub async fn leave(&self, id: ConnectionId) -> Result<Option<Vec<RosterEntry>>, PuzzleError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .remove(&id)
            .ok_or(PuzzleError::SessionNotFound { connection_id: id })?;

        if session.is_named() {
            Ok(Some(roster_of(&sessions)))
        } else {
            Ok(None)
        }
    }

    /// 当前名单（按连接句柄排序）
    pub async fn roster(&self) -> Vec<RosterEntry> {
        roster_of(&*self.sessions.lock().await)
    }

    /// 获取会话
    pub async fn get(&self, id: ConnectionId) -> Option<Session> {
        self.sessions.lock().await.get(&id).cloned()
    }

    /// 在线连接数
    pub async fn online_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// 已命名会话数
    pub async fn named_count(&self) -> usize {
        self.sessions
            .lock()
            .await
            .values()
            .filter(|s| s.is_named())
            .count()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn roster_of(sessions: &HashMap<ConnectionId, Session>) -> Vec<RosterEntry> {
    let mut roster: Vec<RosterEntry> = sessions.values().filter_map(Session::roster_entry).collect();
    roster.sort_by_key(|entry| entry.connection_id);
    roster
}
