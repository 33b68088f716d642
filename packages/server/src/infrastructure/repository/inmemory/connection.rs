//! ConnectionRepository のインメモリ実装

use std::collections::{BTreeSet, HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{
    ChannelName, Connection, ConnectionId, ConnectionRepository, RepositoryError, Timestamp,
    UserId,
};

/// 3 つの索引（同じロックの中で常に整合させる）
#[derive(Default)]
struct Indices {
    connections: HashMap<ConnectionId, Connection>,
    by_user: HashMap<UserId, HashSet<ConnectionId>>,
    by_channel: HashMap<ChannelName, BTreeSet<ConnectionId>>,
}

impl Indices {
    fn get_mut(&mut self, id: &ConnectionId) -> Result<&mut Connection, RepositoryError> {
        self.connections
            .get_mut(id)
            .ok_or_else(|| RepositoryError::ConnectionNotFound(id.to_string()))
    }

    fn unindex_user(&mut self, id: &ConnectionId, user_id: &UserId) {
        if let Some(ids) = self.by_user.get_mut(user_id) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_user.remove(user_id);
            }
        }
    }

    fn unindex_channel(&mut self, id: &ConnectionId, channel: &ChannelName) {
        if let Some(ids) = self.by_channel.get_mut(channel) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_channel.remove(channel);
            }
        }
    }

    fn unindex_all_channels(&mut self, id: &ConnectionId, channels: &BTreeSet<ChannelName>) {
        for channel in channels {
            self.unindex_channel(id, channel);
        }
    }

    fn collect(&self, ids: impl IntoIterator<Item = ConnectionId>) -> Vec<Connection> {
        ids.into_iter()
            .filter_map(|id| self.connections.get(&id).cloned())
            .collect()
    }
}

/// インメモリの ConnectionRepository 実装
#[derive(Default)]
pub struct InMemoryConnectionRepository {
    indices: Mutex<Indices>,
}

impl InMemoryConnectionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConnectionRepository for InMemoryConnectionRepository {
    async fn insert(&self, connection: Connection) -> Result<(), RepositoryError> {
        let mut indices = self.indices.lock().await;
        if indices.connections.contains_key(&connection.id) {
            return Err(RepositoryError::DuplicateConnection(
                connection.id.to_string(),
            ));
        }
        indices.connections.insert(connection.id, connection);
        Ok(())
    }

    async fn get(&self, id: &ConnectionId) -> Option<Connection> {
        self.indices.lock().await.connections.get(id).cloned()
    }

    async fn begin_authentication(&self, id: &ConnectionId) -> Result<Connection, RepositoryError> {
        let mut indices = self.indices.lock().await;
        let connection = indices.get_mut(id)?;
        connection.begin_authentication()?;
        Ok(connection.clone())
    }

    async fn bind_user(
        &self,
        id: &ConnectionId,
        user_id: UserId,
        now: Timestamp,
    ) -> Result<Connection, RepositoryError> {
        let mut indices = self.indices.lock().await;
        let connection = indices.get_mut(id)?;
        connection.open(user_id.clone(), now)?;
        let opened = connection.clone();
        indices.by_user.entry(user_id).or_default().insert(*id);
        Ok(opened)
    }

    async fn close(&self, id: &ConnectionId) -> Result<(), RepositoryError> {
        let mut indices = self.indices.lock().await;
        let connection = indices.get_mut(id)?;
        let channels = std::mem::take(&mut connection.channels);
        let user_id = connection.user_id.clone();
        connection.close();

        indices.unindex_all_channels(id, &channels);
        if let Some(user_id) = user_id {
            indices.unindex_user(id, &user_id);
        }
        Ok(())
    }

    async fn touch(&self, id: &ConnectionId, now: Timestamp) -> Result<(), RepositoryError> {
        let mut indices = self.indices.lock().await;
        indices.get_mut(id)?.touch(now);
        Ok(())
    }

    async fn remove(&self, id: &ConnectionId) -> Option<Connection> {
        let mut indices = self.indices.lock().await;
        let connection = indices.connections.remove(id)?;

        indices.unindex_all_channels(id, &connection.channels);
        if let Some(user_id) = &connection.user_id {
            indices.unindex_user(id, user_id);
        }
        Some(connection)
    }

    async fn connections_for(&self, user_id: &UserId) -> Vec<Connection> {
        let indices = self.indices.lock().await;
        let mut ids: Vec<ConnectionId> = indices
            .by_user
            .get(user_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();
        ids.sort();
        indices.collect(ids)
    }

    async fn add_membership(
        &self,
        id: &ConnectionId,
        channel: ChannelName,
    ) -> Result<bool, RepositoryError> {
        let mut indices = self.indices.lock().await;
        let connection = indices.get_mut(id)?;
        if !connection.is_open() {
            return Err(RepositoryError::InvalidTransition {
                id: id.to_string(),
                from: connection.state,
                action: "join a channel",
            });
        }
        let added = connection.channels.insert(channel.clone());
        indices.by_channel.entry(channel).or_default().insert(*id);
        Ok(added)
    }

    async fn remove_membership(&self, id: &ConnectionId, channel: &ChannelName) -> bool {
        let mut indices = self.indices.lock().await;
        let removed = match indices.connections.get_mut(id) {
            Some(connection) => connection.channels.remove(channel),
            None => false,
        };
        if removed {
            indices.unindex_channel(id, channel);
        }
        removed
    }

    async fn members_of(&self, channel: &ChannelName) -> Vec<Connection> {
        let indices = self.indices.lock().await;
        let ids: Vec<ConnectionId> = indices
            .by_channel
            .get(channel)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();
        indices.collect(ids)
    }

    async fn all(&self) -> Vec<Connection> {
        let indices = self.indices.lock().await;
        let mut connections: Vec<Connection> = indices.connections.values().cloned().collect();
        connections.sort_by_key(|connection| connection.connected_at);
        connections
    }
}
