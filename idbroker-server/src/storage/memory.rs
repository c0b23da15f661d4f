//! In-memory `Storage` backend: single-process dev server and the
//! backend every test in this crate runs against. One `RwLock`-guarded
//! map per entity type; `Update` takes the write lock for the whole
//! map, which is coarser than per-key locking but sufficient here since
//! nothing in this backend ever blocks on I/O while holding it.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use idbroker_types::{
    AuthCode, AuthRequest, Client, Connector, Keys, OfflineSession, Password, RefreshToken,
};
use time::OffsetDateTime;

use super::{GcCounts, Mutator, Storage, StorageError, StorageResult};

#[derive(Default)]
pub struct InMemoryStorage {
    clients: RwLock<HashMap<String, Client>>,
    connectors: RwLock<HashMap<String, Connector>>,
    passwords: RwLock<HashMap<String, Password>>,
    auth_requests: RwLock<HashMap<String, AuthRequest>>,
    auth_codes: RwLock<HashMap<String, AuthCode>>,
    refresh_tokens: RwLock<HashMap<String, RefreshToken>>,
    offline_sessions: RwLock<HashMap<String, OfflineSession>>,
    keys: RwLock<Option<Keys>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

macro_rules! crud {
    ($create:ident, $get:ident, $update:ident, $delete:ident, $list:ident, $field:ident, $ty:ty, $id:ident) => {
        async fn $create(&self, value: $ty) -> StorageResult<()> {
            let mut map = self.$field.write().unwrap();
            if map.contains_key(&value.$id) {
                return Err(StorageError::AlreadyExists);
            }
            map.insert(value.$id.clone(), value);
            Ok(())
        }

        async fn $get(&self, id: &str) -> StorageResult<$ty> {
            self.$field
                .read()
                .unwrap()
                .get(id)
                .cloned()
                .ok_or(StorageError::NotFound)
        }

        async fn $update(&self, id: &str, mutator: Mutator<$ty>) -> StorageResult<$ty> {
            let mut map = self.$field.write().unwrap();
            let current = map.get(id).cloned().ok_or(StorageError::NotFound)?;
            let updated = mutator(current)?;
            map.insert(id.to_string(), updated.clone());
            Ok(updated)
        }

        async fn $delete(&self, id: &str) -> StorageResult<()> {
            self.$field
                .write()
                .unwrap()
                .remove(id)
                .map(|_| ())
                .ok_or(StorageError::NotFound)
        }

        async fn $list(&self) -> StorageResult<Vec<$ty>> {
            Ok(self.$field.read().unwrap().values().cloned().collect())
        }
    };
}

#[async_trait]
impl Storage for InMemoryStorage {
    crud!(
        create_client,
        get_client,
        update_client,
        delete_client,
        list_clients,
        clients,
        Client,
        id
    );

    crud!(
        create_connector,
        get_connector,
        update_connector,
        delete_connector,
        list_connectors,
        connectors,
        Connector,
        id
    );

    async fn create_password(&self, password: Password) -> StorageResult<()> {
        let mut map = self.passwords.write().unwrap();
        if map.contains_key(&password.email) {
            return Err(StorageError::AlreadyExists);
        }
        map.insert(password.email.clone(), password);
        Ok(())
    }

    async fn get_password(&self, email: &str) -> StorageResult<Password> {
        self.passwords
            .read()
            .unwrap()
            .get(email)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn list_passwords(&self) -> StorageResult<Vec<Password>> {
        Ok(self.passwords.read().unwrap().values().cloned().collect())
    }

    async fn create_auth_request(&self, req: AuthRequest) -> StorageResult<()> {
        let mut map = self.auth_requests.write().unwrap();
        if map.contains_key(&req.id) {
            return Err(StorageError::AlreadyExists);
        }
        map.insert(req.id.clone(), req);
        Ok(())
    }

    async fn get_auth_request(&self, id: &str) -> StorageResult<AuthRequest> {
        self.auth_requests
            .read()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn update_auth_request(
        &self,
        id: &str,
        mutator: Mutator<AuthRequest>,
    ) -> StorageResult<AuthRequest> {
        let mut map = self.auth_requests.write().unwrap();
        let current = map.get(id).cloned().ok_or(StorageError::NotFound)?;
        let updated = mutator(current)?;
        map.insert(id.to_string(), updated.clone());
        Ok(updated)
    }

    async fn delete_auth_request(&self, id: &str) -> StorageResult<()> {
        self.auth_requests
            .write()
            .unwrap()
            .remove(id)
            .map(|_| ())
            .ok_or(StorageError::NotFound)
    }

    async fn create_auth_code(&self, code: AuthCode) -> StorageResult<()> {
        let mut map = self.auth_codes.write().unwrap();
        if map.contains_key(&code.id) {
            return Err(StorageError::AlreadyExists);
        }
        map.insert(code.id.clone(), code);
        Ok(())
    }

    async fn get_auth_code(&self, id: &str) -> StorageResult<AuthCode> {
        self.auth_codes
            .read()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn delete_auth_code(&self, id: &str) -> StorageResult<()> {
        self.auth_codes
            .write()
            .unwrap()
            .remove(id)
            .map(|_| ())
            .ok_or(StorageError::NotFound)
    }

    async fn create_refresh_token(&self, token: RefreshToken) -> StorageResult<()> {
        let mut map = self.refresh_tokens.write().unwrap();
        if map.contains_key(&token.id) {
            return Err(StorageError::AlreadyExists);
        }
        map.insert(token.id.clone(), token);
        Ok(())
    }

    async fn get_refresh_token(&self, id: &str) -> StorageResult<RefreshToken> {
        self.refresh_tokens
            .read()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn update_refresh_token(
        &self,
        id: &str,
        mutator: Mutator<RefreshToken>,
    ) -> StorageResult<RefreshToken> {
        let mut map = self.refresh_tokens.write().unwrap();
        let current = map.get(id).cloned().ok_or(StorageError::NotFound)?;
        let updated = mutator(current)?;
        map.insert(id.to_string(), updated.clone());
        Ok(updated)
    }

    async fn delete_refresh_token(&self, id: &str) -> StorageResult<()> {
        self.refresh_tokens
            .write()
            .unwrap()
            .remove(id)
            .map(|_| ())
            .ok_or(StorageError::NotFound)
    }

    async fn get_offline_session(&self, key: &str) -> StorageResult<OfflineSession> {
        self.offline_sessions
            .read()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn upsert_offline_session(
        &self,
        key: &str,
        user_id: &str,
        connector_id: &str,
        mutator: Mutator<OfflineSession>,
    ) -> StorageResult<OfflineSession> {
        let mut map = self.offline_sessions.write().unwrap();
        let current = map
            .get(key)
            .cloned()
            .unwrap_or_else(|| OfflineSession::new(user_id.to_string(), connector_id.to_string()));
        let updated = mutator(current)?;
        map.insert(key.to_string(), updated.clone());
        Ok(updated)
    }

    async fn delete_offline_session(&self, key: &str) -> StorageResult<()> {
        self.offline_sessions
            .write()
            .unwrap()
            .remove(key)
            .map(|_| ())
            .ok_or(StorageError::NotFound)
    }

    async fn get_keys(&self) -> StorageResult<Keys> {
        self.keys.read().unwrap().clone().ok_or(StorageError::NotFound)
    }

    async fn update_keys(
        &self,
        mutator: Box<dyn FnOnce(Option<Keys>) -> StorageResult<Keys> + Send>,
    ) -> StorageResult<Keys> {
        let mut guard = self.keys.write().unwrap();
        let updated = mutator(guard.clone())?;
        *guard = Some(updated.clone());
        Ok(updated)
    }

    async fn garbage_collect(&self, before: OffsetDateTime) -> StorageResult<GcCounts> {
        let mut counts = GcCounts::default();

        let mut auth_requests = self.auth_requests.write().unwrap();
        let expired: Vec<String> = auth_requests
            .iter()
            .filter(|(_, r)| r.expiry < before)
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            auth_requests.remove(&id);
            counts.auth_requests += 1;
        }
        drop(auth_requests);

        let mut auth_codes = self.auth_codes.write().unwrap();
        let expired: Vec<String> = auth_codes
            .iter()
            .filter(|(_, c)| c.expiry < before)
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            auth_codes.remove(&id);
            counts.auth_codes += 1;
        }

        Ok(counts)
    }
}
