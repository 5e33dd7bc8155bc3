use crate::config::RelayConfig;
use crate::device_resolver::DeviceResolver;
use crate::encryptor::ParticipantEncryptor;
use crate::error::RelayError;
use crate::keyed_mutex::KeyedMutex;
use crate::lid_mapping::LidMappingStore;
use crate::session::SessionManager;
use crate::store::{KeyTransaction, MemoryKeyStore, TransactionalKeyStore};
use crate::wait::EventWaiters;
use moka::future::Cache;
use std::sync::Arc;
use wacore::client::context::{
    AddressingMode, GroupInfo, GroupMetadataProvider, LidDirectory, SignalRepository, Transport,
};
use wacore::proto::whatsapp as wa;
use wacore::store::KeyStore;
use wacore_binary::jid::Jid;
use wacore_binary::node::Node;

/// The authenticated identity messages are sent as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// Phone-number address of this device.
    pub pn: Jid,
    /// Linked identity of this device, once known.
    pub lid: Option<Jid>,
    /// Signed device identity attached next to pre-key messages.
    pub device_identity: Vec<u8>,
}

impl Account {
    pub fn new(pn: Jid, lid: Option<Jid>, device_identity: Vec<u8>) -> Self {
        Self {
            pn,
            lid,
            device_identity,
        }
    }

    /// Whether `jid` is one of this account's devices, under either identity.
    pub fn is_own(&self, jid: &Jid) -> bool {
        jid.is_same_user_as(&self.pn) || self.lid.as_ref().is_some_and(|lid| jid.is_same_user_as(lid))
    }

    /// Whether `jid` is exactly the device sending. Only an address with
    /// an explicit device can name it.
    pub fn is_origin_device(&self, jid: &Jid) -> bool {
        let same = |me: &Jid| me.has_explicit_device() && jid.is_same_user_as(me) && jid.device() == me.device();
        same(&self.pn) || self.lid.as_ref().is_some_and(same)
    }

    /// The address used inside a chat with the given addressing mode.
    pub fn address_for(&self, mode: AddressingMode) -> &Jid {
        match (mode, &self.lid) {
            (AddressingMode::Lid, Some(lid)) => lid,
            _ => &self.pn,
        }
    }
}

pub(crate) type RecentKey = (String, String);

pub struct RelayClient {
    pub(crate) config: RelayConfig,
    pub(crate) account: Option<Account>,
    pub(crate) keys: TransactionalKeyStore,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) groups: Arc<dyn GroupMetadataProvider>,
    pub(crate) signal: Arc<dyn SignalRepository>,
    pub(crate) mappings: Arc<LidMappingStore>,
    pub(crate) resolver: DeviceResolver,
    pub(crate) sessions: SessionManager,
    pub(crate) encryptor: ParticipantEncryptor,
    /// Shared by the encryptor and pairwise decryption.
    pub(crate) locks: Arc<KeyedMutex<String>>,
    pub(crate) group_cache: Cache<String, GroupInfo>,
    pub(crate) recent_messages: Option<Cache<RecentKey, wa::Message>>,
    pub(crate) receipt_waiters: EventWaiters<String, Node>,
}

impl RelayClient {
    pub fn builder() -> RelayClientBuilder {
        RelayClientBuilder::default()
    }

    pub fn account(&self) -> Option<&Account> {
        self.account.as_ref()
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn mappings(&self) -> &LidMappingStore {
        &self.mappings
    }

    pub fn key_store(&self) -> &Arc<dyn KeyStore> {
        self.keys.backend()
    }

    /// Commits `tx`, then mirrors the mappings it persisted in the cache.
    pub(crate) async fn commit(&self, tx: KeyTransaction) -> Result<(), RelayError> {
        let committed = tx.commit().await?;
        self.mappings.apply_committed(&committed).await;
        Ok(())
    }

    pub(crate) fn require_account(&self) -> Result<&Account, RelayError> {
        self.account.as_ref().ok_or(RelayError::NotAuthenticated)
    }

    /// Participants and addressing mode of `group`, from the cache when
    /// allowed.
    pub async fn group_info(&self, group: &Jid, use_cache: bool) -> Result<GroupInfo, RelayError> {
        let key = group.to_string();
        if use_cache && let Some(info) = self.group_cache.get(&key).await {
            log::trace!(target: "Relay/Group", "using cached group metadata for {group}");
            return Ok(info);
        }
        let info = self
            .groups
            .group_metadata(group)
            .await
            .map_err(RelayError::AddressResolution)?;
        self.group_cache.insert(key, info.clone()).await;
        Ok(info)
    }

    pub async fn invalidate_group(&self, group: &Jid) {
        self.group_cache.invalidate(&group.to_string()).await;
    }

    pub async fn invalidate_devices(&self, user: &str) {
        self.resolver.invalidate(user).await;
    }
}

#[derive(Default)]
pub struct RelayClientBuilder {
    transport: Option<Arc<dyn Transport>>,
    signal: Option<Arc<dyn SignalRepository>>,
    groups: Option<Arc<dyn GroupMetadataProvider>>,
    directory: Option<Arc<dyn LidDirectory>>,
    keys: Option<Arc<dyn KeyStore>>,
    account: Option<Account>,
    config: RelayConfig,
}

impl RelayClientBuilder {
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_signal(mut self, signal: Arc<dyn SignalRepository>) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn with_groups(mut self, groups: Arc<dyn GroupMetadataProvider>) -> Self {
        self.groups = Some(groups);
        self
    }

    pub fn with_lid_directory(mut self, directory: Arc<dyn LidDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Defaults to an empty [`MemoryKeyStore`].
    pub fn with_key_store(mut self, keys: Arc<dyn KeyStore>) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn with_account(mut self, account: Account) -> Self {
        self.account = Some(account);
        self
    }

    pub fn with_config(mut self, config: RelayConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<RelayClient, RelayError> {
        let transport = self.transport.ok_or(RelayError::Build("a transport"))?;
        let signal = self.signal.ok_or(RelayError::Build("a signal repository"))?;
        let groups = self
            .groups
            .ok_or(RelayError::Build("a group metadata provider"))?;
        let keys = self
            .keys
            .unwrap_or_else(|| Arc::new(MemoryKeyStore::new()));
        let config = self.config;

        let mappings = Arc::new(LidMappingStore::new(self.directory));
        let locks = Arc::new(KeyedMutex::new());
        let resolver = DeviceResolver::new(
            transport.clone(),
            mappings.clone(),
            config.device_cache_ttl(),
            config.device_cache_capacity,
            config.query_timeout(),
        );
        let sessions = SessionManager::new(
            transport.clone(),
            signal.clone(),
            mappings.clone(),
            config.session_fetch_batch_size,
            config.query_timeout(),
        );
        let encryptor = ParticipantEncryptor::new(signal.clone(), mappings.clone(), locks.clone());
        let group_cache = Cache::builder()
            .time_to_live(config.group_metadata_ttl())
            .max_capacity(1_000)
            .build();
        let recent_messages = config.recent_messages_enabled.then(|| {
            Cache::builder()
                .time_to_live(config.recent_messages_ttl())
                .max_capacity(config.recent_messages_capacity)
                .build()
        });

        Ok(RelayClient {
            config,
            account: self.account,
            keys: TransactionalKeyStore::new(keys),
            transport,
            groups,
            signal,
            mappings,
            resolver,
            sessions,
            encryptor,
            locks,
            group_cache,
            recent_messages,
            receipt_waiters: EventWaiters::new(),
        })
    }
}
