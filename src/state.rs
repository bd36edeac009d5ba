use crate::catalog::{Catalog, MemoryCatalog, PgCatalog};
use crate::config::AppConfig;
use crate::mail::{LogMailer, Mailer, SmtpMailer};
use crate::storage::{Storage, StorageClient};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<dyn Catalog>,
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn StorageClient>,
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let catalog = match &config.database_url {
            Some(url) => {
                let pg = PgCatalog::connect(url).await?;
                if let Err(e) = pg.migrate().await {
                    warn!(error = %e, "migration failed; continuing");
                }
                Arc::new(pg) as Arc<dyn Catalog>
            }
            None => {
                warn!("DATABASE_URL not set; using in-memory catalog");
                Arc::new(MemoryCatalog::new()) as Arc<dyn Catalog>
            }
        };

        let storage = Storage::new(&config.storage).await?;
        if let Err(e) = storage.ensure_bucket().await {
            warn!(error = %e, "photo bucket unavailable; uploads will be skipped");
        }
        let storage = Arc::new(storage) as Arc<dyn StorageClient>;

        let mailer = match &config.mail.host {
            Some(host) => {
                info!(%host, "smtp mail delivery enabled");
                Arc::new(SmtpMailer::new(host, &config.mail)?) as Arc<dyn Mailer>
            }
            None => Arc::new(LogMailer) as Arc<dyn Mailer>,
        };

        Ok(Self::from_parts(catalog, config, storage, mailer))
    }

    pub fn from_parts(
        catalog: Arc<dyn Catalog>,
        config: Arc<AppConfig>,
        storage: Arc<dyn StorageClient>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            catalog,
            config,
            storage,
            mailer,
        }
    }

    #[cfg(test)]
    pub fn fake() -> Self {
        use crate::config::{JwtConfig, MailConfig, StorageConfig};

        let config = Arc::new(AppConfig {
            database_url: None,
            jwt: JwtConfig {
                secret: "test".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 5,
                refresh_ttl_minutes: 60,
            },
            storage: StorageConfig {
                endpoint: "fake".into(),
                bucket: "fake".into(),
                access_key: "fake".into(),
                secret_key: "fake".into(),
                region: "us-east-1".into(),
            },
            mail: MailConfig {
                host: None,
                port: 587,
                username: String::new(),
                password: String::new(),
                from_address: "test@delicious.local".into(),
            },
            public_url: "http://delicious.test".into(),
            reset_ttl_minutes: 60,
        });

        Self::from_parts(
            Arc::new(MemoryCatalog::new()),
            config,
            Arc::new(fakes::FakeStorage),
            Arc::new(fakes::RecordingMailer::default()),
        )
    }

    #[cfg(test)]
    pub fn with_storage(mut self, storage: Arc<dyn StorageClient>) -> Self {
        self.storage = storage;
        self
    }

    #[cfg(test)]
    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = mailer;
        self
    }
}

#[cfg(test)]
pub mod fakes {
    use crate::mail::{MailMessage, Mailer};
    use crate::storage::StorageClient;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::Mutex;

    #[derive(Clone)]
    pub struct FakeStorage;

    #[async_trait]
    impl StorageClient for FakeStorage {
        async fn put_object(&self, _k: &str, _b: Bytes, _ct: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn delete_object(&self, _k: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn presign_get(&self, k: &str, _s: u64) -> anyhow::Result<String> {
            Ok(format!("https://fake.local/{}", k))
        }
    }

    /// Storage whose uploads always fail.
    pub struct FailingStorage;

    #[async_trait]
    impl StorageClient for FailingStorage {
        async fn put_object(&self, _k: &str, _b: Bytes, _ct: &str) -> anyhow::Result<()> {
            anyhow::bail!("bucket unavailable")
        }
        async fn delete_object(&self, _k: &str) -> anyhow::Result<()> {
            anyhow::bail!("bucket unavailable")
        }
        async fn presign_get(&self, _k: &str, _s: u64) -> anyhow::Result<String> {
            anyhow::bail!("bucket unavailable")
        }
    }

    #[derive(Default)]
    pub struct RecordingMailer {
        pub sent: Mutex<Vec<MailMessage>>,
    }

    impl RecordingMailer {
        pub fn sent(&self) -> Vec<MailMessage> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, message: MailMessage) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }
    }
}
