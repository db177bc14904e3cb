//! Shared application state.

use std::sync::Arc;
use std::time::Duration;

use manifold_auth::{CookieSessionService, OidcClient, SessionTokenService, SigningKeyPair};
use manifold_client::{ApiClient, ControllerTarget, Dialer};
use manifold_core::{names, Error, Relation, Result, Tag};
use manifold_policy::{PolicyEngine, RelationTuple};
use manifold_store::{Controller, Database, Identity, SqlTupleStore, Vault};

use crate::config::Config;
use crate::metrics::Metrics;
use crate::pubsub::Hub;
use crate::resolver::TagResolver;

/// An authenticated caller.
#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    pub identity: Identity,
    /// Whether the caller administers the plane itself.
    pub admin: bool,
}

impl AuthenticatedUser {
    pub fn tag(&self) -> Tag {
        Tag::user(&self.identity.name)
    }

    /// JAAS form, `user-<principal>`.
    pub fn jaas_tag(&self) -> String {
        format!("user-{}", self.identity.name)
    }
}

/// Everything a request handler needs, shared behind one `Arc`.
pub struct App {
    pub config: Config,
    pub db: Database,
    pub policy: PolicyEngine,
    pub vault: Vault,
    pub dialer: Arc<dyn Dialer>,
    pub resolver: TagResolver,
    pub keys: Arc<SigningKeyPair>,
    pub session_tokens: SessionTokenService,
    pub cookies: CookieSessionService,
    pub oidc: Option<Arc<OidcClient>>,
    pub hub: Hub,
    pub metrics: Metrics,
}

impl App {
    /// Wire the application together: database, policy store, vault,
    /// signing keys and session services, then bootstrap the configured
    /// admins.
    pub async fn new(
        config: Config,
        dialer: Arc<dyn Dialer>,
        oidc: Option<Arc<OidcClient>>,
    ) -> Result<Arc<App>> {
        let db = Database::connect(&config.dsn).await?;
        let policy = PolicyEngine::new(Arc::new(SqlTupleStore::new(db.clone())));
        let vault = Vault::in_memory();
        let resolver = TagResolver::new(db.clone(), &config.controller_name, &config.controller_uuid);
        let keys = Arc::new(SigningKeyPair::generate(&format!(
            "{}-jwt-key",
            config.controller_name
        ))?);
        let session_ttl = Duration::from_secs(config.session_ttl_hours * 3600);
        let session_tokens =
            SessionTokenService::new(keys.clone(), config.controller_name.clone(), session_ttl);
        let cookies = CookieSessionService::new(
            &vault.session_secret().await?,
            config.controller_name.clone(),
            session_ttl,
        );
        let metrics = Metrics::new()?;
        let hub = Hub::new(metrics.clone());

        let app = Arc::new(App {
            db,
            policy,
            vault,
            dialer,
            resolver,
            keys,
            session_tokens,
            cookies,
            oidc,
            hub,
            metrics,
            config,
        });
        app.bootstrap_admins().await?;
        Ok(app)
    }

    /// Give the configured identities plane-administrator rights.
    async fn bootstrap_admins(&self) -> Result<()> {
        for name in &self.config.admin_identities {
            let mut identity = self.db.ensure_identity(name).await?;
            if !identity.admin {
                identity.admin = true;
                self.db.update_identity(&identity).await?;
            }
            let tuple = RelationTuple::new(
                Tag::user(name),
                Relation::Administrator,
                self.resolver.plane_controller_tag(),
            );
            self.policy.add_relations(&[tuple]).await?;
        }
        Ok(())
    }

    /// Bind a verified principal to an identity, creating it on first
    /// contact. Local principals are rejected in every external flow.
    pub async fn authenticate_principal(&self, principal: &str) -> Result<AuthenticatedUser> {
        if !names::is_external_principal(principal) {
            return Err(Error::unauthorized(format!(
                "local user {principal:?} is not allowed here"
            )));
        }
        let identity = self.db.ensure_identity(principal).await?;
        let admin = self.is_plane_admin(&identity).await?;
        Ok(AuthenticatedUser { identity, admin })
    }

    /// Admin either via the catalog flag or via an administrator relation
    /// on the plane's own controller entry.
    pub async fn is_plane_admin(&self, identity: &Identity) -> Result<bool> {
        if identity.admin {
            return Ok(true);
        }
        let probe = RelationTuple::new(
            Tag::user(&identity.name),
            Relation::Administrator,
            self.resolver.plane_controller_tag(),
        );
        self.policy.check(&probe).await
    }

    /// The dial target for a stored controller, with admin credentials
    /// from the vault when available.
    pub async fn dial_target(&self, controller: &Controller) -> ControllerTarget {
        let mut target = ControllerTarget {
            name: controller.name.clone(),
            uuid: controller.uuid.clone(),
            public_address: controller.public_address.clone(),
            addresses: controller.addresses.clone(),
            ca_cert: controller.ca_cert.clone(),
            tls_hostname: controller.tls_hostname.clone(),
            username: String::new(),
            password: String::new(),
        };
        if let Ok(credentials) = self.vault.controller_credentials(&controller.name).await {
            target.username = credentials.username;
            target.password = credentials.password;
        }
        target
    }

    /// Dial a controller as the plane, keeping `unavailable-since` honest:
    /// set on failure, cleared on the first success.
    pub async fn dial_controller(&self, controller: &Controller) -> Result<ApiClient> {
        let target = self.dial_target(controller).await;
        match self.dialer.dial(&target).await {
            Ok(client) => {
                if controller.unavailable_since.is_some() {
                    self.db
                        .set_controller_unavailable_since(&controller.uuid, None)
                        .await?;
                    self.metrics.controllers_unavailable.dec();
                }
                Ok(client)
            }
            Err(e) => {
                if controller.unavailable_since.is_none() {
                    self.db
                        .set_controller_unavailable_since(
                            &controller.uuid,
                            Some(manifold_store::now_micros()),
                        )
                        .await?;
                    self.metrics.controllers_unavailable.inc();
                }
                Err(e)
            }
        }
    }
}
