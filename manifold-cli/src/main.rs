use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use manifold_cli::client::{store_token, PlaneClient};
use manifold_cli::docs::ControllerInfoDoc;
use manifold_cli::output::{self, Format};
use manifold_core::Result;

#[derive(Parser)]
#[command(name = "manifold", version, about = "Client for a Manifold management plane")]
struct Cli {
    /// Plane address, `host:port`.
    #[arg(long, global = true, env = "MANIFOLD_URL", default_value = "127.0.0.1:17070")]
    url: String,
    /// Path to a CA certificate for the plane itself.
    #[arg(long, global = true, env = "MANIFOLD_CA_CERT")]
    ca_cert: Option<String>,
    /// Output format.
    #[arg(long, global = true, value_enum, default_value = "yaml")]
    format: Format,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in through the device flow and store a session token
    Login,
    /// Show the authenticated identity
    Whoami,

    /// Register a backend controller from a controller-info file
    AddController {
        /// Path to the controller-info YAML document
        file: String,
    },
    /// Emit a controller-info document for add-controller
    WriteControllerInfo {
        name: String,
        #[arg(long)]
        public_address: Option<String>,
        #[arg(long = "api-address")]
        api_addresses: Vec<String>,
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
        /// Path to the controller CA certificate
        #[arg(long)]
        ca_cert_file: Option<String>,
        #[arg(long)]
        tls_hostname: Option<String>,
    },
    /// List the federated controllers
    Controllers,
    /// Show one controller
    ShowController { name: String },
    /// Remove a controller that hosts no models
    RemoveController { name: String },
    /// Mark a controller deprecated (or not) for model placement
    SetControllerDeprecated {
        name: String,
        #[arg(long)]
        undo: bool,
    },

    /// Create a model on the best-placed controller
    AddModel {
        name: String,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        cloud: Option<String>,
        #[arg(long)]
        region: Option<String>,
        #[arg(long)]
        credential: Option<String>,
        /// Model config as key=value pairs
        #[arg(long = "config")]
        config: Vec<String>,
    },
    /// List models you can read
    Models,
    /// Destroy a model (`owner/name` or UUID)
    DestroyModel { model: String },
    /// Import an existing model from a federated controller
    ImportModel {
        controller: String,
        model_uuid: String,
        #[arg(long)]
        owner: Option<String>,
    },
    /// Point an externally-migrated model at its new controller
    UpdateMigratedModel {
        model: String,
        target_controller: String,
    },
    /// Migrate a model to another federated controller
    Migrate {
        model: String,
        target_controller: String,
    },

    /// Grant model access (`admin`, `write` or `read`)
    GrantModel {
        model: String,
        user: String,
        access: String,
    },
    /// Revoke model access; revoking `read` removes every level
    RevokeModel {
        model: String,
        user: String,
        access: String,
    },
    /// Add a relation between two tagged entities
    Grant {
        object: String,
        relation: String,
        target: String,
    },
    /// Remove a relation between two tagged entities
    Revoke {
        object: String,
        relation: String,
        target: String,
    },

    /// Create a group
    AddGroup { name: String },
    /// Rename a group (its id is stable)
    RenameGroup { name: String, new_name: String },
    /// Remove a group and every relation that mentions it
    RemoveGroup { name: String },
    /// List groups
    Groups {
        #[arg(long, default_value_t = 50)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
        #[arg(long)]
        r#match: Option<String>,
    },
    /// Create a role
    AddRole { name: String },
    /// Rename a role
    RenameRole { name: String, new_name: String },
    /// Remove a role and every relation that mentions it
    RemoveRole { name: String },
    /// List roles
    Roles {
        #[arg(long, default_value_t = 50)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
        #[arg(long)]
        r#match: Option<String>,
    },

    /// Read the audit log
    AuditEvents {
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        #[arg(long)]
        identity: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        method: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
        /// Most recent first
        #[arg(long)]
        reverse: bool,
    },
    /// Delete audit entries older than an RFC 3339 timestamp
    PurgeLogs { before: String },

    /// Claim administration of a service account
    AddServiceAccount { client_id: String },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("ERROR {}", e.message());
        std::process::exit(1);
    }
}

fn parse_config_pairs(pairs: &[String]) -> Result<serde_json::Map<String, Value>> {
    let mut out = serde_json::Map::new();
    for pair in pairs {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            manifold_core::Error::bad_request(format!("config {pair:?} is not key=value"))
        })?;
        out.insert(key.to_string(), Value::String(value.to_string()));
    }
    Ok(out)
}

async fn run(cli: Cli) -> Result<()> {
    let format = cli.format;
    let ca_cert = match &cli.ca_cert {
        Some(path) => Some(std::fs::read_to_string(path).map_err(|e| {
            manifold_core::Error::bad_request(format!("read {path}: {e}"))
        })?),
        None => None,
    };
    let ca_cert = ca_cert.as_deref();

    // Commands that run without a connection.
    if let Commands::WriteControllerInfo {
        name,
        public_address,
        api_addresses,
        username,
        password,
        ca_cert_file,
        tls_hostname,
    } = &cli.command
    {
        let ca_certificate = match ca_cert_file {
            Some(path) => std::fs::read_to_string(path).map_err(|e| {
                manifold_core::Error::bad_request(format!("read {path}: {e}"))
            })?,
            None => String::new(),
        };
        let doc = ControllerInfoDoc {
            name: name.clone(),
            public_address: public_address.clone().unwrap_or_default(),
            api_addresses: api_addresses.clone(),
            ca_certificate,
            username: username.clone(),
            password: password.clone(),
            tls_hostname: tls_hostname.clone().unwrap_or_default(),
            ..Default::default()
        };
        doc.validate()?;
        print!("{}", doc.to_yaml()?);
        return Ok(());
    }

    if let Commands::Login = &cli.command {
        let client = PlaneClient::connect(&cli.url, ca_cert).await?;
        let device = client.admin_call("LoginDevice", Value::Null).await?;
        let uri = device
            .get("verification_uri_complete")
            .or_else(|| device.get("verification_uri"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        let code = device.get("user_code").and_then(Value::as_str).unwrap_or_default();
        eprintln!("Open {uri} and enter code {code}");
        let session = client.admin_call("GetDeviceSessionToken", Value::Null).await?;
        let token = session
            .get("session-token")
            .and_then(Value::as_str)
            .ok_or_else(|| manifold_core::Error::unauthorized("no session token returned"))?;
        store_token(token)?;
        eprintln!("Logged in.");
        return Ok(());
    }

    let client = PlaneClient::connect_and_login(&cli.url, ca_cert).await?;
    let response = match &cli.command {
        Commands::Login | Commands::WriteControllerInfo { .. } => unreachable!(),

        Commands::Whoami => client.call("WhoAmI", Value::Null).await?,

        Commands::AddController { file } => {
            let raw = std::fs::read_to_string(file).map_err(|e| {
                manifold_core::Error::bad_request(format!("read {file}: {e}"))
            })?;
            let doc = ControllerInfoDoc::from_yaml(&raw)?;
            doc.validate()?;
            let params = serde_json::to_value(&doc).unwrap_or_default();
            client.call("AddController", params).await?
        }
        Commands::Controllers => client.call("ListControllers", Value::Null).await?,
        Commands::ShowController { name } => {
            client.call("ControllerInfo", json!({ "name": name })).await?
        }
        Commands::RemoveController { name } => {
            client.call("RemoveController", json!({ "name": name })).await?
        }
        Commands::SetControllerDeprecated { name, undo } => {
            client
                .call(
                    "SetControllerDeprecated",
                    json!({ "name": name, "deprecated": !undo }),
                )
                .await?
        }

        Commands::AddModel {
            name,
            owner,
            cloud,
            region,
            credential,
            config,
        } => {
            client
                .call(
                    "AddModel",
                    json!({
                        "name": name,
                        "owner": owner.clone().unwrap_or_default(),
                        "cloud": cloud.clone().unwrap_or_default(),
                        "region": region.clone().unwrap_or_default(),
                        "credential": credential.clone().unwrap_or_default(),
                        "config": parse_config_pairs(config)?,
                    }),
                )
                .await?
        }
        Commands::Models => client.call("ListModels", Value::Null).await?,
        Commands::DestroyModel { model } => {
            client.call("DestroyModel", json!({ "model": model })).await?
        }
        Commands::ImportModel {
            controller,
            model_uuid,
            owner,
        } => {
            client
                .call(
                    "ImportModel",
                    json!({
                        "controller": controller,
                        "model-uuid": model_uuid,
                        "owner": owner.clone().unwrap_or_default(),
                    }),
                )
                .await?
        }
        Commands::UpdateMigratedModel {
            model,
            target_controller,
        } => {
            client
                .call(
                    "UpdateMigratedModel",
                    json!({ "model": model, "target-controller": target_controller }),
                )
                .await?
        }
        Commands::Migrate {
            model,
            target_controller,
        } => {
            client
                .call(
                    "InitiateMigration",
                    json!({ "model": model, "target-controller": target_controller }),
                )
                .await?
        }

        Commands::GrantModel {
            model,
            user,
            access,
        } => {
            client
                .call(
                    "GrantModelAccess",
                    json!({ "model": model, "user": user, "access": access }),
                )
                .await?
        }
        Commands::RevokeModel {
            model,
            user,
            access,
        } => {
            client
                .call(
                    "RevokeModelAccess",
                    json!({ "model": model, "user": user, "access": access }),
                )
                .await?
        }
        Commands::Grant {
            object,
            relation,
            target,
        } => {
            client
                .call(
                    "GrantRelation",
                    json!({ "object": object, "relation": relation, "target": target }),
                )
                .await?
        }
        Commands::Revoke {
            object,
            relation,
            target,
        } => {
            client
                .call(
                    "RevokeRelation",
                    json!({ "object": object, "relation": relation, "target": target }),
                )
                .await?
        }

        Commands::AddGroup { name } => client.call("AddGroup", json!({ "name": name })).await?,
        Commands::RenameGroup { name, new_name } => {
            client
                .call("RenameGroup", json!({ "name": name, "new-name": new_name }))
                .await?
        }
        Commands::RemoveGroup { name } => {
            client.call("RemoveGroup", json!({ "name": name })).await?
        }
        Commands::Groups {
            limit,
            offset,
            r#match,
        } => {
            client
                .call(
                    "ListGroups",
                    json!({
                        "limit": limit,
                        "offset": offset,
                        "match": r#match.clone().unwrap_or_default(),
                    }),
                )
                .await?
        }
        Commands::AddRole { name } => client.call("AddRole", json!({ "name": name })).await?,
        Commands::RenameRole { name, new_name } => {
            client
                .call("RenameRole", json!({ "name": name, "new-name": new_name }))
                .await?
        }
        Commands::RemoveRole { name } => {
            client.call("RemoveRole", json!({ "name": name })).await?
        }
        Commands::Roles {
            limit,
            offset,
            r#match,
        } => {
            client
                .call(
                    "ListRoles",
                    json!({
                        "limit": limit,
                        "offset": offset,
                        "match": r#match.clone().unwrap_or_default(),
                    }),
                )
                .await?
        }

        Commands::AuditEvents {
            start,
            end,
            identity,
            model,
            method,
            limit,
            offset,
            reverse,
        } => {
            let response = client
                .call(
                    "FindAuditEvents",
                    json!({
                        "start": start.clone().unwrap_or_default(),
                        "end": end.clone().unwrap_or_default(),
                        "identity-tag": identity.clone().unwrap_or_default(),
                        "model": model.clone().unwrap_or_default(),
                        "method": method.clone().unwrap_or_default(),
                        "limit": limit,
                        "offset": offset,
                        "reverse": reverse,
                    }),
                )
                .await?;
            if format == Format::Tabular {
                let empty = Vec::new();
                let events = response
                    .get("events")
                    .and_then(Value::as_array)
                    .unwrap_or(&empty);
                output::print_audit_table(events);
                return Ok(());
            }
            response
        }
        Commands::PurgeLogs { before } => {
            client.call("PurgeLogs", json!({ "before": before })).await?
        }

        Commands::AddServiceAccount { client_id } => {
            client
                .call("AddServiceAccount", json!({ "client-id": client_id }))
                .await?
        }
    };

    output::print(format, &response)
}
