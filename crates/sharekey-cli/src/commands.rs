//! Admin subcommands

use crate::state::AdminContext;
use clap::Subcommand;
use serde::Serialize;
use sharekey_core::{AppConfigStore, FileCache, UserDirectory, app_config::APP_ID, migration::INSTALLED_VERSION};
use tracing::info;

/// Admin subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Move legacy keys into the current layout and merge legacy settings
    Migrate,

    /// Create the recovery key if needed and enable admin recovery
    EnableRecovery {
        /// Recovery key password
        #[arg(long, env = "SHAREKEY_RECOVERY_PASSWORD")]
        password: String,
    },

    /// Disable admin recovery
    DisableRecovery {
        /// Recovery key password
        #[arg(long, env = "SHAREKEY_RECOVERY_PASSWORD")]
        password: String,
    },

    /// Re-encrypt the recovery key under a new password
    ChangeRecoveryPassword {
        /// Current recovery key password
        #[arg(long)]
        old_password: String,
        /// New recovery key password
        #[arg(long)]
        new_password: String,
    },

    /// Give a user a new key pair and re-wrap their files with the recovery key
    RecoverUser {
        /// User whose password was lost
        #[arg(long)]
        uid: String,
        /// Recovery key password
        #[arg(long, env = "SHAREKEY_RECOVERY_PASSWORD")]
        recovery_password: String,
        /// The user's new login password
        #[arg(long)]
        new_password: String,
    },

    /// Show key and migration state
    Status,
}

/// Summary printed by the `status` command
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct Status {
    pub module_id: String,
    pub master_key_enabled: bool,
    pub installed_version: Option<String>,
    pub master_key_id: String,
    pub public_share_key_id: String,
    pub recovery_key_id: String,
    pub recovery_enabled: bool,
    pub users: usize,
    pub users_with_keys: usize,
    pub encrypted_files: usize,
}

/// Run `command` and persist the resulting state. Returns the JSON report.
pub fn execute(ctx: &AdminContext, command: Command) -> anyhow::Result<serde_json::Value> {
    let output = match command {
        Command::Migrate => serde_json::to_value(ctx.migration().run()?)?,
        Command::EnableRecovery { password } => {
            let enabled = ctx.recovery().enable_admin_recovery(&password)?;
            anyhow::ensure!(enabled, "recovery password does not match the existing recovery key");
            serde_json::json!({ "recovery_enabled": true })
        }
        Command::DisableRecovery { password } => {
            let disabled = ctx.recovery().disable_admin_recovery(&password)?;
            anyhow::ensure!(disabled, "wrong recovery password");
            serde_json::json!({ "recovery_enabled": false })
        }
        Command::ChangeRecoveryPassword {
            old_password,
            new_password,
        } => {
            let changed = ctx
                .recovery()
                .change_recovery_key_password(&new_password, &old_password)?;
            anyhow::ensure!(changed, "wrong recovery password");
            serde_json::json!({ "changed": true })
        }
        Command::RecoverUser {
            uid,
            recovery_password,
            new_password,
        } => recover_user(ctx, &uid, &recovery_password, &new_password)?,
        Command::Status => serde_json::to_value(status(ctx)?)?,
    };
    ctx.save()?;
    Ok(output)
}

fn recover_user(
    ctx: &AdminContext,
    uid: &str,
    recovery_password: &str,
    new_password: &str,
) -> anyhow::Result<serde_json::Value> {
    let recovery = ctx.recovery();
    anyhow::ensure!(recovery.is_recovery_key_enabled(), "admin recovery is not enabled");
    anyhow::ensure!(
        recovery.is_recovery_enabled_for_user(uid),
        "user {} has not enabled recovery",
        uid
    );
    anyhow::ensure!(
        recovery.check_recovery_password(recovery_password)?,
        "wrong recovery password"
    );

    let km = ctx.key_manager();
    km.delete_user_keys(uid)?;
    km.create_user_keys(uid, new_password)?;
    info!(uid, "replaced user key pair");

    let report = recovery
        .recover_users_files(recovery_password, Some(uid))?
        .ok_or_else(|| anyhow::anyhow!("wrong recovery password"))?;
    Ok(serde_json::json!({ "uid": uid, "report": report }))
}

fn status(ctx: &AdminContext) -> anyhow::Result<Status> {
    let km = ctx.key_manager();
    let users = ctx.users().users();
    let mut users_with_keys = 0;
    for uid in &users {
        if km.user_has_keys(uid)? {
            users_with_keys += 1;
        }
    }
    let ids = km.key_ids();
    Ok(Status {
        module_id: ctx.config().module_id.clone(),
        master_key_enabled: km.is_master_key_enabled(),
        installed_version: ctx.app_config().get_app_value(APP_ID, INSTALLED_VERSION),
        master_key_id: ids.master_key_id.clone(),
        public_share_key_id: ids.public_share_key_id.clone(),
        recovery_key_id: ids.recovery_key_id.clone(),
        recovery_enabled: km.policy().is_recovery_admin_enabled()
            && km.get_system_private_key(&ids.recovery_key_id).is_ok(),
        users: users.len(),
        users_with_keys,
        encrypted_files: ctx.file_cache().encrypted_rows().len(),
    })
}
