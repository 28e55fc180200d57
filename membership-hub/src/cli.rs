//! Admin command line.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use membership_hub_core::{
    Account, AccountRef, AccountState, BackendGroup, Database, GroupRef, HubConfig,
    MembershipStore, MembershipType, NewAccount, NewBackendGroup,
};
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "membership-hub")]
#[command(about = "Accounts, backend groups and their memberships")]
pub struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// SQLite database, overrides the configuration
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP admin API
    Serve {
        /// Listen address
        #[arg(short, long)]
        addr: Option<String>,
    },

    /// Manage accounts
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Manage backend groups and their members
    Group {
        #[command(subcommand)]
        action: GroupAction,
    },

    /// List every account that administers a group
    Admins,
}

#[derive(Subcommand, Debug)]
pub enum UserAction {
    Create {
        uid: String,
        #[arg(long)]
        display_name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long, default_value = "Database")]
        backend: String,
        /// Defaults to `/home/<uid>`
        #[arg(long)]
        home: Option<String>,
    },
    /// Delete an account together with its memberships
    Delete { uid: String },
    /// Groups the account belongs to
    Groups {
        uid: String,
        #[arg(long)]
        admin: bool,
    },
    /// Replace the account's search terms
    Terms { uid: String, terms: Vec<String> },
    Disable { uid: String },
    Enable { uid: String },
}

#[derive(Subcommand, Debug)]
pub enum GroupAction {
    Create {
        gid: String,
        #[arg(long)]
        display_name: Option<String>,
        #[arg(long, default_value = "Database")]
        backend: String,
    },
    /// Delete a group together with its memberships
    Delete { gid: String },
    Add {
        gid: String,
        uid: String,
        #[arg(long)]
        admin: bool,
    },
    Remove {
        gid: String,
        uid: String,
        #[arg(long)]
        admin: bool,
    },
    Members {
        gid: String,
        #[arg(long)]
        admin: bool,
    },
    /// Search plain members by uid, name, email or term
    Search {
        gid: String,
        pattern: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        offset: Option<u32>,
    },
    Count { gid: String, pattern: Option<String> },
}

fn role(admin: bool) -> MembershipType {
    if admin {
        MembershipType::Admin
    } else {
        MembershipType::User
    }
}

/// File and environment configuration, with `--database` applied last.
pub fn load_config(cli: &Cli) -> Result<HubConfig> {
    let mut config = HubConfig::load(cli.config.as_deref())
        .with_context(|| format!("loading configuration {:?}", cli.config))?;
    if let Some(path) = &cli.database {
        config.database_path = path.clone();
    }
    Ok(config)
}

pub fn open_store(config: &HubConfig) -> Result<MembershipStore> {
    let db = Database::open(&config.database_path)
        .with_context(|| format!("opening {}", config.database_path.display()))?;
    Ok(MembershipStore::open(db, config.membership.clone()))
}

fn account(store: &MembershipStore, uid: &str) -> Result<Account> {
    match store.accounts().get_by_uid(uid)? {
        Some(account) => Ok(account),
        None => bail!("unknown user {uid}"),
    }
}

fn group(store: &MembershipStore, gid: &str) -> Result<BackendGroup> {
    match store.groups().get_group(gid)? {
        Some(group) => Ok(group),
        None => bail!("unknown group {gid}"),
    }
}

fn print_accounts(out: &mut impl Write, accounts: &[Account]) -> Result<()> {
    for account in accounts {
        writeln!(
            out,
            "{}\t{}\t{}",
            account.user_id,
            account.label(),
            account.email.as_deref().unwrap_or("-")
        )?;
    }
    Ok(())
}

fn print_groups(out: &mut impl Write, groups: &[BackendGroup]) -> Result<()> {
    for group in groups {
        writeln!(
            out,
            "{}\t{}",
            group.group_id,
            group.display_name.as_deref().unwrap_or(&group.group_id)
        )?;
    }
    Ok(())
}

/// Run every command except `serve`.
pub fn execute(store: &MembershipStore, command: Commands, out: &mut impl Write) -> Result<()> {
    match command {
        Commands::Serve { .. } => bail!("serve is handled by the server entry point"),
        Commands::User { action } => user(store, action, out),
        Commands::Group { action } => group_command(store, action, out),
        Commands::Admins => print_accounts(out, &store.admin_accounts()?),
    }
}

fn user(store: &MembershipStore, action: UserAction, out: &mut impl Write) -> Result<()> {
    match action {
        UserAction::Create {
            uid,
            display_name,
            email,
            backend,
            home,
        } => {
            let home = home.unwrap_or_else(|| format!("/home/{uid}"));
            let mut new = NewAccount::new(uid, backend, home);
            new.display_name = display_name;
            new.email = email;
            let created = store.accounts().insert(new)?;
            writeln!(out, "created {} ({})", created.user_id, created.id)?;
        }
        UserAction::Delete { uid } => {
            let account = account(store, &uid)?;
            store.remove_memberships_for_account(&AccountRef::from(&account))?;
            store.accounts().delete(account.id)?;
            writeln!(out, "deleted {uid}")?;
        }
        UserAction::Groups { uid, admin } => {
            let account = account(store, &uid)?;
            let groups = store.groups_for_account(&AccountRef::from(&account), role(admin))?;
            print_groups(out, &groups)?;
        }
        UserAction::Terms { uid, terms } => {
            let account = account(store, &uid)?;
            store.accounts().set_terms(account.id, &terms)?;
            for term in store.accounts().terms(account.id)? {
                writeln!(out, "{term}")?;
            }
        }
        UserAction::Disable { uid } => {
            let account = account(store, &uid)?;
            store.accounts().set_state(account.id, AccountState::Disabled)?;
            writeln!(out, "disabled {uid}")?;
        }
        UserAction::Enable { uid } => {
            let account = account(store, &uid)?;
            store.accounts().set_state(account.id, AccountState::Enabled)?;
            writeln!(out, "enabled {uid}")?;
        }
    }
    Ok(())
}

fn group_command(store: &MembershipStore, action: GroupAction, out: &mut impl Write) -> Result<()> {
    match action {
        GroupAction::Create {
            gid,
            display_name,
            backend,
        } => {
            let mut new = NewBackendGroup::new(gid, backend);
            new.display_name = display_name;
            let created = store.groups().insert(new)?;
            writeln!(out, "created {} ({})", created.group_id, created.id)?;
        }
        GroupAction::Delete { gid } => {
            let group = group(store, &gid)?;
            store.remove_memberships_for_group(&GroupRef::from(&group))?;
            store.groups().delete(group.id)?;
            writeln!(out, "deleted {gid}")?;
        }
        GroupAction::Add { gid, uid, admin } => {
            let group = group(store, &gid)?;
            let account = account(store, &uid)?;
            let role = role(admin);
            if store.add_membership(account.id, group.id, role)? {
                writeln!(out, "added {uid} to {gid} as {role}")?;
            } else {
                writeln!(out, "{uid} already is {role} of {gid}")?;
            }
        }
        GroupAction::Remove { gid, uid, admin } => {
            let group = group(store, &gid)?;
            let account = account(store, &uid)?;
            let role = role(admin);
            store.remove_role(&AccountRef::from(&account), &GroupRef::from(&group), role)?;
            writeln!(out, "removed {role} {uid} from {gid}")?;
        }
        GroupAction::Members { gid, admin } => {
            let group = group(store, &gid)?;
            let members = store.accounts_for_group(Some(&GroupRef::from(&group)), role(admin))?;
            print_accounts(out, &members)?;
        }
        GroupAction::Search {
            gid,
            pattern,
            limit,
            offset,
        } => {
            let group = group(store, &gid)?;
            let found = store.search(
                &GroupRef::from(&group),
                pattern.as_deref().unwrap_or_default(),
                limit,
                offset,
            )?;
            print_accounts(out, &found)?;
        }
        GroupAction::Count { gid, pattern } => {
            let group = group(store, &gid)?;
            let count = store.count_members_aggregate(
                &GroupRef::from(&group),
                pattern.as_deref().unwrap_or_default(),
                None,
                None,
            )?;
            writeln!(out, "{count}")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use membership_hub_core::MembershipConfig;

    fn store() -> MembershipStore {
        MembershipStore::open(Database::open_in_memory().unwrap(), MembershipConfig::default())
    }

    fn run(store: &MembershipStore, args: &[&str]) -> Result<String> {
        let cli = Cli::try_parse_from(std::iter::once("membership-hub").chain(args.iter().copied()))?;
        let mut out = Vec::new();
        execute(store, cli.command, &mut out)?;
        Ok(String::from_utf8(out)?)
    }

    #[test]
    fn create_and_list_members() {
        let store = store();
        run(&store, &["user", "create", "alice", "--display-name", "Alice", "--email", "a@x.org"]).unwrap();
        run(&store, &["user", "create", "bob"]).unwrap();
        run(&store, &["group", "create", "staff", "--display-name", "Staff"]).unwrap();
        run(&store, &["group", "add", "staff", "alice"]).unwrap();
        run(&store, &["group", "add", "staff", "bob"]).unwrap();
        run(&store, &["group", "add", "staff", "bob", "--admin"]).unwrap();

        let members = run(&store, &["group", "members", "staff"]).unwrap();
        assert_eq!(members, "alice\tAlice\ta@x.org\nbob\tbob\t-\n");
        assert_eq!(run(&store, &["admins"]).unwrap(), "bob\tbob\t-\n");
        assert_eq!(run(&store, &["user", "groups", "bob", "--admin"]).unwrap(), "staff\tStaff\n");
        assert_eq!(run(&store, &["group", "count", "staff", "ali"]).unwrap(), "1\n");
        assert_eq!(
            // accounts without a display name sort first
            run(&store, &["group", "search", "staff", "--limit", "1", "--offset", "1"]).unwrap(),
            "alice\tAlice\ta@x.org\n"
        );
    }

    #[test]
    fn duplicate_add_is_reported() {
        let store = store();
        run(&store, &["user", "create", "alice"]).unwrap();
        run(&store, &["group", "create", "staff"]).unwrap();
        run(&store, &["group", "add", "staff", "alice"]).unwrap();
        let again = run(&store, &["group", "add", "staff", "alice"]).unwrap();
        assert!(again.contains("already"));
    }

    #[test]
    fn unknown_entities_fail() {
        let store = store();
        run(&store, &["group", "create", "staff"]).unwrap();
        let err = run(&store, &["group", "add", "staff", "ghost"]).unwrap_err();
        assert!(err.to_string().contains("unknown user ghost"));
        assert!(run(&store, &["group", "members", "nope"]).is_err());
    }

    #[test]
    fn deletes_remove_memberships_first() {
        let store = store();
        run(&store, &["user", "create", "alice"]).unwrap();
        run(&store, &["group", "create", "staff"]).unwrap();
        run(&store, &["group", "add", "staff", "alice", "--admin"]).unwrap();
        run(&store, &["group", "delete", "staff"]).unwrap();
        assert!(store.groups().get_group("staff").unwrap().is_none());
        assert!(run(&store, &["admins"]).unwrap().is_empty());
        run(&store, &["user", "delete", "alice"]).unwrap();
        assert!(store.accounts().get_by_uid("alice").unwrap().is_none());
    }

    #[test]
    fn terms_and_state() {
        let store = store();
        run(&store, &["user", "create", "alice"]).unwrap();
        let terms = run(&store, &["user", "terms", "alice", "Red", "Blue"]).unwrap();
        assert_eq!(terms, "red\nblue\n");
        run(&store, &["user", "disable", "alice"]).unwrap();
        let alice = store.accounts().get_by_uid("alice").unwrap().unwrap();
        assert_eq!(alice.state, AccountState::Disabled);
    }

    #[test]
    fn database_flag_overrides_configuration() {
        let cli = Cli::try_parse_from(["membership-hub", "--database", "/tmp/x.db", "admins"]).unwrap();
        let config = load_config(&cli).unwrap();
        assert_eq!(config.database_path, PathBuf::from("/tmp/x.db"));
    }
}
