//! Per-account UI state and the actions that mutate it.

use crate::{NotificationOutput, PageType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccountError {
    #[error("account not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AccountConfig {
    pub login: String,
    #[serde(default)]
    pub database: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AccountNotifications {
    pub logged_in: bool,
    pub page_type: PageType,
    pub unread: u64,
    pub batch_entity_updates_counter: u64,
}

impl AccountNotifications {
    /// Folds a partial notification; absent fields are left untouched.
    pub fn apply(&mut self, patch: &NotificationOutput) {
        if let Some(logged_in) = patch.logged_in {
            self.logged_in = logged_in;
        }
        if let Some(page_type) = &patch.page_type {
            self.page_type = page_type.clone();
        }
        if let Some(unread) = patch.unread {
            self.unread = unread;
        }
        if let Some(counter) = patch.batch_entity_updates_counter {
            self.batch_entity_updates_counter = counter;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AccountProgress {
    pub syncing: bool,
    pub toggling_database_view: bool,
    pub selecting_mail_online: bool,
    pub making_mail_read: bool,
    pub setting_mail_folder: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AccountProgressPatch {
    pub syncing: Option<bool>,
    pub toggling_database_view: Option<bool>,
    pub selecting_mail_online: Option<bool>,
    pub making_mail_read: Option<bool>,
    pub setting_mail_folder: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MailRef {
    pub id: String,
    pub conversation_entry_pk: String,
    pub mail_folder_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MakeReadMailParams {
    pub message_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SetMailFolderParams {
    pub folder_id: String,
    pub message_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WebAccount {
    pub config: AccountConfig,
    pub notifications: AccountNotifications,
    pub progress: AccountProgress,
    pub database_view: bool,
    pub selected_mail: Option<MailRef>,
    pub make_read_mail_params: Option<MakeReadMailParams>,
    pub set_mail_folder_params: Option<SetMailFolderParams>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl WebAccount {
    fn new(config: AccountConfig) -> Self {
        Self {
            config,
            notifications: AccountNotifications::default(),
            progress: AccountProgress::default(),
            database_view: false,
            selected_mail: None,
            make_read_mail_params: None,
            set_mail_folder_params: None,
            last_synced_at: None,
        }
    }

    pub fn login(&self) -> &str {
        &self.config.login
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum AccountAction {
    Select {
        login: String,
    },
    DeSelect {
        login: String,
    },
    PatchProgress {
        login: String,
        patch: AccountProgressPatch,
    },
    PatchNotifications {
        login: String,
        patch: NotificationOutput,
        #[serde(default)]
        ignore_no_account: bool,
    },
    ToggleDatabaseView {
        login: String,
        forced: Option<bool>,
    },
    Synced {
        login: String,
    },
    SelectMailOnline {
        login: String,
        mail: MailRef,
    },
    MakeMailReadSetParams {
        login: String,
        params: Option<MakeReadMailParams>,
    },
    SetMailFolderParams {
        login: String,
        params: Option<SetMailFolderParams>,
    },
    WireUpConfigs {
        configs: Vec<AccountConfig>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AccountsState {
    pub accounts: Vec<WebAccount>,
    pub selected_login: Option<String>,
    pub initialized: bool,
}

impl AccountsState {
    pub fn account(&self, login: &str) -> Option<&WebAccount> {
        self.accounts.iter().find(|account| account.login() == login)
    }

    fn account_mut(&mut self, login: &str) -> Result<&mut WebAccount, AccountError> {
        self.accounts
            .iter_mut()
            .find(|account| account.login() == login)
            .ok_or_else(|| AccountError::NotFound(login.to_string()))
    }

    pub fn reduce(&mut self, action: AccountAction) -> Result<(), AccountError> {
        match action {
            AccountAction::Select { login } => {
                self.account_mut(&login)?;
                self.selected_login = Some(login);
            }
            AccountAction::DeSelect { login } => {
                if self.selected_login.as_deref() == Some(login.as_str()) {
                    self.selected_login = None;
                }
            }
            AccountAction::PatchProgress { login, patch } => {
                let progress = &mut self.account_mut(&login)?.progress;
                if let Some(value) = patch.syncing {
                    progress.syncing = value;
                }
                if let Some(value) = patch.toggling_database_view {
                    progress.toggling_database_view = value;
                }
                if let Some(value) = patch.selecting_mail_online {
                    progress.selecting_mail_online = value;
                }
                if let Some(value) = patch.making_mail_read {
                    progress.making_mail_read = value;
                }
                if let Some(value) = patch.setting_mail_folder {
                    progress.setting_mail_folder = value;
                }
            }
            AccountAction::PatchNotifications {
                login,
                patch,
                ignore_no_account,
            } => match self.account_mut(&login) {
                Ok(account) => account.notifications.apply(&patch),
                Err(_) if ignore_no_account => {}
                Err(err) => return Err(err),
            },
            AccountAction::ToggleDatabaseView { login, forced } => {
                let account = self.account_mut(&login)?;
                account.database_view = forced.unwrap_or(!account.database_view);
            }
            AccountAction::Synced { login } => {
                let account = self.account_mut(&login)?;
                account.progress.syncing = false;
                account.last_synced_at = Some(Utc::now());
            }
            AccountAction::SelectMailOnline { login, mail } => {
                self.account_mut(&login)?.selected_mail = Some(mail);
            }
            AccountAction::MakeMailReadSetParams { login, params } => {
                self.account_mut(&login)?.make_read_mail_params = params;
            }
            AccountAction::SetMailFolderParams { login, params } => {
                self.account_mut(&login)?.set_mail_folder_params = params;
            }
            AccountAction::WireUpConfigs { configs } => {
                let mut previous = std::mem::take(&mut self.accounts);
                self.accounts = configs
                    .into_iter()
                    .map(|config| {
                        match previous.iter().position(|a| a.login() == config.login) {
                            Some(index) => {
                                let mut account = previous.swap_remove(index);
                                account.config = config;
                                account
                            }
                            None => WebAccount::new(config),
                        }
                    })
                    .collect();
                let stale = self
                    .selected_login
                    .as_deref()
                    .is_some_and(|login| self.account(login).is_none());
                if stale {
                    self.selected_login = None;
                }
                self.initialized = true;
            }
        }

        Ok(())
    }
}
