use async_trait::async_trait;
use cove_core::{PageType, PageTypeKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Login forms in the order they are checked.
pub const LOGIN_FORMS: [(&str, PageTypeKind); 3] = [
    ("pm_login", PageTypeKind::Login),
    ("pm_loginTwoFactor", PageTypeKind::Login2fa),
    ("pm_loginUnlock", PageTypeKind::Unlock),
];

/// Read access to the provider page hosting the session.
#[async_trait]
pub trait PageProbe: Send + Sync {
    async fn is_logged_in(&self) -> bool;

    async fn location_href(&self) -> String;

    async fn is_form_visible(&self, form_id: &str) -> bool;

    /// Reads and clears the one-time "skip login delay" flag.
    async fn take_skip_login_delay(&self) -> bool;

    async fn clear_skip_login_delay(&self);
}

/// Classifies the current page. Only the login URL of a logged-out page can
/// be anything other than [`PageTypeKind::Unknown`].
pub async fn detect_page_type(probe: &dyn PageProbe, login_url: &str) -> PageType {
    let url = probe.location_href().await;
    let mut kind = PageTypeKind::Unknown;

    if !probe.is_logged_in().await && url == login_url {
        for (form_id, form_kind) in LOGIN_FORMS {
            if probe.is_form_visible(form_id).await {
                kind = form_kind;
                break;
            }
        }
    }

    PageType {
        url,
        kind,
        skip_login_delay_logic: None,
    }
}

/// Page state as reported by the host, one JSON object per update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageState {
    pub logged_in: bool,
    pub location_href: String,
    pub visible_forms: BTreeSet<String>,
    pub skip_login_delay: bool,
}

/// [`PageProbe`] over the latest reported [`PageState`].
#[derive(Debug, Clone, Default)]
pub struct SharedPageState {
    state: Arc<RwLock<PageState>>,
}

impl SharedPageState {
    pub fn new(state: PageState) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Replaces the reported state. A pending skip flag survives updates
    /// that do not set it themselves.
    pub async fn update(&self, next: PageState) {
        let mut state = self.state.write().await;
        let skip = state.skip_login_delay || next.skip_login_delay;
        *state = PageState {
            skip_login_delay: skip,
            ..next
        };
    }

    pub async fn current(&self) -> PageState {
        self.state.read().await.clone()
    }
}

#[async_trait]
impl PageProbe for SharedPageState {
    async fn is_logged_in(&self) -> bool {
        self.state.read().await.logged_in
    }

    async fn location_href(&self) -> String {
        self.state.read().await.location_href.clone()
    }

    async fn is_form_visible(&self, form_id: &str) -> bool {
        self.state.read().await.visible_forms.contains(form_id)
    }

    async fn take_skip_login_delay(&self) -> bool {
        std::mem::take(&mut self.state.write().await.skip_login_delay)
    }

    async fn clear_skip_login_delay(&self) {
        self.state.write().await.skip_login_delay = false;
    }
}
