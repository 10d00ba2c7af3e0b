//! Adapter registry keeping track of attached pages and their frame sessions.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::ids::{PageId, SessionId};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TargetContext {
    pub session_id: SessionId,
    pub target_id: Option<String>,
    pub cdp_session: Option<String>,
    pub recent_url: Option<String>,
}

/// Concurrent registry for pages, their flattened sessions and out-of-process frame sessions.
#[derive(Default)]
pub struct Registry {
    pages: DashMap<PageId, TargetContext>,
    frame_sessions: DashMap<(PageId, String), String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_page(
        &self,
        page: PageId,
        session: SessionId,
        target_id: Option<String>,
        cdp_session: Option<String>,
    ) {
        let ctx = TargetContext {
            session_id: session,
            target_id,
            cdp_session,
            recent_url: None,
        };
        self.pages.insert(page, ctx);
    }

    pub fn remove_page(&self, page: &PageId) {
        self.pages.remove(page);
        self.frame_sessions.retain(|(owner, _), _| owner != page);
    }

    pub fn get(&self, page: &PageId) -> Option<TargetContext> {
        self.pages.get(page).map(|entry| entry.value().clone())
    }

    pub fn find_by_target(&self, target_id: &str) -> Option<PageId> {
        self.pages
            .iter()
            .find(|kv| kv.value().target_id.as_deref() == Some(target_id))
            .map(|kv| *kv.key())
    }

    pub fn set_recent_url(&self, page: &PageId, url: String) {
        if let Some(mut entry) = self.pages.get_mut(page) {
            entry.recent_url = Some(url);
        }
    }

    pub fn set_cdp_session(&self, page: &PageId, session: String) {
        if let Some(mut entry) = self.pages.get_mut(page) {
            entry.cdp_session = Some(session);
        }
    }

    pub fn get_cdp_session(&self, page: &PageId) -> Option<String> {
        self.pages
            .get(page)
            .and_then(|entry| entry.cdp_session.clone())
    }

    /// Drops every session (page or frame) that matches a detached protocol session id.
    pub fn forget_cdp_session(&self, session: &str) {
        for mut entry in self.pages.iter_mut() {
            if entry.cdp_session.as_deref() == Some(session) {
                entry.cdp_session = None;
            }
        }
        self.frame_sessions.retain(|_, value| value != session);
    }

    pub fn set_frame_session(&self, page: PageId, frame_id: &str, session: String) {
        self.frame_sessions
            .insert((page, frame_id.to_string()), session);
    }

    pub fn frame_session(&self, page: &PageId, frame_id: &str) -> Option<String> {
        self.frame_sessions
            .get(&(*page, frame_id.to_string()))
            .map(|entry| entry.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removing_page_drops_its_frame_sessions() {
        let registry = Registry::new();
        let page = PageId::new();
        registry.insert_page(page, SessionId::new(), Some("T1".into()), Some("S1".into()));
        registry.set_frame_session(page, "F1", "S2".into());

        assert_eq!(registry.find_by_target("T1"), Some(page));
        assert_eq!(registry.frame_session(&page, "F1").as_deref(), Some("S2"));

        registry.remove_page(&page);
        assert!(registry.get(&page).is_none());
        assert!(registry.frame_session(&page, "F1").is_none());
    }

    #[test]
    fn forgetting_session_clears_page_and_frame_entries() {
        let registry = Registry::new();
        let page = PageId::new();
        registry.insert_page(page, SessionId::new(), None, Some("S1".into()));
        registry.set_frame_session(page, "F1", "S1".into());

        registry.forget_cdp_session("S1");
        assert!(registry.get_cdp_session(&page).is_none());
        assert!(registry.frame_session(&page, "F1").is_none());
    }
}
