//! In-memory scripted page for exercising scenarios without a browser
//!
//! Elements answer to the exact CSS strings they are declared with; there is
//! no CSS engine here. Every [`MockSessionFactory::open`] call starts from a
//! fresh copy of the page, and a shared [`MockLog`] records what sessions did.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::driver::{BrowserSession, ElementHandle, SessionFactory};
use crate::error::{E2eError, E2eResult};
use crate::selector::Selector;

#[derive(Debug, Clone, Default)]
pub struct MockElement {
    pub css: Vec<String>,
    pub test_id: Option<String>,
    pub role: Option<String>,
    pub text: String,
    pub visible: bool,
    /// Elements attached to the page when this one is clicked
    pub reveals: Vec<MockElement>,
}

impl MockElement {
    pub fn new() -> Self {
        Self {
            visible: true,
            ..Self::default()
        }
    }

    pub fn css(mut self, css: impl Into<String>) -> Self {
        self.css.push(css.into());
        self
    }

    pub fn test_id(mut self, id: impl Into<String>) -> Self {
        self.test_id = Some(id.into());
        self
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn reveals(mut self, element: MockElement) -> Self {
        self.reveals.push(element);
        self
    }

    fn matches(&self, selector: &Selector) -> E2eResult<bool> {
        Ok(match selector {
            Selector::Css { css } => self.css.iter().any(|c| c == css),
            Selector::TestId { id } => self.test_id.as_deref() == Some(id.as_str()),
            Selector::Text(pattern) => !self.text.is_empty() && pattern.is_match(&self.text)?,
            Selector::Role { role, name } => {
                self.role.as_deref() == Some(role.as_str())
                    && name
                        .as_ref()
                        .map(|n| self.text.to_lowercase().contains(&n.to_lowercase()))
                        .unwrap_or(true)
            }
        })
    }
}

/// The page served after navigation
#[derive(Debug, Clone, Default)]
pub struct MockPage {
    pub elements: Vec<MockElement>,
    /// Navigation reports the target unreachable
    pub fail_navigation: bool,
    /// Navigation never completes
    pub hang_navigation: bool,
    /// The network never goes idle
    pub never_idle: bool,
}

impl MockPage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, element: MockElement) -> Self {
        self.elements.push(element);
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.fail_navigation = true;
        self
    }

    pub fn hanging(mut self) -> Self {
        self.hang_navigation = true;
        self
    }

    pub fn busy_network(mut self) -> Self {
        self.never_idle = true;
        self
    }
}

/// Counters and interaction history shared by every session of a factory
#[derive(Debug, Default)]
pub struct MockLog {
    opened: AtomicUsize,
    closed: AtomicUsize,
    released: AtomicUsize,
    disposed: AtomicUsize,
    navigations: Mutex<Vec<String>>,
    clicks: Mutex<Vec<String>>,
}

impl MockLog {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Sessions closed through `close()`
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Sessions dropped, whether or not they were closed first
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Element handles given back by the runner
    pub fn disposed(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn navigations(&self) -> Vec<String> {
        self.navigations.lock().clone()
    }

    /// Text of every clicked element, in order
    pub fn clicks(&self) -> Vec<String> {
        self.clicks.lock().clone()
    }
}

pub struct MockSessionFactory {
    page: MockPage,
    log: Arc<MockLog>,
}

impl MockSessionFactory {
    pub fn new(page: MockPage) -> Self {
        Self {
            page,
            log: Arc::new(MockLog::default()),
        }
    }

    pub fn log(&self) -> Arc<MockLog> {
        self.log.clone()
    }
}

#[async_trait]
impl SessionFactory for MockSessionFactory {
    async fn open(&self) -> E2eResult<Box<dyn BrowserSession>> {
        self.log.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession {
            page: self.page.clone(),
            live: Vec::new(),
            next_id: 0,
            log: self.log.clone(),
        }))
    }
}

pub struct MockSession {
    page: MockPage,
    live: Vec<(ElementHandle, MockElement)>,
    next_id: usize,
    log: Arc<MockLog>,
}

impl MockSession {
    fn attach(&mut self, element: MockElement) {
        self.next_id += 1;
        self.live
            .push((ElementHandle::new(format!("mock-{}", self.next_id)), element));
    }

    fn element(&self, handle: &ElementHandle) -> Option<&MockElement> {
        self.live.iter().find(|(h, _)| h == handle).map(|(_, e)| e)
    }
}

#[async_trait]
impl BrowserSession for MockSession {
    async fn navigate(&mut self, url: &str) -> E2eResult<()> {
        self.log.navigations.lock().push(url.to_string());
        if self.page.hang_navigation {
            std::future::pending::<()>().await;
        }
        if self.page.fail_navigation {
            return Err(E2eError::Navigation(format!("{}: connection refused", url)));
        }
        self.live.clear();
        for element in self.page.elements.clone() {
            self.attach(element);
        }
        Ok(())
    }

    async fn wait_for_network_idle(&mut self, timeout: Duration) -> E2eResult<()> {
        if self.page.never_idle {
            tokio::time::sleep(timeout).await;
            return Err(E2eError::Timeout(format!(
                "network idle after {} ms",
                timeout.as_millis()
            )));
        }
        Ok(())
    }

    async fn query(&mut self, selector: &Selector) -> E2eResult<Vec<ElementHandle>> {
        let mut found = Vec::new();
        for (handle, element) in &self.live {
            if element.matches(selector)? {
                found.push(handle.clone());
            }
        }
        Ok(found)
    }

    async fn click(&mut self, element: &ElementHandle) -> E2eResult<()> {
        let clicked = self
            .element(element)
            .cloned()
            .ok_or_else(|| E2eError::Bridge(format!("stale element handle {}", element.id())))?;
        self.log.clicks.lock().push(clicked.text.clone());
        for revealed in clicked.reveals {
            self.attach(revealed);
        }
        Ok(())
    }

    async fn is_visible(&mut self, element: &ElementHandle) -> E2eResult<bool> {
        Ok(self.element(element).map(|e| e.visible).unwrap_or(false))
    }

    async fn visible_text(&mut self, element: &ElementHandle) -> E2eResult<String> {
        Ok(self
            .element(element)
            .filter(|e| e.visible)
            .map(|e| e.text.clone())
            .unwrap_or_default())
    }

    async fn dispose(&mut self, elements: &[ElementHandle]) -> E2eResult<()> {
        // Page elements outlive their handles here; only count.
        self.log.disposed.fetch_add(elements.len(), Ordering::SeqCst);
        Ok(())
    }

    async fn screenshot(&mut self, path: &Path) -> E2eResult<bool> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let dump: Vec<&str> = self.live.iter().map(|(_, e)| e.text.as_str()).collect();
        std::fs::write(path, dump.join("\n"))?;
        Ok(true)
    }

    async fn close(&mut self) -> E2eResult<()> {
        self.log.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.log.released.fetch_add(1, Ordering::SeqCst);
    }
}
