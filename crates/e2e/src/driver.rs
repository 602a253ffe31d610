//! Browser driver capability consumed by the scenario runner
//!
//! The runner never manages browser processes itself. It asks a
//! [`SessionFactory`] for a fresh [`BrowserSession`] per scenario and talks
//! to it through this interface only.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::E2eResult;
use crate::selector::{Selector, SelectorSet};

/// Opaque reference to an element inside one session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementHandle(String);

impl ElementHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

/// Outcome of resolving a selector set against the current page
#[derive(Debug, Clone)]
pub struct LocatorResult {
    selectors: SelectorSet,
    matched: Option<usize>,
    elements: Vec<ElementHandle>,
}

impl LocatorResult {
    pub fn new(selectors: SelectorSet, matched: Option<usize>, elements: Vec<ElementHandle>) -> Self {
        Self {
            selectors,
            matched,
            elements,
        }
    }

    pub fn empty(selectors: SelectorSet) -> Self {
        Self::new(selectors, None, Vec::new())
    }

    pub fn selectors(&self) -> &SelectorSet {
        &self.selectors
    }

    /// The strategy that produced the matches, if any did
    pub fn matched_selector(&self) -> Option<&Selector> {
        self.matched.and_then(|i| self.selectors.get(i))
    }

    pub fn first(&self) -> Option<&ElementHandle> {
        self.elements.first()
    }

    pub fn elements(&self) -> &[ElementHandle] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// True when at least one match is currently visible
    pub async fn any_visible(&self, session: &mut dyn BrowserSession) -> E2eResult<bool> {
        for element in &self.elements {
            if session.is_visible(element).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// True when the first match exists and is currently visible
    pub async fn first_visible(&self, session: &mut dyn BrowserSession) -> E2eResult<bool> {
        match self.first() {
            Some(element) => session.is_visible(element).await,
            None => Ok(false),
        }
    }
}

/// A live browser page owned by exactly one scenario
#[async_trait]
pub trait BrowserSession: Send {
    /// Load `url` and return once the driver reports it loaded
    async fn navigate(&mut self, url: &str) -> E2eResult<()>;

    /// Block until no network activity is observed, bounded by `timeout`
    async fn wait_for_network_idle(&mut self, timeout: Duration) -> E2eResult<()>;

    /// Current matches of a single strategy; never waits
    async fn query(&mut self, selector: &Selector) -> E2eResult<Vec<ElementHandle>>;

    /// Resolve a selector set, first-match-wins
    async fn locate(&mut self, selectors: &SelectorSet) -> E2eResult<LocatorResult> {
        for (index, selector) in selectors.strategies().iter().enumerate() {
            let elements = self.query(selector).await?;
            if !elements.is_empty() {
                return Ok(LocatorResult::new(selectors.clone(), Some(index), elements));
            }
        }
        Ok(LocatorResult::empty(selectors.clone()))
    }

    async fn click(&mut self, element: &ElementHandle) -> E2eResult<()>;

    /// Detached or unknown handles report `false`
    async fn is_visible(&mut self, element: &ElementHandle) -> E2eResult<bool>;

    async fn visible_text(&mut self, element: &ElementHandle) -> E2eResult<String>;

    /// Handles the runner no longer needs. Using them afterwards is an error.
    async fn dispose(&mut self, _elements: &[ElementHandle]) -> E2eResult<()> {
        Ok(())
    }

    /// Full-page capture. Returns `false` when the driver cannot take screenshots.
    async fn screenshot(&mut self, _path: &Path) -> E2eResult<bool> {
        Ok(false)
    }

    /// Release the underlying browser resources
    async fn close(&mut self) -> E2eResult<()>;
}

/// Produces fresh, isolated sessions
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> E2eResult<Box<dyn BrowserSession>>;
}
